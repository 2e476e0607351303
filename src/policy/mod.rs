//! Pluggable policy capabilities
//!
//! The orchestrator only depends on these traits; the decision procedures
//! behind them (keyword rules here, a learned model elsewhere) are
//! replaceable without touching any other component.

pub mod heuristics;
pub mod llm_generator;

use crate::context::{Route, ScoredChunk};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Structured filters extracted from a question and/or supporting documents.
/// A missing key means "no constraint for that axis", never an error.
pub type Constraints = BTreeMap<String, Option<String>>;

/// Decides which workflow branch a question needs. Pure function of the
/// question text; invoked exactly once per request. Ambiguity must resolve
/// to a conservative route, never to a failure.
#[async_trait]
pub trait RouteClassifier: Send + Sync {
    async fn classify(&self, question: &str) -> Route;
}

/// Derives structured filters from the question and the retrieved chunks.
/// Only invoked on the hybrid route, after retrieval, so document-defined
/// vocabulary (named date ranges, KPI formulas) is available.
#[async_trait]
pub trait ConstraintExtractor: Send + Sync {
    async fn extract(&self, question: &str, chunks: &[ScoredChunk]) -> Constraints;
}

/// Produces a structured query from the question, a schema description, and
/// extracted constraints. Must never execute the query. Re-invoked on repair
/// with the prior error visible so a smarter implementation can adapt.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        schema: &str,
        constraints: &Constraints,
        prior_error: Option<&str>,
    ) -> Result<String>;
}
