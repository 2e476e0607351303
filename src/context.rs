//! Request Context
//!
//! The per-question state threaded through the workflow stages. Each stage
//! takes the context by value and returns the updated value, so mutations
//! only become visible once a stage completes.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workflow branch selected for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    #[default]
    Unset,
    /// Document retrieval only.
    Docs,
    /// Structured query only.
    Query,
    /// Retrieval feeding constraint extraction feeding a structured query.
    Hybrid,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Unset => "unset",
            Route::Docs => "docs",
            Route::Query => "query",
            Route::Hybrid => "hybrid",
        }
    }
}

/// Tabular result from the structured store. Failures are carried in `error`
/// with empty columns/rows, never raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub error: Option<String>,
}

impl TableResult {
    pub fn success(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            columns,
            rows,
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            error: Some(error),
        }
    }
}

/// A retrieved document chunk with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub id: String,
    pub content: String,
    pub score: f64,
}

/// Decision recorded by the repair controller, carried as explicit context
/// state so the conditional edge after it never has to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairOutcome {
    /// No error present, continue to synthesis.
    Proceed,
    /// Error cleared, query generation re-runs.
    Retry,
    /// Repair budget exhausted, terminal failure answer written.
    GiveUp,
}

/// Per-request state. One instance per question, never shared across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub question: String,
    pub format_hint: String,
    route: Route,
    pub constraints: BTreeMap<String, Option<String>>,
    pub generated_query: Option<String>,
    pub query_result: Option<TableResult>,
    pub retrieved_chunks: Vec<ScoredChunk>,
    citations: Vec<String>,
    pub repair_count: u8,
    pub error: Option<String>,
    /// The error cleared by the most recent repair, kept visible so a
    /// re-invoked query generator can adapt.
    pub last_error: Option<String>,
    pub repair_outcome: Option<RepairOutcome>,
    pub final_answer: Option<serde_json::Value>,
}

impl RequestContext {
    pub fn new(question: impl Into<String>, format_hint: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            format_hint: format_hint.into(),
            route: Route::Unset,
            constraints: BTreeMap::new(),
            generated_query: None,
            query_result: None,
            retrieved_chunks: Vec::new(),
            citations: Vec::new(),
            repair_count: 0,
            error: None,
            last_error: None,
            repair_outcome: None,
            final_answer: None,
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Assign the route. Write-once: a second assignment is an orchestration
    /// defect, not a data error.
    pub fn assign_route(&mut self, route: Route) -> Result<()> {
        if self.route != Route::Unset {
            return Err(CopilotError::Orchestration(format!(
                "route already assigned to '{}', refusing reassignment to '{}'",
                self.route.as_str(),
                route.as_str()
            )));
        }
        self.route = route;
        Ok(())
    }

    /// Append a citation, preserving insertion order and skipping duplicates.
    pub fn cite(&mut self, source: impl Into<String>) {
        let source = source.into();
        if !self.citations.contains(&source) {
            self.citations.push(source);
        }
    }

    pub fn cite_all<I, S>(&mut self, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for source in sources {
            self.cite(source);
        }
    }

    pub fn citations(&self) -> &[String] {
        &self.citations
    }
}
