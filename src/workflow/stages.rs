//! Workflow stages
//!
//! The concrete stage implementations wiring the retriever, policies, store,
//! and synthesizer into the graph, plus the conditional routing functions.
//! Data-level failures are absorbed into the context here; only
//! orchestration defects propagate as errors.

use crate::context::{RepairOutcome, RequestContext, Route};
use crate::error::Result;
use crate::policy::{ConstraintExtractor, QueryGenerator, RouteClassifier};
use crate::retrieval::DocumentIndex;
use crate::store::{tables, SqliteStore};
use crate::synthesis;
use crate::workflow::engine::Stage;
use crate::workflow::repair;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RouteStage {
    classifier: Arc<dyn RouteClassifier>,
}

impl RouteStage {
    pub fn new(classifier: Arc<dyn RouteClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage for RouteStage {
    fn name(&self) -> &'static str {
        "route"
    }

    async fn run(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        let route = self.classifier.classify(&ctx.question).await;
        info!("Route: {}", route.as_str());
        ctx.assign_route(route)?;
        Ok(ctx)
    }
}

pub struct RetrieveStage {
    index: Arc<DocumentIndex>,
    top_k: usize,
}

impl RetrieveStage {
    pub fn new(index: Arc<DocumentIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }
}

#[async_trait]
impl Stage for RetrieveStage {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        let chunks = self.index.retrieve(&ctx.question, self.top_k);
        info!("Retrieved {} chunks", chunks.len());
        ctx.cite_all(chunks.iter().map(|chunk| chunk.id.clone()));
        ctx.retrieved_chunks = chunks;
        Ok(ctx)
    }
}

pub struct PlanConstraintsStage {
    extractor: Arc<dyn ConstraintExtractor>,
}

impl PlanConstraintsStage {
    pub fn new(extractor: Arc<dyn ConstraintExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Stage for PlanConstraintsStage {
    fn name(&self) -> &'static str {
        "plan_constraints"
    }

    async fn run(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        ctx.constraints = self
            .extractor
            .extract(&ctx.question, &ctx.retrieved_chunks)
            .await;
        info!("Extracted {} constraints", ctx.constraints.len());
        Ok(ctx)
    }
}

pub struct GenerateQueryStage {
    generator: Arc<dyn QueryGenerator>,
    schema: String,
}

impl GenerateQueryStage {
    pub fn new(generator: Arc<dyn QueryGenerator>, schema: String) -> Self {
        Self { generator, schema }
    }
}

#[async_trait]
impl Stage for GenerateQueryStage {
    fn name(&self) -> &'static str {
        "generate_query"
    }

    async fn run(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        let generated = self
            .generator
            .generate(
                &ctx.question,
                &self.schema,
                &ctx.constraints,
                ctx.last_error.as_deref(),
            )
            .await;
        match generated {
            Ok(sql) => {
                ctx.generated_query = Some(sql);
            }
            Err(e) => {
                warn!("Query generation failed: {}", e);
                ctx.error = Some(e.to_string());
            }
        }
        Ok(ctx)
    }
}

pub struct ExecuteQueryStage {
    store: Arc<SqliteStore>,
}

impl ExecuteQueryStage {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for ExecuteQueryStage {
    fn name(&self) -> &'static str {
        "execute_query"
    }

    async fn run(&self, mut ctx: RequestContext) -> Result<RequestContext> {
        // Generation already failed; let the repair conditional see it.
        if ctx.error.is_some() {
            return Ok(ctx);
        }
        let sql = match &ctx.generated_query {
            Some(sql) => sql.clone(),
            None => {
                ctx.error = Some("no query was generated".to_string());
                return Ok(ctx);
            }
        };

        let result = self.store.run(&sql);
        if let Some(error) = &result.error {
            warn!("Query execution failed: {}", error);
            ctx.error = Some(error.clone());
        } else {
            match self.store.table_names() {
                Ok(known) => ctx.cite_all(tables::referenced_tables(&sql, &known)),
                Err(e) => warn!("Could not list store tables for citations: {}", e),
            }
        }
        ctx.query_result = Some(result);
        Ok(ctx)
    }
}

pub struct RepairStage;

#[async_trait]
impl Stage for RepairStage {
    fn name(&self) -> &'static str {
        "repair"
    }

    async fn run(&self, ctx: RequestContext) -> Result<RequestContext> {
        Ok(repair::apply(ctx))
    }
}

pub struct SynthesizeStage;

#[async_trait]
impl Stage for SynthesizeStage {
    fn name(&self) -> &'static str {
        "synthesize"
    }

    async fn run(&self, ctx: RequestContext) -> Result<RequestContext> {
        Ok(synthesis::synthesize(ctx))
    }
}

pub(crate) fn decide_route(ctx: &RequestContext) -> &'static str {
    // Route::Unset has no mapped edge; reaching it here is a defect the
    // engine reports as an orchestration fault.
    ctx.route().as_str()
}

pub(crate) fn decide_post_retrieve(ctx: &RequestContext) -> &'static str {
    match ctx.route() {
        Route::Docs => "synthesize",
        Route::Hybrid => "constraints",
        other => other.as_str(),
    }
}

pub(crate) fn decide_post_execute(ctx: &RequestContext) -> &'static str {
    if ctx.error.is_some() {
        "repair"
    } else {
        "synthesize"
    }
}

pub(crate) fn decide_post_repair(ctx: &RequestContext) -> &'static str {
    match ctx.repair_outcome {
        Some(RepairOutcome::Proceed) => "synthesize",
        Some(RepairOutcome::Retry) => "retry",
        Some(RepairOutcome::GiveUp) => "exhausted",
        None => "undecided",
    }
}
