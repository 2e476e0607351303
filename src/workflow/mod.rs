//! Request orchestration
//!
//! Wires the retriever, policies, store, and synthesizer into the stage
//! graph: Route -> {Retrieve -> [Synthesize | PlanConstraints -> Generate ->
//! Execute] | Generate -> Execute} -> {Repair -> Generate (bounded loop) |
//! Synthesize}.

pub mod engine;
pub mod repair;
pub mod stages;

pub use engine::{Next, Stage, StageId, Transition, WorkflowBuilder, WorkflowEngine};

use crate::error::Result;
use crate::policy::{ConstraintExtractor, QueryGenerator, RouteClassifier};
use crate::retrieval::DocumentIndex;
use crate::store::SqliteStore;
use stages::{
    ExecuteQueryStage, GenerateQueryStage, PlanConstraintsStage, RepairStage, RetrieveStage,
    RouteStage, SynthesizeStage,
};
use std::sync::Arc;

pub struct WorkflowComponents {
    pub classifier: Arc<dyn RouteClassifier>,
    pub extractor: Arc<dyn ConstraintExtractor>,
    pub generator: Arc<dyn QueryGenerator>,
    pub index: Arc<DocumentIndex>,
    pub store: Arc<SqliteStore>,
    /// Schema description rendered once at startup for the generator.
    pub schema: String,
    pub top_k: usize,
}

/// Build the request workflow. The transition table is validated
/// exhaustively; a construction-time defect surfaces here, not mid-batch.
pub fn build_workflow(components: WorkflowComponents) -> Result<WorkflowEngine> {
    WorkflowBuilder::new()
        .stage(
            StageId::Route,
            Box::new(RouteStage::new(components.classifier)),
        )
        .stage(
            StageId::Retrieve,
            Box::new(RetrieveStage::new(components.index, components.top_k)),
        )
        .stage(
            StageId::PlanConstraints,
            Box::new(PlanConstraintsStage::new(components.extractor)),
        )
        .stage(
            StageId::GenerateQuery,
            Box::new(GenerateQueryStage::new(
                components.generator,
                components.schema,
            )),
        )
        .stage(
            StageId::ExecuteQuery,
            Box::new(ExecuteQueryStage::new(components.store)),
        )
        .stage(StageId::Repair, Box::new(RepairStage))
        .stage(StageId::Synthesize, Box::new(SynthesizeStage))
        .entry(StageId::Route)
        .choose(
            StageId::Route,
            stages::decide_route,
            vec![
                ("docs", Next::Stage(StageId::Retrieve)),
                ("query", Next::Stage(StageId::GenerateQuery)),
                ("hybrid", Next::Stage(StageId::Retrieve)),
            ],
        )
        .choose(
            StageId::Retrieve,
            stages::decide_post_retrieve,
            vec![
                ("synthesize", Next::Stage(StageId::Synthesize)),
                ("constraints", Next::Stage(StageId::PlanConstraints)),
            ],
        )
        .always(StageId::PlanConstraints, Next::Stage(StageId::GenerateQuery))
        .always(StageId::GenerateQuery, Next::Stage(StageId::ExecuteQuery))
        .choose(
            StageId::ExecuteQuery,
            stages::decide_post_execute,
            vec![
                ("synthesize", Next::Stage(StageId::Synthesize)),
                ("repair", Next::Stage(StageId::Repair)),
            ],
        )
        .choose(
            StageId::Repair,
            stages::decide_post_repair,
            vec![
                ("synthesize", Next::Stage(StageId::Synthesize)),
                ("retry", Next::Stage(StageId::GenerateQuery)),
                ("exhausted", Next::End),
            ],
        )
        .always(StageId::Synthesize, Next::End)
        .build()
}
