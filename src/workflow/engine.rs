//! Workflow Engine
//!
//! A directed graph of named stages over the request context. Stages take
//! the context by value and return the next value, so mutations become
//! visible only when a stage completes. Transitions form a closed table
//! validated at construction; a conditional key with no matching edge is an
//! orchestration fault, never a silent fallthrough.

use crate::context::RequestContext;
use crate::error::{CopilotError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Hard cap on stage invocations per request. The repair loop is the only
/// cycle and is bounded, so a run that hits this cap is a defect.
const MAX_STEPS: usize = 32;

const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// The closed set of workflow stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Route,
    Retrieve,
    PlanConstraints,
    GenerateQuery,
    ExecuteQuery,
    Repair,
    Synthesize,
}

impl StageId {
    pub fn name(&self) -> &'static str {
        match self {
            StageId::Route => "route",
            StageId::Retrieve => "retrieve",
            StageId::PlanConstraints => "plan_constraints",
            StageId::GenerateQuery => "generate_query",
            StageId::ExecuteQuery => "execute_query",
            StageId::Repair => "repair",
            StageId::Synthesize => "synthesize",
        }
    }
}

/// Where an edge leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stage(StageId),
    End,
}

/// Outgoing edges of a stage. Conditional transitions evaluate a routing
/// function over the context and look the returned key up in an enumerated
/// edge table.
pub enum Transition {
    Always(Next),
    Choose {
        decide: fn(&RequestContext) -> &'static str,
        edges: Vec<(&'static str, Next)>,
    },
}

/// A single workflow stage: a transformation of the request context.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: RequestContext) -> Result<RequestContext>;
}

pub struct WorkflowBuilder {
    stages: HashMap<StageId, Box<dyn Stage>>,
    transitions: HashMap<StageId, Transition>,
    entry: Option<StageId>,
    stage_timeout: Duration,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
            transitions: HashMap::new(),
            entry: None,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn stage(mut self, id: StageId, stage: Box<dyn Stage>) -> Self {
        self.stages.insert(id, stage);
        self
    }

    pub fn always(mut self, from: StageId, to: Next) -> Self {
        self.transitions.insert(from, Transition::Always(to));
        self
    }

    pub fn choose(
        mut self,
        from: StageId,
        decide: fn(&RequestContext) -> &'static str,
        edges: Vec<(&'static str, Next)>,
    ) -> Self {
        self.transitions
            .insert(from, Transition::Choose { decide, edges });
        self
    }

    pub fn entry(mut self, entry: StageId) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Validate the transition table exhaustively: the entry stage exists,
    /// every registered stage has outgoing edges, and every edge targets a
    /// registered stage. Defects surface here, not mid-request.
    pub fn build(self) -> Result<WorkflowEngine> {
        let entry = self.entry.ok_or_else(|| {
            CopilotError::Orchestration("workflow has no entry stage".to_string())
        })?;
        if !self.stages.contains_key(&entry) {
            return Err(CopilotError::Orchestration(format!(
                "entry stage '{}' is not registered",
                entry.name()
            )));
        }
        for id in self.stages.keys() {
            if !self.transitions.contains_key(id) {
                return Err(CopilotError::Orchestration(format!(
                    "stage '{}' has no outgoing transition",
                    id.name()
                )));
            }
        }
        for (from, transition) in &self.transitions {
            if !self.stages.contains_key(from) {
                return Err(CopilotError::Orchestration(format!(
                    "transition from unregistered stage '{}'",
                    from.name()
                )));
            }
            let targets: Vec<Next> = match transition {
                Transition::Always(next) => vec![*next],
                Transition::Choose { edges, .. } => {
                    edges.iter().map(|(_, next)| *next).collect()
                }
            };
            for target in targets {
                if let Next::Stage(id) = target {
                    if !self.stages.contains_key(&id) {
                        return Err(CopilotError::Orchestration(format!(
                            "edge from '{}' targets unregistered stage '{}'",
                            from.name(),
                            id.name()
                        )));
                    }
                }
            }
        }
        Ok(WorkflowEngine {
            stages: self.stages,
            transitions: self.transitions,
            entry,
            stage_timeout: self.stage_timeout,
        })
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkflowEngine {
    stages: HashMap<StageId, Box<dyn Stage>>,
    transitions: HashMap<StageId, Transition>,
    entry: StageId,
    stage_timeout: Duration,
}

impl WorkflowEngine {
    /// Run one request from the entry stage to the first terminal node.
    /// Data-level failures are absorbed into the context by the stages; only
    /// orchestration faults escape as errors.
    pub async fn run(&self, ctx: RequestContext) -> Result<RequestContext> {
        let mut current = self.entry;
        let mut ctx = ctx;

        for _ in 0..MAX_STEPS {
            let stage = self.stages.get(&current).ok_or_else(|| {
                CopilotError::Orchestration(format!("stage '{}' is not registered", current.name()))
            })?;

            debug!("Running stage '{}'", stage.name());
            // Snapshot so a timed-out stage leaves a usable context behind.
            let snapshot = ctx.clone();
            ctx = match tokio::time::timeout(self.stage_timeout, stage.run(ctx)).await {
                Ok(result) => result?,
                Err(_) => {
                    let mut restored = snapshot;
                    restored.error = Some(format!(
                        "stage '{}' timed out after {:?}",
                        stage.name(),
                        self.stage_timeout
                    ));
                    restored
                }
            };

            let transition = self.transitions.get(&current).ok_or_else(|| {
                CopilotError::Orchestration(format!(
                    "stage '{}' has no outgoing transition",
                    current.name()
                ))
            })?;
            let next = match transition {
                Transition::Always(next) => *next,
                Transition::Choose { decide, edges } => {
                    let key = decide(&ctx);
                    edges
                        .iter()
                        .find(|(edge, _)| *edge == key)
                        .map(|(_, next)| *next)
                        .ok_or_else(|| {
                            CopilotError::Orchestration(format!(
                                "conditional after '{}' produced unmapped key '{}'",
                                current.name(),
                                key
                            ))
                        })?
                }
            };

            match next {
                Next::Stage(id) => current = id,
                Next::End => {
                    if ctx.final_answer.is_none() {
                        return Err(CopilotError::Orchestration(
                            "workflow terminated without a final answer".to_string(),
                        ));
                    }
                    return Ok(ctx);
                }
            }
        }

        Err(CopilotError::Orchestration(format!(
            "workflow exceeded {} stage invocations",
            MAX_STEPS
        )))
    }
}
