//! Repair Controller
//!
//! Bounded retry state machine over `(error, repair_count)`. This is the
//! only cycle in the workflow graph; the ceiling guarantees the engine
//! passes through query generation at most `REPAIR_CEILING + 1` times.

use crate::context::{RepairOutcome, RequestContext};
use tracing::{info, warn};

/// Maximum number of repair attempts before the workflow gives up.
pub const REPAIR_CEILING: u8 = 2;

pub fn exhausted_answer(last_error: &str) -> String {
    format!(
        "Error: could not resolve the question after {} repair attempts. Last error: {}",
        REPAIR_CEILING, last_error
    )
}

/// Apply the repair decision to the context. The outcome is recorded in the
/// context so the conditional edge after this stage reads explicit state.
pub fn apply(mut ctx: RequestContext) -> RequestContext {
    let outcome = match ctx.error.take() {
        None => RepairOutcome::Proceed,
        Some(error) if ctx.repair_count < REPAIR_CEILING => {
            ctx.repair_count += 1;
            info!(
                "Repair attempt {}/{} after error: {}",
                ctx.repair_count, REPAIR_CEILING, error
            );
            ctx.last_error = Some(error);
            RepairOutcome::Retry
        }
        Some(error) => {
            warn!("Repair budget exhausted: {}", error);
            ctx.final_answer = Some(serde_json::Value::String(exhausted_answer(&error)));
            ctx.last_error = Some(error);
            RepairOutcome::GiveUp
        }
    };
    ctx.repair_outcome = Some(outcome);
    ctx
}
