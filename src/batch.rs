//! Batch processing
//!
//! Newline-delimited JSON in, newline-delimited JSON out. Every input
//! record yields exactly one output record, in input order; a request whose
//! workflow faults still produces a record with the fault in its
//! explanation rather than a missing line.

use crate::context::{RepairOutcome, RequestContext, Route};
use crate::error::{CopilotError, Result};
use crate::workflow::WorkflowEngine;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub format_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    pub final_answer: serde_json::Value,
    pub sql: String,
    pub confidence: f64,
    pub explanation: String,
    pub citations: Vec<String>,
}

pub fn load_questions(path: &Path) -> Result<Vec<BatchQuestion>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CopilotError::Batch(format!("cannot read {}: {}", path.display(), e)))?;
    let mut questions = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let question: BatchQuestion = serde_json::from_str(line).map_err(|e| {
            CopilotError::Batch(format!(
                "malformed record on line {} of {}: {}",
                number + 1,
                path.display(),
                e
            ))
        })?;
        questions.push(question);
    }
    Ok(questions)
}

pub fn write_records(path: &Path, records: &[BatchRecord]) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    for record in records {
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Process questions strictly in input order. Requests are independent; the
/// only shared state is the immutable index and the read-only store inside
/// the engine's stages.
pub async fn run_batch(
    engine: &WorkflowEngine,
    questions: &[BatchQuestion],
) -> Vec<BatchRecord> {
    let mut records = Vec::with_capacity(questions.len());
    for question in questions {
        info!("Processing question '{}'", question.id);
        let ctx = RequestContext::new(&question.question, &question.format_hint);
        let record = match engine.run(ctx).await {
            Ok(ctx) => record_from_context(&question.id, &ctx),
            Err(e) => {
                error!("Workflow fault for '{}': {}", question.id, e);
                fault_record(&question.id, &e)
            }
        };
        records.push(record);
    }
    records
}

fn record_from_context(id: &str, ctx: &RequestContext) -> BatchRecord {
    let exhausted = ctx.repair_outcome == Some(RepairOutcome::GiveUp);
    let confidence = if exhausted {
        0.0
    } else {
        match ctx.route() {
            Route::Query | Route::Hybrid => {
                (0.9 - 0.15 * f64::from(ctx.repair_count)).max(0.3)
            }
            Route::Docs => {
                if ctx.retrieved_chunks.is_empty() {
                    0.2
                } else {
                    0.6
                }
            }
            Route::Unset => 0.0,
        }
    };

    let mut explanation = format!(
        "route={}; retrieved {} chunks; {} repair attempt(s)",
        ctx.route().as_str(),
        ctx.retrieved_chunks.len(),
        ctx.repair_count
    );
    if exhausted {
        explanation.push_str("; gave up after exhausting the repair budget");
    }

    BatchRecord {
        id: id.to_string(),
        final_answer: ctx
            .final_answer
            .clone()
            .unwrap_or(serde_json::Value::Null),
        sql: ctx.generated_query.clone().unwrap_or_default(),
        confidence,
        explanation,
        citations: ctx.citations().to_vec(),
    }
}

fn fault_record(id: &str, fault: &CopilotError) -> BatchRecord {
    BatchRecord {
        id: id.to_string(),
        final_answer: serde_json::Value::String(format!("ERROR: {}", fault)),
        sql: String::new(),
        confidence: 0.0,
        explanation: "workflow orchestration fault".to_string(),
        citations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_questions_skips_blank_lines() {
        let path = std::env::temp_dir().join("copilot_batch_load.jsonl");
        std::fs::write(
            &path,
            "{\"id\": \"q1\", \"question\": \"one\", \"format_hint\": \"str\"}\n\n\
             {\"id\": \"q2\", \"question\": \"two\", \"format_hint\": \"int\"}\n",
        )
        .unwrap();
        let questions = load_questions(&path).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].id, "q1");
        assert_eq!(questions[1].format_hint, "int");
    }

    #[test]
    fn test_load_questions_reports_malformed_line() {
        let path = std::env::temp_dir().join("copilot_batch_malformed.jsonl");
        std::fs::write(&path, "{\"id\": \"q1\"\n").unwrap();
        let result = load_questions(&path);
        assert!(matches!(result, Err(CopilotError::Batch(_))));
    }

    #[test]
    fn test_write_records_one_line_per_record() {
        let path = std::env::temp_dir().join("copilot_batch_write.jsonl");
        let records = vec![
            BatchRecord {
                id: "q1".to_string(),
                final_answer: serde_json::json!(42),
                sql: String::new(),
                confidence: 0.6,
                explanation: "route=docs".to_string(),
                citations: vec!["kpi::chunk0".to_string()],
            },
            BatchRecord {
                id: "q2".to_string(),
                final_answer: serde_json::json!("answer"),
                sql: "SELECT 1;".to_string(),
                confidence: 0.9,
                explanation: "route=query".to_string(),
                citations: Vec::new(),
            },
        ];
        write_records(&path, &records).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: BatchRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.id, "q1");
    }
}
