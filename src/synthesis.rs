//! Answer Synthesizer
//!
//! Merges query results and/or retrieved text into the final answer,
//! shaping it to the batch record's format hint where one applies.

use crate::context::{RequestContext, TableResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::info;

lazy_static! {
    // Keys of an object-shaped format hint like "{category:str, quantity:int}".
    static ref HINT_KEY_RE: Regex = Regex::new(r"(\w+)\s*:").unwrap();
}

pub fn synthesize(mut ctx: RequestContext) -> RequestContext {
    let answer = match &ctx.query_result {
        Some(result) => match &result.error {
            // The repair controller should have consumed this; answer
            // explicitly rather than pretending the query worked.
            Some(error) => json!(format!("Error: the structured query failed: {}", error)),
            None => compose_table_answer(result, &ctx.format_hint),
        },
        None => compose_docs_answer(&ctx),
    };
    info!("Synthesized answer for route '{}'", ctx.route().as_str());
    ctx.final_answer = Some(answer);
    ctx
}

fn compose_docs_answer(ctx: &RequestContext) -> Value {
    match ctx.retrieved_chunks.first() {
        Some(best) => json!(best.content),
        None => json!("No supporting documents were found for this question."),
    }
}

fn compose_table_answer(result: &TableResult, format_hint: &str) -> Value {
    if result.rows.is_empty() {
        return json!("No rows matched the query.");
    }

    // Single cell collapses to the bare value.
    if result.rows.len() == 1 && result.columns.len() == 1 {
        return coerce_scalar(result.rows[0][0].clone(), format_hint);
    }

    if format_hint.trim_start().starts_with('{') {
        if let Some(object) = object_from_hint(result, format_hint) {
            return object;
        }
    }

    Value::Array(result.rows.iter().map(|row| row_object(result, row)).collect())
}

/// Zip the hint's keys with the first row positionally, e.g.
/// "{category:str, quantity:int}" against (CategoryName, TotalQuantitySold).
fn object_from_hint(result: &TableResult, format_hint: &str) -> Option<Value> {
    let keys: Vec<String> = HINT_KEY_RE
        .captures_iter(format_hint)
        .map(|caps| caps[1].to_string())
        .collect();
    let row = result.rows.first()?;
    if keys.is_empty() || keys.len() != row.len() {
        return None;
    }
    let mut object = serde_json::Map::new();
    for (key, value) in keys.into_iter().zip(row.iter()) {
        object.insert(key, value.clone());
    }
    Some(Value::Object(object))
}

fn row_object(result: &TableResult, row: &[Value]) -> Value {
    let mut object = serde_json::Map::new();
    for (column, value) in result.columns.iter().zip(row.iter()) {
        object.insert(column.clone(), value.clone());
    }
    Value::Object(object)
}

fn coerce_scalar(value: Value, format_hint: &str) -> Value {
    let hint = format_hint.to_lowercase();
    if hint.contains("float") {
        if let Some(number) = value.as_f64() {
            let rounded = (number * 100.0).round() / 100.0;
            return serde_json::Number::from_f64(rounded)
                .map(Value::Number)
                .unwrap_or(value);
        }
    } else if hint.contains("int") {
        if let Some(number) = value.as_f64() {
            return json!(number.round() as i64);
        }
    }
    value
}
