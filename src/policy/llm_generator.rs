//! LLM-backed query generator
//!
//! Prompts a chat model with the schema, constraints, and any prior error.
//! Falls back to the template generator when offline or when the model
//! returns something unusable.

use crate::error::Result;
use crate::llm::LlmClient;
use crate::policy::heuristics::TemplateQueryGenerator;
use crate::policy::{Constraints, QueryGenerator};
use async_trait::async_trait;
use tracing::warn;

pub struct LlmQueryGenerator {
    client: LlmClient,
    fallback: TemplateQueryGenerator,
}

impl LlmQueryGenerator {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            fallback: TemplateQueryGenerator,
        }
    }
}

#[async_trait]
impl QueryGenerator for LlmQueryGenerator {
    async fn generate(
        &self,
        question: &str,
        schema: &str,
        constraints: &Constraints,
        prior_error: Option<&str>,
    ) -> Result<String> {
        if self.client.offline() {
            return self
                .fallback
                .generate(question, schema, constraints, prior_error)
                .await;
        }

        let prompt = build_prompt(question, schema, constraints, prior_error);
        match self
            .client
            .chat(
                "You are a SQL generator for a SQLite sales database. \
                 Return a single read-only SELECT statement and nothing else.",
                &prompt,
            )
            .await
        {
            Ok(response) => {
                let sql = strip_fences(&response);
                if sql.to_uppercase().starts_with("SELECT") {
                    Ok(sql)
                } else {
                    warn!("LLM returned non-SELECT output, using template fallback");
                    self.fallback
                        .generate(question, schema, constraints, prior_error)
                        .await
                }
            }
            Err(e) => {
                warn!("LLM generation failed ({}), using template fallback", e);
                self.fallback
                    .generate(question, schema, constraints, prior_error)
                    .await
            }
        }
    }
}

fn build_prompt(
    question: &str,
    schema: &str,
    constraints: &Constraints,
    prior_error: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    parts.push(format!("USER QUESTION: {}", question));
    parts.push(format!("\nSCHEMA:\n{}", schema));

    if !constraints.is_empty() {
        parts.push("\nEXTRACTED CONSTRAINTS:".to_string());
        for (key, value) in constraints {
            parts.push(format!("- {}: {}", key, value.as_deref().unwrap_or("null")));
        }
    }

    if let Some(error) = prior_error {
        parts.push(format!(
            "\nThe previous query failed with: {}\nGenerate a corrected query.",
            error
        ));
    }

    parts.join("\n")
}

fn strip_fences(response: &str) -> String {
    response
        .trim()
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}
