use crate::error::{CopilotError, Result};

const DUMMY_API_KEY: &str = "dummy-api-key";

/// Thin chat-completion client. Policies that want an LLM wrap this; when no
/// real key is configured the client reports itself offline and callers fall
/// back to their heuristic paths.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
        }
    }

    pub fn from_env() -> Self {
        let api_key =
            std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| DUMMY_API_KEY.to_string());
        let mut client = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            client.base_url = base_url;
        }
        client
    }

    pub fn offline(&self) -> bool {
        self.api_key == DUMMY_API_KEY || self.api_key.is_empty()
    }

    pub async fn chat(&self, system: &str, prompt: &str) -> Result<String> {
        if self.offline() {
            return Err(CopilotError::Llm("no API key configured".to_string()));
        }

        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CopilotError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CopilotError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}
