use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Query generation error: {0}")]
    Generation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Orchestration fault: {0}")]
    Orchestration(String),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CopilotError>;
