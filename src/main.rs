use analytics_copilot::batch;
use analytics_copilot::llm::LlmClient;
use analytics_copilot::policy::heuristics::{CalendarConstraintExtractor, KeywordRouter};
use analytics_copilot::policy::llm_generator::LlmQueryGenerator;
use analytics_copilot::retrieval::DocumentIndex;
use analytics_copilot::store::SqliteStore;
use analytics_copilot::workflow::{self, WorkflowComponents};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "copilot")]
#[command(about = "Retail analytics copilot: hybrid document/SQL question answering")]
struct Args {
    /// Path to the JSONL file of batch questions
    #[arg(long)]
    batch: PathBuf,

    /// Path to the output JSONL file
    #[arg(long)]
    out: PathBuf,

    /// Directory of policy/KPI documents (default: ./docs)
    #[arg(long, default_value = "docs")]
    docs_dir: PathBuf,

    /// Path to the SQLite sales database (default: ./data/sales.sqlite)
    #[arg(long, default_value = "data/sales.sqlite")]
    db: PathBuf,

    /// Number of chunks to retrieve per question
    #[arg(long, default_value_t = 5)]
    top_k: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Startup failures (missing batch file, missing database) exit non-zero.
    let questions = batch::load_questions(&args.batch)?;
    info!("Loaded {} questions from {}", questions.len(), args.batch.display());

    // Indexing failures degrade to an empty corpus rather than aborting.
    let index = match DocumentIndex::build(&args.docs_dir) {
        Ok(index) => index,
        Err(e) => {
            warn!("Could not index {}: {}; continuing without documents", args.docs_dir.display(), e);
            DocumentIndex::from_chunks(Vec::new())
        }
    };

    let store = Arc::new(SqliteStore::open(&args.db)?);
    let schema = store.describe_schema()?;

    let engine = workflow::build_workflow(WorkflowComponents {
        classifier: Arc::new(KeywordRouter),
        extractor: Arc::new(CalendarConstraintExtractor),
        generator: Arc::new(LlmQueryGenerator::new(LlmClient::from_env())),
        index: Arc::new(index),
        store,
        schema,
        top_k: args.top_k,
    })?;

    let records = batch::run_batch(&engine, &questions).await;
    batch::write_records(&args.out, &records)?;
    info!("Wrote {} records to {}", records.len(), args.out.display());

    Ok(())
}
