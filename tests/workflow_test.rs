use analytics_copilot::batch::{self, BatchQuestion};
use analytics_copilot::context::{RepairOutcome, RequestContext, Route};
use analytics_copilot::error::Result;
use analytics_copilot::policy::heuristics::{
    CalendarConstraintExtractor, KeywordRouter, TemplateQueryGenerator,
};
use analytics_copilot::policy::{Constraints, QueryGenerator};
use analytics_copilot::retrieval::DocumentIndex;
use analytics_copilot::store::SqliteStore;
use analytics_copilot::workflow::{self, WorkflowComponents, WorkflowEngine};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("copilot_it_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_docs(dir: &Path) {
    std::fs::write(
        dir.join("returns_policy.md"),
        "# Returns Policy\n\n\
         The return window for unopened Beverages is 30 days from the date of purchase.\n\n\
         Opened items are not eligible for return unless defective.\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("marketing_calendar.md"),
        "# Marketing Calendar\n\n\
         Summer Beverages 1997 campaign runs from 1997-07-01 to 1997-09-30 across all regions.\n\n\
         Winter Classics 1997 runs from 1997-12-01 to 1997-12-31.\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("kpi_definitions.md"),
        "# KPI Definitions\n\n\
         Average Order Value (AOV) is total revenue divided by the number of distinct orders.\n\n\
         Gross margin is revenue minus cost of goods; CostOfGoods is approximated as 70% of UnitPrice.\n",
    )
    .unwrap();
}

fn create_sales_db(path: &Path) {
    let connection = Connection::open(path).unwrap();
    connection
        .execute_batch(
            r#"
            CREATE TABLE Categories (CategoryID INTEGER PRIMARY KEY, CategoryName TEXT);
            CREATE TABLE Products (
                ProductID INTEGER PRIMARY KEY,
                ProductName TEXT,
                CategoryID INTEGER,
                UnitPrice REAL
            );
            CREATE TABLE Customers (CustomerID TEXT PRIMARY KEY, CompanyName TEXT);
            CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustomerID TEXT, OrderDate TEXT);
            CREATE TABLE "Order Details" (
                OrderID INTEGER,
                ProductID INTEGER,
                UnitPrice REAL,
                Quantity INTEGER,
                Discount REAL
            );

            INSERT INTO Categories VALUES (1, 'Beverages'), (2, 'Condiments');
            INSERT INTO Products VALUES
                (1, 'Chai', 1, 18.0),
                (2, 'Chang', 1, 19.0),
                (3, 'Aniseed Syrup', 2, 10.0),
                (4, 'Tofu', 2, 23.25);
            INSERT INTO Customers VALUES
                ('ALFKI', 'Alfreds Futterkiste'),
                ('ANATR', 'Ana Trujillo');
            INSERT INTO Orders VALUES
                (10248, 'ALFKI', '1997-07-04'),
                (10249, 'ANATR', '1997-08-16'),
                (10250, 'ALFKI', '1997-12-08'),
                (10251, 'ANATR', '1998-01-10');
            INSERT INTO "Order Details" VALUES
                (10248, 1, 18.0, 10, 0.0),
                (10248, 3, 10.0, 5, 0.0),
                (10249, 2, 19.0, 20, 0.0),
                (10250, 4, 23.25, 8, 0.0),
                (10251, 1, 18.0, 2, 0.0);
            "#,
        )
        .unwrap();
}

fn build_engine(dir: &Path, generator: Arc<dyn QueryGenerator>) -> WorkflowEngine {
    let docs_dir = dir.join("docs");
    std::fs::create_dir_all(&docs_dir).unwrap();
    write_docs(&docs_dir);
    let db_path = dir.join("sales.sqlite");
    create_sales_db(&db_path);

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let schema = store.describe_schema().unwrap();
    workflow::build_workflow(WorkflowComponents {
        classifier: Arc::new(KeywordRouter),
        extractor: Arc::new(CalendarConstraintExtractor),
        generator,
        index: Arc::new(DocumentIndex::build(&docs_dir).unwrap()),
        store,
        schema,
        top_k: 5,
    })
    .unwrap()
}

/// Fails with a missing table on the first attempt, then produces a valid
/// query, exercising one pass through the repair loop.
struct FlakyGenerator {
    attempts: AtomicUsize,
}

#[async_trait]
impl QueryGenerator for FlakyGenerator {
    async fn generate(
        &self,
        _question: &str,
        _schema: &str,
        _constraints: &Constraints,
        _prior_error: Option<&str>,
    ) -> Result<String> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok("SELECT * FROM missing_table;".to_string())
        } else {
            Ok("SELECT ProductName FROM Products ORDER BY ProductID LIMIT 1;".to_string())
        }
    }
}

struct BrokenGenerator {
    attempts: AtomicUsize,
}

#[async_trait]
impl QueryGenerator for BrokenGenerator {
    async fn generate(
        &self,
        _question: &str,
        _schema: &str,
        _constraints: &Constraints,
        _prior_error: Option<&str>,
    ) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok("SELECT * FROM missing_table;".to_string())
    }
}

#[tokio::test]
async fn test_docs_only_question_cites_chunks_without_sql() {
    let dir = fixture_dir("docs_only");
    let engine = build_engine(&dir, Arc::new(TemplateQueryGenerator));

    let ctx = engine
        .run(RequestContext::new(
            "What is the return window for unopened Beverages?",
            "str",
        ))
        .await
        .unwrap();

    assert_eq!(ctx.route(), Route::Docs);
    assert!(ctx.generated_query.is_none());
    assert!(!ctx.citations().is_empty());
    assert!(ctx.citations().iter().all(|c| c.contains("::chunk")));
    let answer = ctx.final_answer.unwrap();
    assert!(answer.as_str().unwrap().contains("30 days"));
}

#[tokio::test]
async fn test_query_route_returns_three_ranked_rows() {
    let dir = fixture_dir("query_route");
    let engine = build_engine(&dir, Arc::new(TemplateQueryGenerator));

    let ctx = engine
        .run(RequestContext::new(
            "Top 3 products by total revenue all-time",
            "list",
        ))
        .await
        .unwrap();

    assert_eq!(ctx.route(), Route::Query);
    assert!(ctx.retrieved_chunks.is_empty());
    assert_eq!(
        ctx.citations(),
        &["Products".to_string(), "Order Details".to_string()]
    );

    let rows = ctx.final_answer.unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["ProductName"], serde_json::json!("Chang"));
    assert_eq!(rows[1]["ProductName"], serde_json::json!("Chai"));
}

#[tokio::test]
async fn test_hybrid_question_uses_document_defined_bounds() {
    let dir = fixture_dir("hybrid");
    let engine = build_engine(&dir, Arc::new(TemplateQueryGenerator));

    let ctx = engine
        .run(RequestContext::new(
            "During 'Summer Beverages 1997' as defined in the marketing calendar, \
             which product category had the highest total quantity sold?",
            "{category:str, quantity:int}",
        ))
        .await
        .unwrap();

    assert_eq!(ctx.route(), Route::Hybrid);
    assert_eq!(
        ctx.constraints.get("start_date"),
        Some(&Some("1997-07-01".to_string()))
    );
    assert_eq!(
        ctx.constraints.get("end_date"),
        Some(&Some("1997-09-30".to_string()))
    );

    let sql = ctx.generated_query.as_deref().unwrap();
    assert!(sql.contains("BETWEEN '1997-07-01' AND '1997-09-30'"));
    assert_eq!(ctx.repair_count, 0);

    assert_eq!(
        ctx.final_answer,
        Some(serde_json::json!({"category": "Beverages", "quantity": 30}))
    );

    // Citations span both worlds: document chunks and store tables.
    assert!(ctx.citations().iter().any(|c| c.contains("::chunk")));
    assert!(ctx.citations().iter().any(|c| c == "Orders"));
}

#[tokio::test]
async fn test_executor_error_then_success_repairs_once() {
    let dir = fixture_dir("repair_once");
    let engine = build_engine(
        &dir,
        Arc::new(FlakyGenerator {
            attempts: AtomicUsize::new(0),
        }),
    );

    let ctx = engine
        .run(RequestContext::new("total revenue", "str"))
        .await
        .unwrap();

    assert_eq!(ctx.repair_count, 1);
    assert!(ctx.error.is_none());
    assert_eq!(ctx.final_answer, Some(serde_json::json!("Chai")));
}

#[tokio::test]
async fn test_exhausted_repairs_yield_terminal_answer() {
    let dir = fixture_dir("exhausted");
    let generator = Arc::new(BrokenGenerator {
        attempts: AtomicUsize::new(0),
    });
    let engine = build_engine(&dir, generator.clone());

    let ctx = engine
        .run(RequestContext::new("total revenue", "str"))
        .await
        .unwrap();

    assert_eq!(ctx.repair_count, 2);
    assert_eq!(ctx.repair_outcome, Some(RepairOutcome::GiveUp));
    let answer = ctx.final_answer.unwrap();
    assert!(answer.as_str().unwrap().contains("repair attempts"));
    // Ceiling of 2 means at most three generation passes.
    assert_eq!(generator.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_batch_emits_one_record_per_question_in_order() {
    let dir = fixture_dir("batch_order");
    let engine = build_engine(&dir, Arc::new(TemplateQueryGenerator));

    let questions = vec![
        BatchQuestion {
            id: "q_docs".to_string(),
            question: "What is the return window for unopened Beverages?".to_string(),
            format_hint: "str".to_string(),
        },
        BatchQuestion {
            id: "q_sql".to_string(),
            question: "Top 3 products by total revenue all-time".to_string(),
            format_hint: "list".to_string(),
        },
        BatchQuestion {
            id: "q_hybrid".to_string(),
            question: "During 'Summer Beverages 1997' as defined in the marketing calendar, \
                       which product category had the highest total quantity sold?"
                .to_string(),
            format_hint: "{category:str, quantity:int}".to_string(),
        },
    ];

    let records = batch::run_batch(&engine, &questions).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, "q_docs");
    assert_eq!(records[1].id, "q_sql");
    assert_eq!(records[2].id, "q_hybrid");

    // Docs-only record carries chunk citations and no SQL.
    assert!(records[0].sql.is_empty());
    assert!(!records[0].citations.is_empty());
    // Query record cites tables only.
    assert!(records[1].citations.iter().all(|c| !c.contains("::chunk")));
    assert!(!records[1].sql.is_empty());
}

#[tokio::test]
async fn test_batch_round_trip_through_files() {
    let dir = fixture_dir("batch_files");
    let engine = build_engine(&dir, Arc::new(TemplateQueryGenerator));

    let batch_path = dir.join("questions.jsonl");
    std::fs::write(
        &batch_path,
        "{\"id\": \"b1\", \"question\": \"Top 3 products by total revenue all-time\", \"format_hint\": \"list\"}\n\
         {\"id\": \"b2\", \"question\": \"What is the return window for unopened Beverages?\", \"format_hint\": \"str\"}\n",
    )
    .unwrap();

    let questions = batch::load_questions(&batch_path).unwrap();
    let records = batch::run_batch(&engine, &questions).await;
    let out_path = dir.join("answers.jsonl");
    batch::write_records(&out_path, &records).unwrap();

    let written = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["id"], serde_json::json!("b1"));
    assert!(first["confidence"].as_f64().unwrap() > 0.0);
}
