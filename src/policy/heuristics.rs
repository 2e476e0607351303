//! Default heuristic policies
//!
//! Keyword routing, calendar-aware constraint extraction, and template SQL
//! generation over the sales schema. These are the offline decision
//! procedures; each one is replaceable behind its trait.

use crate::context::{Route, ScoredChunk};
use crate::error::{CopilotError, Result};
use crate::policy::{ConstraintExtractor, Constraints, QueryGenerator, RouteClassifier};
use async_trait::async_trait;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;
use tracing::debug;

lazy_static! {
    static ref QUOTED_RE: Regex = Regex::new(r"'([^']+)'").unwrap();
    static ref ISO_DATE_RE: Regex = Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref YEAR_RE: Regex = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    static ref CATEGORY_RE: Regex = Regex::new(r"'([^']+)'\s+category").unwrap();
    static ref TOP_N_PRODUCTS_RE: Regex =
        Regex::new(r"top\s+(\d+)\s+products\s+by\s+(?:total\s+)?revenue").unwrap();
}

const DATA_KEYWORDS: [&str; 9] = [
    "revenue",
    "sold",
    "sales",
    "customer",
    "category",
    "aov",
    "margin",
    "quantity",
    "average order",
];

const DOC_KEYWORDS: [&str; 8] = [
    "policy",
    "return window",
    "kpi",
    "definition",
    "defined",
    "calendar",
    "docs",
    "guideline",
];

/// Keyword route classifier. Questions that need both document vocabulary
/// and structured data go hybrid; pure data questions go to the query path;
/// everything else, including the ambiguous cases, falls back to the
/// conservative docs route.
pub struct KeywordRouter;

#[async_trait]
impl RouteClassifier for KeywordRouter {
    async fn classify(&self, question: &str) -> Route {
        let lowered = question.to_lowercase();
        let wants_data = DATA_KEYWORDS.iter().any(|k| lowered.contains(k));
        let wants_docs = DOC_KEYWORDS.iter().any(|k| lowered.contains(k))
            || QUOTED_RE.is_match(question);

        match (wants_data, wants_docs) {
            (true, true) => Route::Hybrid,
            (true, false) => Route::Query,
            _ => Route::Docs,
        }
    }
}

const FUZZY_MATCH_THRESHOLD: f64 = 0.85;

/// Resolves named date ranges against retrieved calendar chunks and pulls a
/// KPI identifier from the question. The bridge between unstructured and
/// structured reasoning: a question like "during 'Summer Beverages 1997'"
/// only becomes a date filter because a document defines those dates.
pub struct CalendarConstraintExtractor;

#[async_trait]
impl ConstraintExtractor for CalendarConstraintExtractor {
    async fn extract(&self, question: &str, chunks: &[ScoredChunk]) -> Constraints {
        let mut constraints = Constraints::new();

        if let Some(kpi) = detect_kpi(question) {
            constraints.insert("kpi".to_string(), Some(kpi.to_string()));
        }

        let range = named_range_from_chunks(question, chunks)
            .or_else(|| year_range_from_question(question));
        if let Some((start, end)) = range {
            constraints.insert("start_date".to_string(), Some(start));
            constraints.insert("end_date".to_string(), Some(end));
            let category = CATEGORY_RE
                .captures(question)
                .map(|caps| caps[1].to_string());
            constraints.insert("category".to_string(), category);
        }

        constraints
    }
}

fn detect_kpi(question: &str) -> Option<&'static str> {
    let lowered = question.to_lowercase();
    if lowered.contains("average order value") || lowered.contains("aov") {
        Some("average_order_value")
    } else if lowered.contains("margin") {
        Some("gross_margin")
    } else if lowered.contains("quantity") || lowered.contains("units sold") {
        Some("quantity_sold")
    } else if lowered.contains("revenue") {
        Some("revenue")
    } else {
        None
    }
}

/// Find a quoted name in the question that some chunk defines with dates.
/// Longest names first so a campaign name wins over a category name nested
/// inside it. Exact containment first, then fuzzy line matching for chunks
/// that spell the name slightly differently.
fn named_range_from_chunks(question: &str, chunks: &[ScoredChunk]) -> Option<(String, String)> {
    let mut names: Vec<String> = QUOTED_RE
        .captures_iter(question)
        .map(|caps| caps[1].to_string())
        .collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));

    for name in &names {
        let lowered = name.to_lowercase();
        for chunk in chunks {
            let content_lowered = chunk.content.to_lowercase();
            let mentions = content_lowered.contains(&lowered)
                || chunk
                    .content
                    .lines()
                    .any(|line| jaro_winkler(&line.to_lowercase(), &lowered) > FUZZY_MATCH_THRESHOLD);
            if !mentions {
                continue;
            }
            if let Some(range) = date_range_from_text(&chunk.content) {
                debug!("Resolved '{}' to {:?} via {}", name, range, chunk.id);
                return Some(range);
            }
        }
    }
    None
}

/// All valid ISO dates in the text; the earliest and latest bound the range.
fn date_range_from_text(text: &str) -> Option<(String, String)> {
    let mut dates: Vec<NaiveDate> = ISO_DATE_RE
        .captures_iter(text)
        .filter_map(|caps| NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok())
        .collect();
    dates.sort();
    match (dates.first(), dates.last()) {
        (Some(start), Some(end)) if dates.len() >= 2 => Some((
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        )),
        _ => None,
    }
}

/// A bare year in the question ("in 1997") becomes a whole-year range.
fn year_range_from_question(question: &str) -> Option<(String, String)> {
    let year = YEAR_RE.captures(question)?[1].to_string();
    Some((format!("{}-01-01", year), format!("{}-12-31", year)))
}

/// Template SQL generator over the sales schema. Pure: no execution, no
/// side effects; the same inputs always produce the same query. The
/// heuristic itself is an implementation detail behind [`QueryGenerator`].
pub struct TemplateQueryGenerator;

#[async_trait]
impl QueryGenerator for TemplateQueryGenerator {
    async fn generate(
        &self,
        question: &str,
        _schema: &str,
        constraints: &Constraints,
        prior_error: Option<&str>,
    ) -> Result<String> {
        if let Some(error) = prior_error {
            debug!("Regenerating after error: {}", error);
        }

        let lowered = question.to_lowercase();
        if let Some(caps) = TOP_N_PRODUCTS_RE.captures(&lowered) {
            return Ok(top_products_by_revenue(&caps[1]));
        }

        let kpi = constraint(constraints, "kpi");
        if kpi.is_none() {
            // No recognizable analytical shape; mirror a bare probe query.
            return Ok("SELECT * FROM Orders LIMIT 1;".to_string());
        }

        let (start, end) = date_bounds(constraints)?;
        match kpi.unwrap() {
            "quantity_sold" => Ok(quantity_by_category(&start, &end)),
            "average_order_value" => Ok(average_order_value(&start, &end)),
            "gross_margin" => Ok(gross_margin_by_customer(&start, &end)),
            "revenue" => Ok(revenue_total(&start, &end, constraint(constraints, "category"))),
            other => Err(CopilotError::Generation(format!(
                "no query template for KPI '{}'",
                other
            ))),
        }
    }
}

fn constraint<'a>(constraints: &'a Constraints, key: &str) -> Option<&'a str> {
    constraints.get(key).and_then(|value| value.as_deref())
}

/// Both bounds must be present and valid ISO dates before they reach SQL.
fn date_bounds(constraints: &Constraints) -> Result<(String, String)> {
    let start = constraint(constraints, "start_date").ok_or_else(|| {
        CopilotError::Generation("KPI query requires a start_date constraint".to_string())
    })?;
    let end = constraint(constraints, "end_date").ok_or_else(|| {
        CopilotError::Generation("KPI query requires an end_date constraint".to_string())
    })?;
    for date in [start, end] {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            CopilotError::Generation(format!("invalid date constraint '{}'", date))
        })?;
    }
    Ok((start.to_string(), end.to_string()))
}

fn top_products_by_revenue(limit: &str) -> String {
    format!(
        r#"SELECT p.ProductName, SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS Revenue
FROM Products AS p
INNER JOIN "Order Details" AS od ON p.ProductID = od.ProductID
GROUP BY p.ProductName
ORDER BY Revenue DESC
LIMIT {};"#,
        limit
    )
}

fn quantity_by_category(start: &str, end: &str) -> String {
    format!(
        r#"SELECT c.CategoryName, SUM(od.Quantity) AS TotalQuantitySold
FROM Categories AS c
INNER JOIN Products AS p ON c.CategoryID = p.CategoryID
INNER JOIN "Order Details" AS od ON p.ProductID = od.ProductID
INNER JOIN Orders AS o ON od.OrderID = o.OrderID
WHERE o.OrderDate BETWEEN '{}' AND '{}'
GROUP BY c.CategoryName
ORDER BY TotalQuantitySold DESC
LIMIT 1;"#,
        start, end
    )
}

fn average_order_value(start: &str, end: &str) -> String {
    format!(
        r#"SELECT CAST(SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS REAL)
  / COUNT(DISTINCT o.OrderID) AS AOV
FROM Orders AS o
INNER JOIN "Order Details" AS od ON o.OrderID = od.OrderID
WHERE o.OrderDate BETWEEN '{}' AND '{}';"#,
        start, end
    )
}

// CostOfGoods approximated as 70% of UnitPrice, so margin per line is
// UnitPrice * Quantity * (0.3 - Discount).
fn gross_margin_by_customer(start: &str, end: &str) -> String {
    format!(
        r#"SELECT cu.CompanyName, SUM(od.UnitPrice * od.Quantity * (0.3 - od.Discount)) AS GrossMargin
FROM Customers AS cu
INNER JOIN Orders AS o ON cu.CustomerID = o.CustomerID
INNER JOIN "Order Details" AS od ON o.OrderID = od.OrderID
WHERE o.OrderDate BETWEEN '{}' AND '{}'
GROUP BY cu.CompanyName
ORDER BY GrossMargin DESC
LIMIT 1;"#,
        start, end
    )
}

fn revenue_total(start: &str, end: &str, category: Option<&str>) -> String {
    let category_filter = category
        .map(|name| format!("c.CategoryName = '{}' AND ", name.replace('\'', "''")))
        .unwrap_or_default();
    format!(
        r#"SELECT SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS TotalRevenue
FROM Categories AS c
INNER JOIN Products AS p ON c.CategoryID = p.CategoryID
INNER JOIN "Order Details" AS od ON p.ProductID = od.ProductID
INNER JOIN Orders AS o ON od.OrderID = o.OrderID
WHERE {}o.OrderDate BETWEEN '{}' AND '{}';"#,
        category_filter, start, end
    )
}
