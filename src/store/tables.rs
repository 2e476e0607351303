//! Referenced-table extraction
//!
//! Parses generated SQL to find which store tables a query actually reads,
//! feeding the citation trail. Falls back to a textual scan when the SQL
//! does not parse.

use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::warn;

/// Names of known tables referenced by `sql`, in the casing the store uses,
/// deduplicated in first-reference order.
pub fn referenced_tables(sql: &str, known_tables: &[String]) -> Vec<String> {
    let raw = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => {
            let mut names = Vec::new();
            for statement in &statements {
                if let Statement::Query(query) = statement {
                    collect_from_query(query, &mut names);
                }
            }
            names
        }
        Err(e) => {
            warn!("SQL parsing failed ({}), using textual table scan", e);
            scan_tables(sql, known_tables)
        }
    };

    let mut resolved = Vec::new();
    for name in raw {
        if let Some(known) = known_tables
            .iter()
            .find(|table| table.eq_ignore_ascii_case(&name))
        {
            if !resolved.contains(known) {
                resolved.push(known.clone());
            }
        }
    }
    resolved
}

fn collect_from_query(query: &Query, names: &mut Vec<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_from_query(&cte.query, names);
        }
    }
    collect_from_set_expr(&query.body, names);
}

fn collect_from_set_expr(body: &SetExpr, names: &mut Vec<String>) {
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in &select.from {
                collect_from_table_with_joins(table_with_joins, names);
            }
        }
        SetExpr::Query(query) => collect_from_query(query, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_from_set_expr(left, names);
            collect_from_set_expr(right, names);
        }
        _ => {}
    }
}

fn collect_from_table_with_joins(table_with_joins: &TableWithJoins, names: &mut Vec<String>) {
    collect_from_factor(&table_with_joins.relation, names);
    for join in &table_with_joins.joins {
        collect_from_factor(&join.relation, names);
    }
}

fn collect_from_factor(factor: &TableFactor, names: &mut Vec<String>) {
    match factor {
        TableFactor::Table { name, .. } => {
            if let Some(last) = name.0.last() {
                names.push(last.value.clone());
            }
        }
        TableFactor::Derived { subquery, .. } => collect_from_query(subquery, names),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_from_table_with_joins(table_with_joins, names),
        _ => {}
    }
}

/// Textual fallback: a known table counts as referenced if its name appears
/// in the query, bare or quoted, case-insensitively.
fn scan_tables(sql: &str, known_tables: &[String]) -> Vec<String> {
    let lowered = sql.to_lowercase();
    known_tables
        .iter()
        .filter(|table| lowered.contains(&table.to_lowercase()))
        .cloned()
        .collect()
}
