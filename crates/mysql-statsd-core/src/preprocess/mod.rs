//! Turns raw query results into `(key, value)` pairs.
//!
//! The set of result shapes is closed, so [`Preprocessor`] is an enum with
//! a single [`Preprocessor::process`] dispatch.

mod columns;
pub mod innodb;

use serde::Deserialize;

use crate::db::QueryResult;
use crate::metric::MetricValue;

/// Column holding the blob in `SHOW ENGINE INNODB STATUS` (`Type`, `Name`, `Status`).
const STATUS_COLUMN: &str = "Status";

/// How a check's result set becomes metric pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessor {
    /// Rows are already `(name, value)` pairs, e.g. `SHOW GLOBAL STATUS`.
    Passthrough,
    /// One row, many columns, e.g. `SHOW SLAVE STATUS`.
    Columns,
    /// One status-text blob, parsed by [`innodb::parse`].
    InnodbStatus,
}

impl Preprocessor {
    /// Picks the preprocessor for a check type when none is configured.
    pub fn infer(check_type: &str) -> Self {
        match check_type {
            "innodb" => Preprocessor::InnodbStatus,
            "slave_status" | "replica_status" => Preprocessor::Columns,
            _ => Preprocessor::Passthrough,
        }
    }

    pub fn process(&self, result: &QueryResult) -> Vec<(String, MetricValue)> {
        match self {
            Preprocessor::Passthrough => passthrough(&result.rows),
            Preprocessor::Columns => columns::process(&result.rows, &result.columns),
            Preprocessor::InnodbStatus => innodb::parse(&status_blob(result)),
        }
    }
}

/// First column is the key, second the value. Shorter rows are skipped.
fn passthrough(rows: &[Vec<MetricValue>]) -> Vec<(String, MetricValue)> {
    rows.iter()
        .filter_map(|row| match row.as_slice() {
            [key, value, ..] if !key.is_null() => Some((key.to_string(), value.clone())),
            _ => None,
        })
        .collect()
}

/// Joins the status column of every row.
fn status_blob(result: &QueryResult) -> String {
    let idx = result
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(STATUS_COLUMN))
        .unwrap_or(2);

    let mut blob = String::new();
    for row in &result.rows {
        let cell = row.get(idx).or_else(|| row.last());
        if let Some(MetricValue::Text(text)) = cell {
            if !blob.is_empty() {
                blob.push('\n');
            }
            blob.push_str(text);
        }
    }
    blob
}
