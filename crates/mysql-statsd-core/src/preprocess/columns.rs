//! Single-row, many-column results such as `SHOW SLAVE STATUS`.

use crate::metric::MetricValue;

/// Zips column names with the first row. Later rows are ignored.
pub fn process(rows: &[Vec<MetricValue>], columns: &[String]) -> Vec<(String, MetricValue)> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    columns
        .iter()
        .zip(first.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
