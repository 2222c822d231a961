//! Parser for `SHOW ENGINE INNODB STATUS`.
//!
//! The status blob is a loosely structured diagnostics dump whose layout
//! changes between server versions. Parsing happens in three steps:
//!
//! 1. **Chunking.** The blob is split into named sections. A section header
//!    is a dashed separator line, the section name, and another dashed line.
//!    Text before the first header is discarded.
//! 2. **Flat pass.** Every line of every section except
//!    `INDIVIDUAL BUFFER POOL INFO` is matched against the ordered rule
//!    table in [`rules`]; the first matching rule extracts its stats.
//! 3. **Per-pool pass.** Lines of `INDIVIDUAL BUFFER POOL INFO` go through
//!    the same rule table, with keys prefixed by `bufferpool_<N>.` where
//!    `N` comes from the preceding `---BUFFER POOL N` marker.
//!
//! Unrecognized lines are ignored. All state is local to one [`parse`]
//! call, so parsing the same blob twice yields the same result.

mod rules;

#[cfg(test)]
mod fixtures;

use std::collections::BTreeMap;

use crate::metric::MetricValue;
use rules::Scope;

/// Section holding per-pool buffer pool statistics.
const BUFFER_POOL_SECTION: &str = "INDIVIDUAL BUFFER POOL INFO";

/// Marker starting a nested block whose closing dashed line is not a section header.
const OLDEST_VIEW_MARKER: &str = "---OLDEST VIEW---";

/// A named section of the status blob.
#[derive(Debug, Clone, PartialEq)]
struct Chunk {
    name: String,
    lines: Vec<String>,
}

/// Parses a status blob into a flat, sorted list of stats.
pub fn parse(blob: &str) -> Vec<(String, MetricValue)> {
    parse_map(blob).into_iter().collect()
}

/// Like [`parse`], keyed by stat name.
pub fn parse_map(blob: &str) -> BTreeMap<String, MetricValue> {
    let chunks = split_chunks(blob);
    let mut stats = BTreeMap::new();

    {
        let mut scope = Scope::new(&mut stats, String::new());
        for chunk in chunks.iter().filter(|c| c.name != BUFFER_POOL_SECTION) {
            scope.begin_chunk();
            for line in &chunk.lines {
                scope.apply(line);
            }
        }
    }

    if let Some(pools) = chunks.iter().find(|c| c.name == BUFFER_POOL_SECTION) {
        parse_buffer_pools(&pools.lines, &mut stats);
    }

    stats
}

/// Runs the rule table over each `---BUFFER POOL N` block with a per-pool prefix.
fn parse_buffer_pools(lines: &[String], stats: &mut BTreeMap<String, MetricValue>) {
    let mut pool = "0";
    let mut block: Vec<&str> = Vec::new();

    for line in lines {
        if let Some(index) = pool_marker(line) {
            apply_pool(pool, &block, stats);
            block.clear();
            pool = index;
        } else {
            block.push(line);
        }
    }
    apply_pool(pool, &block, stats);
}

fn apply_pool(pool: &str, block: &[&str], stats: &mut BTreeMap<String, MetricValue>) {
    if block.is_empty() {
        return;
    }
    let mut scope = Scope::new(stats, format!("bufferpool_{}.", pool));
    for line in block {
        scope.apply(line);
    }
}

/// Returns `N` for a `---BUFFER POOL N` line.
fn pool_marker(line: &str) -> Option<&str> {
    let line = line.trim();
    if !line.starts_with("---") || !line.contains("BUFFER POOL") {
        return None;
    }
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == "POOL")?;
    tokens
        .next()
        .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Strips separators and rate suffixes so numeric tokens parse cleanly.
fn normalize(line: &str) -> String {
    line.replace([',', ';'], "").replace("/s", "")
}

/// A line made only of four or more dashes.
fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 4 && line.bytes().all(|b| b == b'-')
}

/// Splits the blob into named sections, dropping everything before the first one.
fn split_chunks(blob: &str) -> Vec<Chunk> {
    let lines: Vec<String> = blob.lines().map(normalize).collect();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Option<usize> = None;
    let mut in_oldest_view = false;

    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];

        if line.starts_with(OLDEST_VIEW_MARKER) {
            in_oldest_view = true;
        } else if is_separator(line) {
            if in_oldest_view {
                // Closes the oldest-view block, never opens a section.
                in_oldest_view = false;
                i += 1;
                continue;
            }
            let is_header = i + 2 < lines.len()
                && !is_separator(&lines[i + 1])
                && is_separator(&lines[i + 2]);
            if is_header {
                let name = lines[i + 1].trim().to_string();
                current = Some(match chunks.iter().position(|c| c.name == name) {
                    Some(idx) => idx,
                    None => {
                        chunks.push(Chunk {
                            name,
                            lines: Vec::new(),
                        });
                        chunks.len() - 1
                    }
                });
                i += 3;
                continue;
            }
            // Stray separator inside a section (e.g. after a lock wait dump).
            i += 1;
            continue;
        }

        if let Some(idx) = current {
            chunks[idx].lines.push(line.clone());
        }
        i += 1;
    }

    chunks
}

/// Reconstructs a 64-bit counter printed in one of two formats.
///
/// A single token is hexadecimal (`861B144C`). Two tokens are the legacy
/// decimal high/low 32-bit words (`0 1170664159`) printed by older servers.
pub fn make_bigint(hi: &str, lo: Option<&str>) -> Option<u64> {
    match lo {
        None => {
            let hex = hi
                .strip_prefix("0x")
                .or_else(|| hi.strip_prefix("0X"))
                .unwrap_or(hi);
            u64::from_str_radix(hex, 16).ok()
        }
        Some(lo) => {
            let hi: u64 = hi.parse().ok()?;
            let lo: u64 = lo.parse().ok()?;
            hi.checked_mul(1 << 32)?.checked_add(lo)
        }
    }
}
