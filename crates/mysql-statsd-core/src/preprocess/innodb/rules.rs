//! Line rules for the InnoDB status parser.
//!
//! Each rule pairs a line shape with the stats it extracts. Rules are tried
//! in table order and the first matching shape wins, so more specific
//! shapes (`Pages read ahead`) must precede looser ones (`Pages read`).
//! Token positions refer to the normalized line split on whitespace.

use std::collections::BTreeMap;

use super::make_bigint;
use crate::metric::MetricValue;

/// How a rule recognizes its line.
enum Shape {
    Prefix(&'static str),
    Contains(&'static str),
    /// Line contains every listed substring.
    AllOf(&'static [&'static str]),
    /// Prefix match, only once `Trx id counter` has been seen.
    TxnPrefix(&'static str),
    /// Substring match, only once `Trx id counter` has been seen.
    TxnContains(&'static str),
    /// Substring match on a line directly after one starting with the first string.
    After(&'static str, &'static str),
}

/// What a rule does with a matching line.
enum Action {
    /// Copy token at index into stat (only numeric tokens are copied).
    Fields(&'static [(&'static str, usize)]),
    Custom(fn(&Line<'_>, &mut Scope<'_>)),
}

struct Rule {
    shape: Shape,
    action: Action,
}

const fn fields(shape: Shape, fields: &'static [(&'static str, usize)]) -> Rule {
    Rule {
        shape,
        action: Action::Fields(fields),
    }
}

const fn custom(shape: Shape, f: fn(&Line<'_>, &mut Scope<'_>)) -> Rule {
    Rule {
        shape,
        action: Action::Custom(f),
    }
}

use Shape::*;

static RULES: &[Rule] = &[
    // SEMAPHORES
    fields(
        Prefix("Mutex spin waits"),
        &[("spin_waits", 3), ("spin_rounds", 5), ("os_waits", 8)],
    ),
    // Pre 5.5.17: RW-shared spins 3859028, OS waits 2100750; RW-excl spins 4641946, OS waits 1530310
    fields(
        AllOf(&["RW-shared spins", "RW-excl spins"]),
        &[
            ("rw_shared_spins", 2),
            ("rw_shared_os_waits", 5),
            ("rw_excl_spins", 8),
            ("rw_excl_os_waits", 11),
        ],
    ),
    fields(
        Prefix("RW-shared spins"),
        &[
            ("rw_shared_spins", 2),
            ("rw_shared_rounds", 4),
            ("rw_shared_os_waits", 7),
        ],
    ),
    fields(
        Prefix("RW-excl spins"),
        &[
            ("rw_excl_spins", 2),
            ("rw_excl_rounds", 4),
            ("rw_excl_os_waits", 7),
        ],
    ),
    fields(
        Prefix("RW-sx spins"),
        &[("rw_sx_spins", 2), ("rw_sx_rounds", 4), ("rw_sx_os_waits", 7)],
    ),
    custom(Contains("seconds the semaphore:"), semaphore_wait),
    // TRANSACTIONS
    custom(Prefix("Trx id counter"), trx_id_counter),
    custom(Prefix("Purge done for trx"), purge_done),
    fields(Prefix("History list length"), &[("history_list", 3)]),
    custom(TxnPrefix("---TRANSACTION"), transaction),
    custom(TxnPrefix("------- TRX HAS BEEN"), lock_wait),
    fields(Contains("read views open inside InnoDB"), &[("read_views", 0)]),
    custom(Prefix("mysql tables in use"), tables_in_use),
    custom(TxnContains("lock struct(s)"), lock_structs),
    // FILE I/O
    fields(
        Contains(" OS file reads "),
        &[("file_reads", 0), ("file_writes", 4), ("file_fsyncs", 8)],
    ),
    custom(Prefix("Pending normal aio reads:"), pending_normal_aio),
    fields(
        Prefix("ibuf aio reads"),
        &[
            ("pending_ibuf_aio_reads", 3),
            ("pending_aio_log_ios", 6),
            ("pending_aio_sync_ios", 9),
        ],
    ),
    fields(
        Prefix("Pending flushes (fsync)"),
        &[("pending_log_flushes", 4), ("pending_buf_pool_flushes", 7)],
    ),
    // INSERT BUFFER AND ADAPTIVE HASH INDEX
    fields(
        Prefix("Ibuf for space 0: size "),
        &[
            ("ibuf_used_cells", 5),
            ("ibuf_free_cells", 9),
            ("ibuf_cell_count", 12),
        ],
    ),
    custom(Prefix("Ibuf: size "), ibuf_size),
    custom(After("merged operations:", " delete mark "), ibuf_merged_operations),
    fields(
        Contains(" merged recs "),
        &[("ibuf_inserts", 0), ("ibuf_merged", 2), ("ibuf_merges", 5)],
    ),
    custom(Prefix("Hash table size "), hash_table),
    // LOG
    fields(Contains(" log i/o's done "), &[("log_writes", 0)]),
    fields(
        Contains(" pending log writes "),
        &[("pending_log_writes", 0), ("pending_chkp_writes", 4)],
    ),
    custom(Prefix("Log sequence number"), |l, s| {
        log_position(l, s, "log_bytes_written", 3)
    }),
    custom(Prefix("Log flushed up to"), |l, s| {
        log_position(l, s, "log_bytes_flushed", 4)
    }),
    custom(Prefix("Last checkpoint at"), |l, s| {
        log_position(l, s, "last_checkpoint", 3)
    }),
    // BUFFER POOL AND MEMORY
    fields(
        AllOf(&["Total memory allocated", "in additional pool"]),
        &[("total_mem_alloc", 3), ("additional_pool_alloc", 8)],
    ),
    fields(Prefix("Total memory allocated"), &[("total_mem_alloc", 3)]),
    fields(Prefix("Total large memory allocated"), &[("total_mem_alloc", 4)]),
    fields(Prefix("Dictionary memory allocated"), &[("dictionary_cache_memory", 3)]),
    fields(Prefix("Adaptive hash index "), &[("adaptive_hash_memory", 3)]),
    fields(Prefix("Page hash "), &[("page_hash_memory", 2)]),
    fields(Prefix("Dictionary cache "), &[("dictionary_cache_memory", 2)]),
    fields(Prefix("File system "), &[("file_system_memory", 2)]),
    fields(Prefix("Lock system "), &[("lock_system_memory", 2)]),
    fields(Prefix("Recovery system "), &[("recovery_system_memory", 2)]),
    fields(Prefix("Threads "), &[("thread_hash_memory", 1)]),
    fields(Prefix("innodb_io_pattern "), &[("innodb_io_pattern_memory", 1)]),
    // "Buffer pool size, bytes" loses its comma during normalization.
    fields(Prefix("Buffer pool size bytes"), &[("pool_size_bytes", 4)]),
    fields(Prefix("Buffer pool size "), &[("pool_size", 3)]),
    fields(Prefix("Free buffers"), &[("free_pages", 2)]),
    fields(Prefix("Database pages"), &[("database_pages", 2)]),
    fields(Prefix("Old database pages"), &[("old_database_pages", 3)]),
    fields(Prefix("Modified db pages"), &[("modified_pages", 3)]),
    fields(Prefix("Pending reads"), &[("pending_reads", 2)]),
    fields(
        Prefix("Pending writes:"),
        &[
            ("pending_writes_lru", 3),
            ("pending_writes_flush_list", 6),
            ("pending_writes_single_page", 9),
        ],
    ),
    fields(
        Prefix("Pages made young"),
        &[("pages_made_young", 3), ("pages_not_young", 6)],
    ),
    fields(
        Contains("youngs"),
        &[("pages_made_young_ps", 0), ("pages_not_young_ps", 2)],
    ),
    fields(
        Prefix("Pages read ahead"),
        &[
            ("pages_read_ahead", 3),
            ("pages_read_evicted", 7),
            ("pages_read_random", 11),
        ],
    ),
    fields(
        Prefix("Pages read"),
        &[("pages_read", 2), ("pages_created", 4), ("pages_written", 6)],
    ),
    fields(
        AllOf(&["reads", "creates"]),
        &[
            ("pages_read_ps", 0),
            ("pages_created_ps", 2),
            ("pages_written_ps", 4),
        ],
    ),
    fields(
        Prefix("Buffer pool hit rate"),
        &[
            ("buffer_pool_hits", 4),
            ("buffer_pool_hit_total", 6),
            ("buffer_pool_young", 9),
            ("buffer_pool_not_young", 13),
        ],
    ),
    fields(Prefix("LRU len:"), &[("lru_len", 2), ("lru_unzip", 5)]),
    custom(Prefix("I/O sum"), io_sum),
    // ROW OPERATIONS
    fields(
        Prefix("Number of rows inserted"),
        &[
            ("rows_inserted", 4),
            ("rows_updated", 6),
            ("rows_deleted", 8),
            ("rows_read", 10),
        ],
    ),
    fields(
        Contains(" queries inside InnoDB "),
        &[("queries_inside", 0), ("queries_queued", 4)],
    ),
];

/// A normalized line and its whitespace-separated tokens.
pub(super) struct Line<'a> {
    text: &'a str,
    tokens: Vec<&'a str>,
}

impl<'a> Line<'a> {
    fn new(raw: &'a str) -> Self {
        let text = raw.trim();
        Self {
            text,
            tokens: text.split_whitespace().collect(),
        }
    }

    fn token(&self, idx: usize) -> Option<&'a str> {
        self.tokens.get(idx).copied()
    }

    /// Token at `idx` if it is a number.
    fn number(&self, idx: usize) -> Option<&'a str> {
        self.token(idx).filter(|t| is_number(t))
    }

    /// Position of the first token equal to `label`.
    fn position(&self, label: &str) -> Option<usize> {
        self.tokens.iter().position(|t| *t == label)
    }
}

fn is_number(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

/// Accumulator for one pass: stats map, key prefix, and line context.
pub(super) struct Scope<'a> {
    stats: &'a mut BTreeMap<String, MetricValue>,
    prefix: String,
    txn_seen: bool,
    prev_line: String,
}

impl<'a> Scope<'a> {
    pub(super) fn new(stats: &'a mut BTreeMap<String, MetricValue>, prefix: String) -> Self {
        Self {
            stats,
            prefix,
            txn_seen: false,
            prev_line: String::new(),
        }
    }

    /// Resets the previous-line context at a section boundary.
    pub(super) fn begin_chunk(&mut self) {
        self.prev_line.clear();
    }

    /// Applies the first matching rule to `raw`; unmatched lines are ignored.
    pub(super) fn apply(&mut self, raw: &str) {
        let line = Line::new(raw);
        if !line.text.is_empty()
            && let Some(rule) = RULES.iter().find(|r| self.matches(&r.shape, &line))
        {
            match rule.action {
                Action::Fields(fields) => {
                    for &(name, idx) in fields {
                        self.set_number(name, &line, idx);
                    }
                }
                Action::Custom(f) => f(&line, self),
            }
        }
        self.prev_line.clear();
        self.prev_line.push_str(line.text);
    }

    fn matches(&self, shape: &Shape, line: &Line<'_>) -> bool {
        let text = line.text;
        match *shape {
            Prefix(p) => text.starts_with(p),
            Contains(s) => text.contains(s),
            AllOf(all) => all.iter().all(|s| text.contains(s)),
            TxnPrefix(p) => self.txn_seen && text.starts_with(p),
            TxnContains(s) => self.txn_seen && text.contains(s),
            After(prev, s) => self.prev_line.starts_with(prev) && text.contains(s),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn get(&self, name: &str) -> Option<&MetricValue> {
        self.stats.get(&self.key(name))
    }

    /// Replaces the stat.
    fn set(&mut self, name: &str, value: MetricValue) {
        let key = self.key(name);
        self.stats.insert(key, value);
    }

    /// Sets the stat from a numeric token, keeping the token text as-is.
    fn set_number(&mut self, name: &str, line: &Line<'_>, idx: usize) {
        if let Some(token) = line.number(idx) {
            self.set(name, MetricValue::text(token));
        }
    }

    /// Adds to a running total.
    fn increment(&mut self, name: &str, by: MetricValue) {
        let key = self.key(name);
        let total = match self.stats.get(&key) {
            Some(current) => current.add(&by),
            None => MetricValue::Int(0).add(&by),
        };
        self.stats.insert(key, total);
    }
}

fn bigint_value(v: u64) -> MetricValue {
    match i64::try_from(v) {
        Ok(v) => MetricValue::Int(v),
        Err(_) => MetricValue::Text(v.to_string()),
    }
}

// --Thread 907205 has waited at handler/ha_innodb.cc line 7156 for 1.00 seconds the semaphore:
fn semaphore_wait(line: &Line<'_>, scope: &mut Scope<'_>) {
    scope.increment("innodb_sem_waits", MetricValue::Int(1));
    let seconds = line
        .position("seconds")
        .and_then(|idx| idx.checked_sub(1))
        .and_then(|idx| line.token(idx))
        .and_then(|t| t.parse::<f64>().ok());
    if let Some(seconds) = seconds {
        scope.increment("innodb_sem_wait_time_ms", MetricValue::Float(seconds * 1000.0));
    }
}

// Trx id counter 0 1170664159
// Trx id counter 861B144C
fn trx_id_counter(line: &Line<'_>, scope: &mut Scope<'_>) {
    if let Some(hi) = line.token(3)
        && let Some(v) = make_bigint(hi, line.token(4))
    {
        scope.set("innodb_transactions", bigint_value(v));
    }
    scope.txn_seen = true;
}

// Purge done for trx's n:o < 0 1170663853 undo n:o < 0 0
// Purge done for trx's n:o < 861B135D undo n:o < 0
fn purge_done(line: &Line<'_>, scope: &mut Scope<'_>) {
    let Some(hi) = line.token(6) else {
        return;
    };
    let lo = line.token(7).filter(|t| *t != "undo");
    let Some(purged) = make_bigint(hi, lo) else {
        return;
    };
    if let Some(MetricValue::Int(total)) = scope.get("innodb_transactions")
        && let Ok(purged) = i64::try_from(purged)
    {
        let unpurged = total.saturating_sub(purged);
        scope.set("unpurged_txns", MetricValue::Int(unpurged));
    }
}

// ---TRANSACTION 0 1170664158, ACTIVE 3 sec, process no 13510
fn transaction(line: &Line<'_>, scope: &mut Scope<'_>) {
    scope.increment("current_transactions", MetricValue::Int(1));
    if line.text.contains("ACTIVE") {
        scope.increment("active_transactions", MetricValue::Int(1));
    }
}

// ------- TRX HAS BEEN WAITING 32 SEC FOR THIS LOCK TO BE GRANTED:
fn lock_wait(line: &Line<'_>, scope: &mut Scope<'_>) {
    if let Some(secs) = line.number(5) {
        scope.increment("innodb_lock_wait_secs", MetricValue::text(secs));
    }
}

// mysql tables in use 2, locked 2
fn tables_in_use(line: &Line<'_>, scope: &mut Scope<'_>) {
    if let Some(n) = line.number(4) {
        scope.increment("innodb_tables_in_use", MetricValue::text(n));
    }
    if let Some(n) = line.number(6) {
        scope.increment("innodb_locked_tables", MetricValue::text(n));
    }
}

// 23 lock struct(s), heap size 3024, undo log entries 27
// LOCK WAIT 12 lock struct(s), heap size 3024, undo log entries 5
fn lock_structs(line: &Line<'_>, scope: &mut Scope<'_>) {
    if line.text.starts_with("LOCK WAIT") {
        if let Some(n) = line.number(2) {
            scope.increment("innodb_lock_structs", MetricValue::text(n));
        }
        scope.increment("locked_transactions", MetricValue::Int(1));
    } else if let Some(n) = line.number(0) {
        scope.increment("innodb_lock_structs", MetricValue::text(n));
    }
}

// Pending normal aio reads: 0, aio writes: 0,
// Pending normal aio reads: [0, 0, 0, 0] , aio writes: [0, 0, 0, 0] ,
fn pending_normal_aio(line: &Line<'_>, scope: &mut Scope<'_>) {
    if let Some(v) = line.position("reads:").and_then(|i| counter_at(line, i + 1)) {
        scope.set("pending_normal_aio_reads", v);
    }
    if let Some(v) = line.position("writes:").and_then(|i| counter_at(line, i + 1)) {
        scope.set("pending_normal_aio_writes", v);
    }
}

/// A plain numeric token, or the sum of a bracketed per-thread list.
fn counter_at(line: &Line<'_>, idx: usize) -> Option<MetricValue> {
    let first = line.token(idx)?;
    if !first.starts_with('[') {
        return line.number(idx).map(MetricValue::text);
    }
    let mut total = 0i64;
    for token in &line.tokens[idx..] {
        let digits = token.trim_matches(|c| c == '[' || c == ']');
        if !digits.is_empty() {
            total = total.saturating_add(digits.parse::<i64>().ok()?);
        }
        if token.ends_with(']') {
            return Some(MetricValue::Int(total));
        }
    }
    None
}

// Ibuf: size 1, free list len 4634, seg size 4636, 12 merges
fn ibuf_size(line: &Line<'_>, scope: &mut Scope<'_>) {
    scope.set_number("ibuf_used_cells", line, 2);
    scope.set_number("ibuf_free_cells", line, 6);
    scope.set_number("ibuf_cell_count", line, 9);
    if line.text.contains("merges") {
        scope.set_number("ibuf_merges", line, 10);
    }
}

// merged operations:
//  insert 593983, delete mark 387006, delete 73092
fn ibuf_merged_operations(line: &Line<'_>, scope: &mut Scope<'_>) {
    scope.set_number("ibuf_inserts", line, 1);
    let parts = [1, 4, 6].map(|idx| line.number(idx).and_then(|t| t.parse::<i64>().ok()));
    if let [Some(insert), Some(delete_mark), Some(delete)] = parts {
        scope.set(
            "ibuf_merged",
            MetricValue::Int(insert.saturating_add(delete_mark).saturating_add(delete)),
        );
    }
}

// Hash table size 4425293, used cells 4229064, ....
// Hash table size 57374437, node heap has 72964 buffer(s)
fn hash_table(line: &Line<'_>, scope: &mut Scope<'_>) {
    scope.set_number("hash_index_cells_total", line, 3);
    if line.text.contains("used cells") {
        scope.set_number("hash_index_cells_used", line, 6);
    } else {
        scope.set("hash_index_cells_used", MetricValue::Int(0));
    }
}

// Log sequence number 13093949495856
// Log sequence number 125 3934414864
fn log_position(line: &Line<'_>, scope: &mut Scope<'_>, name: &str, idx: usize) {
    match (line.number(idx), line.number(idx + 1)) {
        (Some(hi), Some(lo)) => {
            if let Some(v) = make_bigint(hi, Some(lo)) {
                scope.set(name, bigint_value(v));
            }
        }
        (Some(single), None) => scope.set(name, MetricValue::text(single)),
        _ => {}
    }
}

// I/O sum[29174]:cur[285], unzip sum[0]:cur[0]
fn io_sum(line: &Line<'_>, scope: &mut Scope<'_>) {
    if let Some(groups) = line.token(1).map(digit_groups) {
        if let Some(v) = groups.first() {
            scope.set("io_sum", MetricValue::text(*v));
        }
        if let Some(v) = groups.get(1) {
            scope.set("io_sum_cur", MetricValue::text(*v));
        }
    }
    if let Some(groups) = line.token(3).map(digit_groups) {
        if let Some(v) = groups.first() {
            scope.set("io_unzip", MetricValue::text(*v));
        }
        if let Some(v) = groups.get(1) {
            scope.set("io_unzip_cur", MetricValue::text(*v));
        }
    }
}

/// Runs of ASCII digits within a token: `sum[29174]:cur[285]` → `["29174", "285"]`.
fn digit_groups(token: &str) -> Vec<&str> {
    token
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect()
}
