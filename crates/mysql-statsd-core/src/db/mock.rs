//! Scripted in-memory database for testing the poller without a server.
//!
//! `MockConnector` is cheap to clone; clones share the same script and
//! counters, so a test can keep one handle while the poller owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::{Connection, Connector, DbError, QueryResult};

/// One scripted answer to a query.
#[derive(Debug, Clone)]
pub enum MockReply {
    Rows(QueryResult),
    Error(DbError),
}

#[derive(Debug, Default)]
struct MockState {
    /// Replies used once, in order, before falling back to `sticky`.
    queued: HashMap<String, VecDeque<MockReply>>,
    /// Reply returned whenever no queued reply is left.
    sticky: HashMap<String, MockReply>,
    connect_failures: VecDeque<DbError>,
    executions: HashMap<String, usize>,
    connects: usize,
    closes: usize,
    /// Time every execution blocks before answering.
    latency: Duration,
}

/// Connector handing out [`MockConnection`]s backed by a shared script.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets the reply returned for `query` whenever nothing is queued.
    pub fn on_query(&self, query: &str, result: QueryResult) -> &Self {
        self.lock()
            .sticky
            .insert(query.to_string(), MockReply::Rows(result));
        self
    }

    /// Makes `query` fail with `error` whenever nothing is queued.
    pub fn fail_query(&self, query: &str, error: DbError) -> &Self {
        self.lock()
            .sticky
            .insert(query.to_string(), MockReply::Error(error));
        self
    }

    /// Queues a one-shot reply for `query`.
    pub fn push_reply(&self, query: &str, reply: MockReply) -> &Self {
        self.lock()
            .queued
            .entry(query.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Makes the next `count` connection attempts fail with `error`.
    pub fn fail_connects(&self, count: usize, error: DbError) -> &Self {
        let mut state = self.lock();
        for _ in 0..count {
            state.connect_failures.push_back(error.clone());
        }
        self
    }

    /// Makes every execution block for `latency` before answering.
    pub fn with_latency(&self, latency: Duration) -> &Self {
        self.lock().latency = latency;
        self
    }

    /// Number of times `query` was executed.
    pub fn executions(&self, query: &str) -> usize {
        self.lock().executions.get(query).copied().unwrap_or(0)
    }

    /// Number of connection attempts, successful or not.
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Number of connections closed explicitly.
    pub fn closes(&self) -> usize {
        self.lock().closes
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    fn connect(&mut self) -> Result<MockConnection, DbError> {
        let mut state = self.lock();
        state.connects += 1;
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            open: true,
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// A connection answering from the shared script.
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl Connection for MockConnection {
    fn execute(&mut self, query: &str) -> Result<QueryResult, DbError> {
        if !self.open {
            return Err(DbError::gone_away("connection is closed"));
        }

        let (reply, latency) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state.executions.entry(query.to_string()).or_default() += 1;
            let queued = state.queued.get_mut(query).and_then(|q| q.pop_front());
            (queued.or_else(|| state.sticky.get(query).cloned()), state.latency)
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        match reply {
            Some(MockReply::Rows(result)) => Ok(result),
            Some(MockReply::Error(err)) => {
                if err.is_connection_lost() {
                    self.open = false;
                }
                Err(err)
            }
            None => Err(DbError::new(1064, format!("no scripted reply for '{}'", query))),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().unwrap_or_else(|e| e.into_inner()).closes += 1;
        }
    }
}
