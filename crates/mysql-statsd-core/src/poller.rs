//! Scheduled multi-query poller.
//!
//! One poller owns one database connection and runs every configured check
//! whose interval has elapsed on each tick. Results go through the check's
//! preprocessor and the allow-list, then onto the queue.
//!
//! Failure handling:
//! - connection attempts retry after a fixed delay, up to `max_reconnect`;
//! - a failed tick is counted and retried on the next tick; reaching
//!   `max_recovery` consecutive failures is fatal;
//! - a lost connection is closed and reopened before the next tick,
//!   keeping per-check schedule state.

use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::{AllowList, CheckConfig, Config, MysqlConfig};
use crate::db::{Connection, Connector, DbError};
use crate::metric::MetricSample;
use crate::preprocess::Preprocessor;
use crate::queue::QueueProducer;
use crate::shutdown::ShutdownToken;

/// One scheduled check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSpec {
    /// Check type, also the first segment of every metric key it produces.
    pub name: String,
    pub query: String,
    pub interval_ms: i64,
    /// Wall time of the last successful run; 0 before the first one.
    pub last_run_ms: i64,
    pub preprocessor: Preprocessor,
}

impl CheckSpec {
    pub fn new(name: &str, config: &CheckConfig) -> Self {
        Self {
            name: name.to_string(),
            query: config.query.clone(),
            interval_ms: i64::try_from(config.interval_ms).unwrap_or(i64::MAX),
            last_run_ms: 0,
            preprocessor: config
                .preprocessor
                .unwrap_or_else(|| Preprocessor::infer(name)),
        }
    }

    /// True once strictly more than `interval_ms` has passed since the last run.
    pub fn is_due(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_run_ms) > self.interval_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Disconnected,
    Connected,
    Running,
    /// The last tick failed; `consecutive_errors` is non-zero.
    Recovering,
}

/// Timing and retry budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerSettings {
    pub sleep_interval: Duration,
    pub max_reconnect: u32,
    pub reconnect_delay: Duration,
    pub max_recovery: u32,
}

impl PollerSettings {
    pub fn from_config(config: &MysqlConfig) -> Self {
        Self {
            sleep_interval: Duration::from_millis(config.sleep_interval_ms),
            max_reconnect: config.max_reconnect.max(1),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_recovery: config.max_recovery.max(1),
        }
    }
}

/// Fatal poller errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerError {
    /// Could not open a connection within the reconnect budget.
    ReconnectExhausted { attempts: u32, last_error: DbError },
    /// Too many consecutive failed ticks.
    RecoveryExhausted { errors: u32, last_error: DbError },
    /// The sender dropped its end of the queue.
    QueueClosed,
}

impl std::fmt::Display for PollerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollerError::ReconnectExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "giving up after {} connection attempts: {}",
                attempts, last_error
            ),
            PollerError::RecoveryExhausted { errors, last_error } => write!(
                f,
                "giving up after {} consecutive failed polls: {}",
                errors, last_error
            ),
            PollerError::QueueClosed => write!(f, "metric queue closed"),
        }
    }
}

impl std::error::Error for PollerError {}

enum TickError {
    Db(DbError),
    QueueClosed,
}

pub struct Poller<C: Connector, K: Clock> {
    connector: C,
    conn: Option<C::Conn>,
    clock: K,
    checks: Vec<CheckSpec>,
    allow: AllowList,
    queue: QueueProducer,
    settings: PollerSettings,
    shutdown: ShutdownToken,
    state: PollerState,
    consecutive_errors: u32,
}

impl<C: Connector, K: Clock> Poller<C, K> {
    pub fn new(
        connector: C,
        clock: K,
        config: &Config,
        queue: QueueProducer,
        shutdown: ShutdownToken,
    ) -> Self {
        let checks = config
            .checks()
            .iter()
            .map(|(name, check)| CheckSpec::new(name, check))
            .collect();
        Self {
            connector,
            conn: None,
            clock,
            checks,
            allow: config.allow_list(),
            queue,
            settings: PollerSettings::from_config(&config.mysql),
            shutdown,
            state: PollerState::Disconnected,
            consecutive_errors: 0,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }

    /// Polls until shutdown is requested or a budget is exhausted.
    pub fn run(&mut self) -> Result<(), PollerError> {
        info!(
            endpoint = %self.connector.describe(),
            checks = self.checks.len(),
            allowed = self.allow.len(),
            "poller started"
        );

        let result = self.run_loop();
        self.disconnect();

        match &result {
            Ok(()) => info!("poller stopped"),
            Err(e) => error!(error = %e, "poller failed"),
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), PollerError> {
        while !self.shutdown.is_cancelled() {
            self.poll_once()?;
            if self.shutdown.wait_timeout(self.settings.sleep_interval) {
                break;
            }
        }
        Ok(())
    }

    /// One iteration: connect if needed, run due checks, account for errors.
    pub fn poll_once(&mut self) -> Result<(), PollerError> {
        if self.conn.is_none() && !self.connect()? {
            return Ok(());
        }

        match self.tick() {
            Ok(samples) => {
                if self.consecutive_errors > 0 {
                    info!(
                        errors = self.consecutive_errors,
                        "poller recovered"
                    );
                }
                self.consecutive_errors = 0;
                self.state = PollerState::Running;
                debug!(samples, "poll tick");
                Ok(())
            }
            Err(TickError::QueueClosed) => Err(PollerError::QueueClosed),
            Err(TickError::Db(e)) => self.recover(e),
        }
    }

    fn recover(&mut self, e: DbError) -> Result<(), PollerError> {
        self.consecutive_errors += 1;
        let lost = e.is_connection_lost() || !self.conn.as_ref().is_some_and(|c| c.is_open());

        if self.consecutive_errors >= self.settings.max_recovery {
            return Err(PollerError::RecoveryExhausted {
                errors: self.consecutive_errors,
                last_error: e,
            });
        }

        warn!(
            attempt = self.consecutive_errors,
            max = self.settings.max_recovery,
            error = %e,
            "poll failed"
        );
        if lost {
            self.disconnect();
        } else {
            self.state = PollerState::Recovering;
        }
        Ok(())
    }

    /// Opens a connection. Returns `Ok(false)` if shutdown interrupted the retries.
    fn connect(&mut self) -> Result<bool, PollerError> {
        let max = self.settings.max_reconnect;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connector.connect() {
                Ok(conn) => {
                    info!(endpoint = %self.connector.describe(), attempt, "connected");
                    self.conn = Some(conn);
                    self.state = PollerState::Connected;
                    return Ok(true);
                }
                Err(e) if attempt >= max => {
                    return Err(PollerError::ReconnectExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    warn!(attempt, max, error = %e, "connection failed");
                    if self.shutdown.wait_timeout(self.settings.reconnect_delay) {
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.state = PollerState::Disconnected;
    }

    /// Runs every due check. Samples enqueued before a failing check stay queued.
    fn tick(&mut self) -> Result<usize, TickError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(TickError::Db(DbError::gone_away("not connected")));
        };
        let now = self.clock.now_ms();
        let mut enqueued = 0;

        for check in self.checks.iter_mut().filter(|c| c.is_due(now)) {
            if self.shutdown.is_cancelled() {
                break;
            }
            let result = conn.execute(&check.query).map_err(TickError::Db)?;

            for (metric, value) in check.preprocessor.process(&result) {
                let metric = metric.to_lowercase();
                let Some(kind) = self.allow.lookup(&check.name, &metric) else {
                    continue;
                };
                let key = format!("{}.{}", check.name, metric);
                trace!(key = %key, value = %value, kind = %kind, "enqueue");
                let sample = MetricSample::new(key, value, kind);
                match self.queue.push(sample, &self.shutdown) {
                    Ok(true) => enqueued += 1,
                    Ok(false) => return Ok(enqueued),
                    Err(_) if self.shutdown.is_cancelled() => return Ok(enqueued),
                    Err(_) => return Err(TickError::QueueClosed),
                }
            }
            check.last_run_ms = now;
        }
        Ok(enqueued)
    }
}
