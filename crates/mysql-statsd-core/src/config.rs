//! Daemon configuration.
//!
//! Loaded once from a JSON file, validated, then handed to each unit as an
//! immutable value. Nothing reads configuration from global state.
//!
//! ```json
//! {
//!   "mysql": {
//!     "host": "db1", "username": "statsd", "password": "secret",
//!     "checks": {
//!       "global_status": { "query": "SHOW GLOBAL STATUS", "interval_ms": 1000 },
//!       "innodb": { "query": "SHOW ENGINE INNODB STATUS", "interval_ms": 10000 }
//!     }
//!   },
//!   "statsd": { "host": "127.0.0.1", "prefix": "mysql", "include_hostname": true },
//!   "metrics": {
//!     "global_status.questions": "d",
//!     "innodb.spin_waits": "g",
//!     "innodb.bufferpool_*.pool_size": "g"
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::metric::MetricKind;
use crate::preprocess::Preprocessor;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(String),
    /// The file is not valid JSON for this schema.
    Parse(String),
    /// The configuration parsed but violates a constraint.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub mysql: MysqlConfig,
    pub statsd: StatsdConfig,
    /// Allow-list: `check_type.metric` → emission kind.
    pub metrics: HashMap<String, MetricKind>,
    pub queue_capacity: Option<usize>,
}

/// Connection, scheduling and recovery settings for the poller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connect_timeout_ms: u64,
    /// Sleep between poll ticks.
    pub sleep_interval_ms: u64,
    /// Connection attempts before giving up.
    pub max_reconnect: u32,
    pub reconnect_delay_ms: u64,
    /// Consecutive failed ticks before giving up.
    pub max_recovery: u32,
    /// Check type → query. `None` means the built-in default checks.
    pub checks: Option<BTreeMap<String, CheckConfig>>,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            connect_timeout_ms: 5000,
            sleep_interval_ms: 500,
            max_reconnect: 30,
            reconnect_delay_ms: 1000,
            max_recovery: 10,
            checks: None,
        }
    }
}

/// One configured check type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub query: String,
    pub interval_ms: u64,
    /// Inferred from the check name when omitted.
    #[serde(default)]
    pub preprocessor: Option<Preprocessor>,
}

/// Statsd endpoint and key prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
    pub prefix: String,
    /// Insert the local hostname between prefix and metric key.
    pub include_hostname: bool,
    /// Hostname to use instead of the detected one.
    pub hostname: Option<String>,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8125,
            prefix: "mysql_statsd".to_string(),
            include_hostname: false,
            hostname: None,
        }
    }
}

/// Default queue capacity between poller and sender.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default interval for the built-in checks.
const DEFAULT_CHECK_INTERVAL_MS: u64 = 1000;

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parses and validates a JSON document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    /// Configured checks, falling back to the three built-in ones.
    pub fn checks(&self) -> BTreeMap<String, CheckConfig> {
        match &self.mysql.checks {
            Some(checks) => checks.clone(),
            None => default_checks(),
        }
    }

    pub fn allow_list(&self) -> AllowList {
        AllowList::new(self.metrics.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.mysql;
        if m.sleep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "mysql.sleep_interval_ms must be positive".to_string(),
            ));
        }
        if m.max_reconnect == 0 {
            return Err(ConfigError::Invalid(
                "mysql.max_reconnect must be at least 1".to_string(),
            ));
        }
        if m.max_recovery == 0 {
            return Err(ConfigError::Invalid(
                "mysql.max_recovery must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        let checks = self.checks();
        if checks.is_empty() {
            return Err(ConfigError::Invalid("no checks configured".to_string()));
        }
        for (name, check) in &checks {
            if check.interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "check '{}': interval_ms must be positive",
                    name
                )));
            }
            if check.query.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "check '{}': query is empty",
                    name
                )));
            }
        }

        for key in self.metrics.keys() {
            if !key.contains('.') {
                return Err(ConfigError::Invalid(format!(
                    "metric '{}' must be of the form check_type.metric_name",
                    key
                )));
            }
        }

        Ok(())
    }
}

fn default_checks() -> BTreeMap<String, CheckConfig> {
    [
        ("global_status", "SHOW GLOBAL STATUS"),
        ("innodb", "SHOW ENGINE INNODB STATUS"),
        ("slave_status", "SHOW SLAVE STATUS"),
    ]
    .into_iter()
    .map(|(name, query)| {
        (
            name.to_string(),
            CheckConfig {
                query: query.to_string(),
                interval_ms: DEFAULT_CHECK_INTERVAL_MS,
                preprocessor: None,
            },
        )
    })
    .collect()
}

/// Metric keys permitted to leave the system, with their emission kind.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashMap<String, MetricKind>,
}

impl AllowList {
    pub fn new(entries: HashMap<String, MetricKind>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up `check_type.metric`.
    ///
    /// Per-pool keys (`bufferpool_<N>.<metric>`) also match the wildcard
    /// entry `check_type.bufferpool_*.<metric>`.
    pub fn lookup(&self, check_type: &str, metric: &str) -> Option<MetricKind> {
        let key = format!("{}.{}", check_type, metric);
        if let Some(kind) = self.entries.get(&key) {
            return Some(*kind);
        }
        let rest = bufferpool_suffix(metric)?;
        let wildcard = format!("{}.bufferpool_*.{}", check_type, rest);
        self.entries.get(&wildcard).copied()
    }
}

/// For `bufferpool_<digits>.<rest>` returns `<rest>`.
fn bufferpool_suffix(metric: &str) -> Option<&str> {
    let tail = metric.strip_prefix("bufferpool_")?;
    let (index, rest) = tail.split_once('.')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) || rest.is_empty() {
        return None;
    }
    Some(rest)
}
