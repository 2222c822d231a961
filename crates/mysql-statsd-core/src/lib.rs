//! mysql-statsd-core: shared library for the mysql-statsd daemon.
//!
//! Provides:
//! - `preprocess`: turns raw query results into key/value pairs, including
//!   the `SHOW ENGINE INNODB STATUS` text parser
//! - `poller`: scheduled multi-query polling with reconnect and recovery budgets
//! - `sender`: queue consumer applying counter/gauge/timer/delta semantics
//! - `orchestrator`: runs poller and sender, handles signals and liveness
//! - `config`: JSON configuration and the metric allow-list
//! - `db`: database capability traits, MySQL adapter, scripted mock
//! - `statsd`: UDP statsd client

pub mod clock;
pub mod config;
pub mod db;
pub mod metric;
pub mod orchestrator;
pub mod poller;
pub mod preprocess;
pub mod queue;
pub mod sender;
pub mod shutdown;
pub mod statsd;
