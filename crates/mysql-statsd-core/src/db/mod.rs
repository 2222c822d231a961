//! Database capability used by the poller.
//!
//! The poller only needs "execute query, get rows": [`Connector`] opens
//! connections, [`Connection`] runs queries on one. The production
//! implementation is [`MysqlConnector`]; tests use [`MockConnector`].

pub mod mock;
mod mysql_conn;

pub use self::mock::{MockConnection, MockConnector, MockReply};
pub use self::mysql_conn::{MysqlConnection, MysqlConnector};

use crate::metric::MetricValue;

/// Client error: MySQL server has gone away.
pub const CR_SERVER_GONE_ERROR: u16 = 2006;
/// Client error: lost connection to MySQL server during query.
pub const CR_SERVER_LOST: u16 = 2013;
/// Client error: can't connect to MySQL server.
pub const CR_CONN_HOST_ERROR: u16 = 2003;

/// Error returned by a database operation, carrying the vendor error code.
#[derive(Debug, Clone, PartialEq)]
pub struct DbError {
    pub code: u16,
    pub message: String,
}

impl DbError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shortcut for the "server has gone away" condition.
    pub fn gone_away(message: impl Into<String>) -> Self {
        Self::new(CR_SERVER_GONE_ERROR, message)
    }

    /// Returns true when the connection is unusable and must be reopened.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.code, CR_SERVER_GONE_ERROR | CR_SERVER_LOST)
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MySQL error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for DbError {}

/// Rows and column names of one executed query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<MetricValue>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<MetricValue>>) -> Self {
        Self { columns, rows }
    }

    /// Builds a two-column `Variable_name`/`Value` result, the shape of `SHOW GLOBAL STATUS`.
    pub fn key_values<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            columns: vec!["Variable_name".to_string(), "Value".to_string()],
            rows: pairs
                .into_iter()
                .map(|(k, v)| vec![MetricValue::text(k), MetricValue::text(v)])
                .collect(),
        }
    }
}

/// An open database connection.
pub trait Connection: Send {
    /// Executes `query` and returns all rows.
    fn execute(&mut self, query: &str) -> Result<QueryResult, DbError>;

    /// Returns false once the connection is known to be unusable.
    fn is_open(&self) -> bool;

    /// Closes the connection. Errors while closing are ignored.
    fn close(&mut self);
}

/// Opens new connections.
pub trait Connector: Send {
    type Conn: Connection;

    fn connect(&mut self) -> Result<Self::Conn, DbError>;

    /// Human-readable endpoint for log messages.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_connection_codes() {
        assert!(DbError::gone_away("gone").is_connection_lost());
        assert!(DbError::new(CR_SERVER_LOST, "lost").is_connection_lost());
        assert!(!DbError::new(1064, "syntax").is_connection_lost());
        assert!(!DbError::new(CR_CONN_HOST_ERROR, "refused").is_connection_lost());
    }

    #[test]
    fn key_values_builds_two_columns() {
        let result = QueryResult::key_values([("Uptime", "10")]);
        assert_eq!(result.columns.len(), 2);
        assert_eq!(
            result.rows,
            vec![vec![MetricValue::text("Uptime"), MetricValue::text("10")]]
        );
    }
}
