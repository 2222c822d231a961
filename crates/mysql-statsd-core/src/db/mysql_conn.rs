//! MySQL implementation of the database capability, on top of the `mysql` crate.

use std::time::Duration;

use ::mysql::prelude::Queryable;
use ::mysql::{Conn, OptsBuilder, Value};
use tracing::debug;

use super::{CR_CONN_HOST_ERROR, CR_SERVER_LOST, Connection, Connector, DbError};
use crate::config::MysqlConfig;
use crate::metric::MetricValue;

/// Opens MySQL connections from the `mysql` configuration section.
pub struct MysqlConnector {
    host: String,
    port: u16,
    username: String,
    password: String,
    connect_timeout: Duration,
}

impl MysqlConnector {
    pub fn new(config: &MysqlConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

impl Connector for MysqlConnector {
    type Conn = MysqlConnection;

    fn connect(&mut self) -> Result<MysqlConnection, DbError> {
        let mut opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .tcp_connect_timeout(Some(self.connect_timeout));
        if !self.password.is_empty() {
            opts = opts.pass(Some(self.password.clone()));
        }

        let conn = Conn::new(opts).map_err(|e| map_error(e, CR_CONN_HOST_ERROR))?;
        debug!(endpoint = %self.describe(), "MySQL connection opened");
        Ok(MysqlConnection { conn: Some(conn) })
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// A live MySQL connection. Dropped on close or after a lost-connection error.
pub struct MysqlConnection {
    conn: Option<Conn>,
}

impl Connection for MysqlConnection {
    fn execute(&mut self, query: &str) -> Result<crate::db::QueryResult, DbError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(DbError::gone_away("connection is closed"));
        };

        match run_query(conn, query) {
            Ok(result) => Ok(result),
            Err(e) => {
                if breaks_stream(&e) {
                    self.conn = None;
                }
                Err(map_error(e, CR_SERVER_LOST))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn close(&mut self) {
        // Dropping the handle sends COM_QUIT; failures are irrelevant here.
        self.conn = None;
    }
}

fn run_query(conn: &mut Conn, query: &str) -> Result<crate::db::QueryResult, ::mysql::Error> {
    let result = conn.query_iter(query)?;

    let columns: Vec<String> = result
        .columns()
        .as_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();

    let mut rows = Vec::new();
    for row in result {
        let row = row?;
        let values = (0..row.len())
            .map(|i| row.as_ref(i).map(convert_value).unwrap_or(MetricValue::Null))
            .collect();
        rows.push(values);
    }

    Ok(crate::db::QueryResult { columns, rows })
}

/// Converts a text-protocol cell into a [`MetricValue`].
fn convert_value(value: &Value) -> MetricValue {
    match value {
        Value::NULL => MetricValue::Null,
        Value::Bytes(bytes) => MetricValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => MetricValue::Int(*v),
        Value::UInt(v) => match i64::try_from(*v) {
            Ok(v) => MetricValue::Int(v),
            Err(_) => MetricValue::Text(v.to_string()),
        },
        Value::Float(v) => MetricValue::Float(f64::from(*v)),
        Value::Double(v) => MetricValue::Float(*v),
        other => MetricValue::Text(other.as_sql(true)),
    }
}

/// Maps a driver error to a [`DbError`] with a vendor code.
///
/// I/O failures carry no server code; `io_code` says what they mean in
/// the calling context (refused while connecting, lost while querying).
fn map_error(e: ::mysql::Error, io_code: u16) -> DbError {
    match e {
        ::mysql::Error::MySqlError(err) => DbError::new(err.code, err.message),
        ::mysql::Error::IoError(err) => DbError::new(io_code, err.to_string()),
        ::mysql::Error::DriverError(
            err @ (::mysql::DriverError::PacketOutOfSync
            | ::mysql::DriverError::UnexpectedPacket
            | ::mysql::DriverError::Timeout),
        ) => DbError::new(CR_SERVER_LOST, err.to_string()),
        other => DbError::new(0, other.to_string()),
    }
}

/// True unless the server itself reported the error; the session is
/// unusable after anything else.
fn breaks_stream(e: &::mysql::Error) -> bool {
    !matches!(e, ::mysql::Error::MySqlError(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_value_maps_text_protocol_cells() {
        assert_eq!(convert_value(&Value::NULL), MetricValue::Null);
        assert_eq!(
            convert_value(&Value::Bytes(b"1234".to_vec())),
            MetricValue::text("1234")
        );
        assert_eq!(convert_value(&Value::Int(-3)), MetricValue::Int(-3));
        assert_eq!(convert_value(&Value::UInt(7)), MetricValue::Int(7));
        assert_eq!(
            convert_value(&Value::UInt(u64::MAX)),
            MetricValue::text(u64::MAX.to_string())
        );
        assert_eq!(convert_value(&Value::Double(0.25)), MetricValue::Float(0.25));
    }

    #[test]
    fn io_errors_take_the_context_code() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = map_error(::mysql::Error::IoError(io), CR_SERVER_LOST);
        assert!(err.is_connection_lost());
    }

    #[test]
    fn desynchronised_stream_counts_as_lost() {
        for driver in [
            ::mysql::DriverError::PacketOutOfSync,
            ::mysql::DriverError::UnexpectedPacket,
            ::mysql::DriverError::Timeout,
        ] {
            let err = map_error(::mysql::Error::DriverError(driver), CR_CONN_HOST_ERROR);
            assert_eq!(err.code, CR_SERVER_LOST);
            assert!(err.is_connection_lost());
        }
    }

    #[test]
    fn only_server_errors_keep_the_session() {
        let server = ::mysql::Error::MySqlError(::mysql::MySqlError {
            state: "42S02".to_string(),
            message: "Table 'x' doesn't exist".to_string(),
            code: 1146,
        });
        assert!(!breaks_stream(&server));
        assert_eq!(map_error(server, CR_SERVER_LOST).code, 1146);

        let driver = ::mysql::Error::DriverError(::mysql::DriverError::PacketTooLarge);
        assert!(breaks_stream(&driver));
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(breaks_stream(&::mysql::Error::IoError(io)));
    }

    #[test]
    fn describe_hides_password() {
        let config = MysqlConfig {
            password: "secret".to_string(),
            ..MysqlConfig::default()
        };
        let connector = MysqlConnector::new(&config);
        assert_eq!(connector.describe(), "root@localhost:3306");
    }
}
