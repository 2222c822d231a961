//! Minimal statsd client over UDP.
//!
//! Each sample is one datagram in the plain line protocol:
//! `<prefix>[.<hostname>].<key>:<value>|<type>` with type `c`, `g` or `ms`.

use std::io;
use std::net::UdpSocket;
use std::process;

use tracing::debug;

use crate::config::StatsdConfig;
use crate::metric::Numeric;
use crate::sender::MetricsSink;

/// Statsd metric type suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatType {
    Counter,
    Gauge,
    Timer,
}

impl StatType {
    fn suffix(self) -> &'static str {
        match self {
            StatType::Counter => "c",
            StatType::Gauge => "g",
            StatType::Timer => "ms",
        }
    }
}

pub struct StatsdClient {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdClient {
    /// Binds an ephemeral local port and connects it to the configured endpoint.
    pub fn connect(config: &StatsdConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((config.host.as_str(), config.port))?;

        let hostname = if config.include_hostname {
            Some(
                config
                    .hostname
                    .clone()
                    .unwrap_or_else(local_hostname),
            )
        } else {
            None
        };
        let prefix = key_prefix(&config.prefix, hostname.as_deref());
        debug!(endpoint = %format!("{}:{}", config.host, config.port), prefix = %prefix, "statsd client ready");

        Ok(Self { socket, prefix })
    }

    fn send(&self, key: &str, value: Numeric, stat: StatType) -> io::Result<()> {
        let line = format_line(&self.prefix, key, value, stat);
        self.socket.send(line.as_bytes()).map(|_| ())
    }
}

impl MetricsSink for StatsdClient {
    fn send_counter(&mut self, key: &str, value: Numeric) -> io::Result<()> {
        self.send(key, value, StatType::Counter)
    }

    fn send_gauge(&mut self, key: &str, value: Numeric) -> io::Result<()> {
        self.send(key, value, StatType::Gauge)
    }

    fn send_timer(&mut self, key: &str, value: Numeric) -> io::Result<()> {
        self.send(key, value, StatType::Timer)
    }
}

/// `prefix` plus the hostname with its dots replaced, so it stays one key segment.
pub fn key_prefix(prefix: &str, hostname: Option<&str>) -> String {
    let mut segments: Vec<String> = Vec::new();
    if !prefix.is_empty() {
        segments.push(prefix.to_string());
    }
    if let Some(host) = hostname.filter(|h| !h.is_empty()) {
        segments.push(host.replace('.', "_"));
    }
    segments.join(".")
}

pub fn format_line(prefix: &str, key: &str, value: Numeric, stat: StatType) -> String {
    if prefix.is_empty() {
        format!("{}:{}|{}", key, value, stat.suffix())
    } else {
        format!("{}.{}:{}|{}", prefix, key, value, stat.suffix())
    }
}

/// Machine hostname via the `hostname` command, `localhost` if unavailable.
fn local_hostname() -> String {
    process::Command::new("hostname")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
