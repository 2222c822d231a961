//! mysql-statsd - MySQL metrics forwarder.
//!
//! Polls a MySQL server with a set of status queries and forwards the
//! allow-listed results to statsd.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use mysql_statsd_core::clock::SystemClock;
use mysql_statsd_core::config::{Config, ConfigError};
use mysql_statsd_core::db::MysqlConnector;
use mysql_statsd_core::orchestrator::{
    Orchestrator, RunOutcome, Unit, UnitError, install_signal_handler,
};
use mysql_statsd_core::poller::Poller;
use mysql_statsd_core::queue::MetricQueue;
use mysql_statsd_core::sender::Sender;
use mysql_statsd_core::shutdown::ShutdownToken;
use mysql_statsd_core::statsd::StatsdClient;

/// MySQL to statsd metrics forwarder.
#[derive(Parser, Debug)]
#[command(name = "mysql-statsd", about = "MySQL to statsd metrics forwarder", version)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "/etc/mysql-statsd.json")]
    config: PathBuf,

    /// MySQL host, overrides the configuration file.
    #[arg(long, env = "MYSQL_HOST")]
    mysql_host: Option<String>,

    /// MySQL port, overrides the configuration file.
    #[arg(long, env = "MYSQL_PORT")]
    mysql_port: Option<u16>,

    /// MySQL user, overrides the configuration file.
    #[arg(long, env = "MYSQL_USER")]
    mysql_user: Option<String>,

    /// MySQL password, overrides the configuration file.
    #[arg(long, env = "MYSQL_PWD", hide_env_values = true)]
    mysql_password: Option<String>,

    /// Statsd host, overrides the configuration file.
    #[arg(long, env = "STATSD_HOST")]
    statsd_host: Option<String>,

    /// Statsd port, overrides the configuration file.
    #[arg(long, env = "STATSD_PORT")]
    statsd_port: Option<u16>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Applies command-line and environment overrides on top of the file.
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.mysql_host {
            config.mysql.host = host.clone();
        }
        if let Some(port) = self.mysql_port {
            config.mysql.port = port;
        }
        if let Some(ref user) = self.mysql_user {
            config.mysql.username = user.clone();
        }
        if let Some(ref password) = self.mysql_password {
            config.mysql.password = password.clone();
        }
        if let Some(ref host) = self.statsd_host {
            config.statsd.host = host.clone();
        }
        if let Some(port) = self.statsd_port {
            config.statsd.port = port;
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["mysql_statsd", "mysql_statsd_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run(config: Config) -> RunOutcome {
    let sink = match StatsdClient::connect(&config.statsd) {
        Ok(sink) => sink,
        Err(e) => {
            error!(
                "Cannot open statsd socket to {}:{}: {}",
                config.statsd.host, config.statsd.port, e
            );
            return RunOutcome::Fatal;
        }
    };

    let shutdown = ShutdownToken::new();
    let orchestrator = Orchestrator::new(shutdown);
    if let Err(e) = install_signal_handler(orchestrator.signal_handle()) {
        warn!("Failed to set signal handler: {}", e);
    }

    let (producer, consumer) = MetricQueue::bounded(config.queue_capacity());
    let units = vec![
        Unit::new("poller", move |token| {
            let connector = MysqlConnector::new(&config.mysql);
            let mut poller = Poller::new(connector, SystemClock, &config, producer, token);
            poller.run().map_err(UnitError::from)
        }),
        Unit::new("sender", move |token| {
            let mut sender = Sender::new(consumer, sink, token);
            sender.run().map_err(UnitError::from)
        }),
    ];

    orchestrator.run(units)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("mysql-statsd {} starting", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    info!(
        "Config: mysql={}:{}, statsd={}:{}, checks={}, metrics={}",
        config.mysql.host,
        config.mysql.port,
        config.statsd.host,
        config.statsd.port,
        config.checks().len(),
        config.metrics.len()
    );

    let outcome = run(config);
    info!("Exiting with code {}", outcome.exit_code());
    process::exit(outcome.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let args = Args::try_parse_from([
            "mysql-statsd",
            "--config",
            "/tmp/x.json",
            "--mysql-host",
            "db2",
            "--mysql-port",
            "3307",
            "--statsd-port",
            "9125",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.mysql.host, "db2");
        assert_eq!(config.mysql.port, 3307);
        assert_eq!(config.statsd.port, 9125);
        assert_eq!(config.mysql.username, "root");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::try_parse_from(["mysql-statsd", "-c", "/nonexistent/mysql-statsd.json"])
            .unwrap();
        assert!(matches!(load_config(&args), Err(ConfigError::Io(_))));
    }
}
