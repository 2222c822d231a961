//! Runs the daemon's long-lived units and coordinates their shutdown.
//!
//! Each [`Unit`] runs on its own named thread with a clone of the shared
//! [`ShutdownToken`]. The orchestrator waits for events:
//!
//! - a signal (from [`install_signal_handler`] or a [`SignalHandle`])
//!   cancels the token once; later signals are only logged;
//! - a unit exiting while no shutdown was requested, or exiting with an
//!   error, is fatal and cancels the token for the others.
//!
//! [`Orchestrator::run`] returns only after every unit has terminated.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::poller::PollerError;
use crate::sender::SenderError;
use crate::shutdown::ShutdownToken;

/// Default period of the liveness check.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Failure reported by a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitError(pub String);

impl std::fmt::Display for UnitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UnitError {}

impl From<PollerError> for UnitError {
    fn from(e: PollerError) -> Self {
        UnitError(e.to_string())
    }
}

impl From<SenderError> for UnitError {
    fn from(e: SenderError) -> Self {
        UnitError(e.to_string())
    }
}

type UnitFn = Box<dyn FnOnce(ShutdownToken) -> Result<(), UnitError> + Send>;

/// A named long-lived activity. It must return once the token is cancelled.
pub struct Unit {
    name: String,
    run: UnitFn,
}

impl Unit {
    pub fn new(
        name: impl Into<String>,
        run: impl FnOnce(ShutdownToken) -> Result<(), UnitError> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit stopped after a shutdown request.
    Clean,
    /// A unit failed or stopped on its own.
    Fatal,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::Fatal => 1,
        }
    }
}

enum Event {
    Signal,
    Exited {
        unit: String,
        result: Result<(), UnitError>,
    },
}

/// Requests shutdown from outside the orchestrator (signal handlers, tests).
#[derive(Clone)]
pub struct SignalHandle {
    tx: mpsc::Sender<Event>,
}

impl SignalHandle {
    pub fn notify(&self) {
        // The orchestrator may already be gone; nothing left to stop then.
        let _ = self.tx.send(Event::Signal);
    }
}

/// Routes SIGINT/SIGTERM/SIGHUP to `handle`.
pub fn install_signal_handler(handle: SignalHandle) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || handle.notify())
}

pub struct Orchestrator {
    shutdown: ShutdownToken,
    tx: mpsc::Sender<Event>,
    rx: Receiver<Event>,
    liveness_interval: Duration,
}

struct Running {
    name: String,
    handle: JoinHandle<()>,
}

impl Orchestrator {
    pub fn new(shutdown: ShutdownToken) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            shutdown,
            tx,
            rx,
            liveness_interval: LIVENESS_INTERVAL,
        }
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn signal_handle(&self) -> SignalHandle {
        SignalHandle {
            tx: self.tx.clone(),
        }
    }

    /// Starts `units` and blocks until all of them have terminated.
    pub fn run(self, units: Vec<Unit>) -> RunOutcome {
        let mut outcome = RunOutcome::Clean;
        let mut running = Vec::new();

        for unit in units {
            match self.spawn(unit) {
                Ok(r) => running.push(r),
                Err(e) => {
                    error!(error = %e, "failed to start unit");
                    outcome = RunOutcome::Fatal;
                    self.shutdown.cancel();
                }
            }
        }

        while !running.is_empty() {
            let event = match self.rx.recv_timeout(self.liveness_interval) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                // Unreachable while `self.tx` is alive.
                Err(RecvTimeoutError::Disconnected) => break,
            };

            // Snapshot before draining: a finished unit has already queued its event.
            let finished: Vec<String> = running
                .iter()
                .filter(|r| r.handle.is_finished())
                .map(|r| r.name.clone())
                .collect();

            let pending = event.into_iter().chain(self.rx.try_iter());
            for event in pending.collect::<Vec<_>>() {
                match event {
                    Event::Signal => self.on_signal(),
                    Event::Exited { unit, result } => {
                        if let Some(pos) = running.iter().position(|r| r.name == unit) {
                            join(running.swap_remove(pos));
                        }
                        if !self.on_exit(&unit, result) {
                            outcome = RunOutcome::Fatal;
                        }
                    }
                }
            }

            for name in finished {
                if let Some(pos) = running.iter().position(|r| r.name == name) {
                    error!(unit = %name, "unit terminated without reporting");
                    join(running.swap_remove(pos));
                    outcome = RunOutcome::Fatal;
                    self.shutdown.cancel();
                }
            }
        }

        match outcome {
            RunOutcome::Clean => info!("all units stopped"),
            RunOutcome::Fatal => error!("stopped after a fatal error"),
        }
        outcome
    }

    fn spawn(&self, unit: Unit) -> std::io::Result<Running> {
        let tx = self.tx.clone();
        let token = self.shutdown.clone();
        let Unit { name, run } = unit;
        let unit_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(move || run(token)))
                .unwrap_or_else(|payload| Err(UnitError(panic_message(payload.as_ref()))));
            let _ = tx.send(Event::Exited {
                unit: unit_name,
                result,
            });
        })?;

        info!(unit = %name, "unit started");
        Ok(Running { name, handle })
    }

    fn on_signal(&self) {
        if self.shutdown.cancel() {
            info!("shutdown requested, stopping units");
        } else {
            info!("shutdown already in progress");
        }
    }

    /// Logs a unit exit. Returns false if the exit is fatal.
    fn on_exit(&self, unit: &str, result: Result<(), UnitError>) -> bool {
        let clean = match result {
            Ok(()) if self.shutdown.is_cancelled() => {
                info!(unit, "unit stopped");
                true
            }
            Ok(()) => {
                error!(unit, "unit exited unexpectedly");
                false
            }
            Err(e) => {
                error!(unit, error = %e, "unit failed");
                false
            }
        };
        if !clean {
            self.shutdown.cancel();
        }
        clean
    }
}

fn join(running: Running) {
    if running.handle.join().is_err() {
        warn!(unit = %running.name, "unit thread panicked");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
