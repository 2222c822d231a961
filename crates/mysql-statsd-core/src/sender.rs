//! Queue consumer applying per-kind emission semantics.
//!
//! Counter, gauge and timer samples are forwarded as-is. Delta samples are
//! turned into the positive change since the previous observation of the
//! same key and emitted as counter increments.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::metric::{MetricKind, MetricSample, Numeric};
use crate::queue::{QueueConsumer, Recv};
use crate::shutdown::ShutdownToken;

/// How long one dequeue may block before the shutdown flag is rechecked.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Metrics backend. Sends are fire-and-forget.
pub trait MetricsSink: Send {
    fn send_counter(&mut self, key: &str, value: Numeric) -> io::Result<()>;
    fn send_gauge(&mut self, key: &str, value: Numeric) -> io::Result<()>;
    fn send_timer(&mut self, key: &str, value: Numeric) -> io::Result<()>;
}

/// Last observed raw value per delta key.
#[derive(Debug, Default)]
pub struct DeltaState {
    previous: HashMap<String, Numeric>,
}

impl DeltaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` for `key` and returns the positive change, if any.
    ///
    /// The first observation only sets the baseline. A decrease (counter
    /// reset) yields nothing but still replaces the stored value.
    pub fn observe(&mut self, key: &str, current: Numeric) -> Option<Numeric> {
        let previous = self.previous.insert(key.to_string(), current)?;
        let delta = current.sub(previous);
        delta.is_positive().then_some(delta)
    }

    pub fn previous(&self, key: &str) -> Option<Numeric> {
        self.previous.get(key).copied()
    }
}

/// Unexpected sender failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SenderError {
    /// The producer went away while no shutdown was requested.
    QueueClosed,
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::QueueClosed => write!(f, "metric queue closed unexpectedly"),
        }
    }
}

impl std::error::Error for SenderError {}

pub struct Sender<S: MetricsSink> {
    queue: QueueConsumer,
    sink: S,
    deltas: DeltaState,
    shutdown: ShutdownToken,
    recv_timeout: Duration,
    sent: u64,
}

impl<S: MetricsSink> Sender<S> {
    pub fn new(queue: QueueConsumer, sink: S, shutdown: ShutdownToken) -> Self {
        Self {
            queue,
            sink,
            deltas: DeltaState::new(),
            shutdown,
            recv_timeout: RECV_TIMEOUT,
            sent: 0,
        }
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Samples emitted so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Consumes the queue until the producer is gone.
    ///
    /// Shutdown does not stop the sender by itself: the poller may still be
    /// finishing a query, so everything it enqueues before dropping its end
    /// is emitted.
    pub fn run(&mut self) -> Result<(), SenderError> {
        info!("sender started");
        let mut draining = false;
        loop {
            if !draining && self.shutdown.is_cancelled() {
                debug!("shutdown requested, draining queue");
                draining = true;
            }

            match self.queue.recv_timeout(self.recv_timeout) {
                Recv::Sample(sample) => self.handle(sample),
                Recv::Timeout => {}
                Recv::Closed if self.shutdown.is_cancelled() => {
                    info!(sent = self.sent, "sender stopped");
                    return Ok(());
                }
                Recv::Closed => return Err(SenderError::QueueClosed),
            }
        }
    }

    /// Emits one sample according to its kind.
    pub fn handle(&mut self, sample: MetricSample) {
        let Some(value) = sample.value.to_numeric() else {
            debug!(key = %sample.key, value = %sample.value, "dropping non-numeric sample");
            return;
        };

        let key = sample.key.as_str();
        let result = match sample.kind {
            MetricKind::Counter => self.sink.send_counter(key, value),
            MetricKind::Gauge => self.sink.send_gauge(key, value),
            MetricKind::Timer => self.sink.send_timer(key, value),
            MetricKind::Delta => match self.deltas.observe(key, value) {
                Some(delta) => self.sink.send_counter(key, delta),
                None => return,
            },
        };

        match result {
            Ok(()) => {
                self.sent += 1;
                trace!(key, kind = %sample.kind, "sent");
            }
            Err(e) => warn!(key, error = %e, "send failed"),
        }
    }
}

/// One call received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Counter(String, Numeric),
    Gauge(String, Numeric),
    Timer(String, Numeric),
}

/// In-memory sink for tests. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: SinkCall) -> io::Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        Ok(())
    }
}

impl MetricsSink for RecordingSink {
    fn send_counter(&mut self, key: &str, value: Numeric) -> io::Result<()> {
        self.record(SinkCall::Counter(key.to_string(), value))
    }

    fn send_gauge(&mut self, key: &str, value: Numeric) -> io::Result<()> {
        self.record(SinkCall::Gauge(key.to_string(), value))
    }

    fn send_timer(&mut self, key: &str, value: Numeric) -> io::Result<()> {
        self.record(SinkCall::Timer(key.to_string(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricValue;
    use crate::queue::MetricQueue;
    use std::thread;

    fn sample(key: &str, value: MetricValue, kind: MetricKind) -> MetricSample {
        MetricSample::new(key, value, kind)
    }

    fn sender() -> (Sender<RecordingSink>, RecordingSink) {
        let (_tx, rx) = MetricQueue::bounded(10);
        let sink = RecordingSink::new();
        (Sender::new(rx, sink.clone(), ShutdownToken::new()), sink)
    }

    #[test]
    fn delta_baseline_increase_and_reset() {
        let mut state = DeltaState::new();
        assert_eq!(state.observe("k", Numeric::Int(10)), None);
        assert_eq!(state.previous("k"), Some(Numeric::Int(10)));
        assert_eq!(state.observe("k", Numeric::Int(15)), Some(Numeric::Int(5)));
        assert_eq!(state.observe("k", Numeric::Int(12)), None);
        assert_eq!(state.previous("k"), Some(Numeric::Int(12)));
        assert_eq!(state.observe("k", Numeric::Int(12)), None);
        assert_eq!(state.observe("other", Numeric::Int(1)), None);
    }

    #[test]
    fn kinds_map_to_sink_calls() {
        let (mut sender, sink) = sender();
        sender.handle(sample("c", MetricValue::Int(3), MetricKind::Counter));
        sender.handle(sample("g", MetricValue::text("0.50"), MetricKind::Gauge));
        sender.handle(sample("t", MetricValue::Float(12.5), MetricKind::Timer));
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Counter("c".into(), Numeric::Int(3)),
                SinkCall::Gauge("g".into(), Numeric::Float(0.5)),
                SinkCall::Timer("t".into(), Numeric::Float(12.5)),
            ]
        );
        assert_eq!(sender.sent(), 3);
    }

    #[test]
    fn delta_samples_emit_positive_change_as_counter() {
        let (mut sender, sink) = sender();
        for v in ["10", "15", "12", "20"] {
            sender.handle(sample("q", MetricValue::text(v), MetricKind::Delta));
        }
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Counter("q".into(), Numeric::Int(5)),
                SinkCall::Counter("q".into(), Numeric::Int(8)),
            ]
        );
    }

    #[test]
    fn null_and_text_are_dropped_without_state() {
        let (mut sender, sink) = sender();
        sender.handle(sample("q", MetricValue::Int(10), MetricKind::Delta));
        sender.handle(sample("q", MetricValue::Null, MetricKind::Delta));
        sender.handle(sample("io", MetricValue::text("Yes"), MetricKind::Gauge));
        sender.handle(sample("q", MetricValue::Int(11), MetricKind::Delta));
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Counter("q".into(), Numeric::Int(1))]
        );
    }

    #[test]
    fn run_drains_queue_on_shutdown() {
        let (tx, rx) = MetricQueue::bounded(10);
        let token = ShutdownToken::new();
        let sink = RecordingSink::new();
        let mut sender =
            Sender::new(rx, sink.clone(), token.clone()).with_recv_timeout(Duration::from_millis(10));

        tx.push(sample("a", MetricValue::Int(1), MetricKind::Gauge), &token)
            .unwrap();
        tx.push(sample("b", MetricValue::Int(2), MetricKind::Gauge), &token)
            .unwrap();
        token.cancel();
        drop(tx);

        assert_eq!(sender.run(), Ok(()));
        assert_eq!(sink.calls().len(), 2);
    }

    #[test]
    fn run_consumes_until_cancelled() {
        let (tx, rx) = MetricQueue::bounded(10);
        let token = ShutdownToken::new();
        let sink = RecordingSink::new();
        let mut sender =
            Sender::new(rx, sink.clone(), token.clone()).with_recv_timeout(Duration::from_millis(10));
        let handle = thread::spawn(move || sender.run());

        tx.push(sample("a", MetricValue::Int(1), MetricKind::Counter), &token)
            .unwrap();
        while sink.calls().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        token.cancel();
        drop(tx);
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(sink.calls(), vec![SinkCall::Counter("a".into(), Numeric::Int(1))]);
    }

    #[test]
    fn samples_enqueued_after_shutdown_are_still_sent() {
        let (tx, rx) = MetricQueue::bounded(10);
        let token = ShutdownToken::new();
        let sink = RecordingSink::new();
        let mut sender =
            Sender::new(rx, sink.clone(), token.clone()).with_recv_timeout(Duration::from_millis(10));
        token.cancel();
        let handle = thread::spawn(move || sender.run());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        tx.push(sample("late", MetricValue::Int(7), MetricKind::Gauge), &token)
            .unwrap();
        drop(tx);
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(sink.calls(), vec![SinkCall::Gauge("late".into(), Numeric::Int(7))]);
    }

    #[test]
    fn producer_gone_without_shutdown_is_an_error() {
        let (tx, rx) = MetricQueue::bounded(10);
        drop(tx);
        let mut sender = Sender::new(rx, RecordingSink::new(), ShutdownToken::new())
            .with_recv_timeout(Duration::from_millis(10));
        assert_eq!(sender.run(), Err(SenderError::QueueClosed));
    }
}
