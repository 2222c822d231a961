//! Bounded FIFO between the poller (single producer) and the sender
//! (single consumer).
//!
//! A full queue applies backpressure: the producer waits in short steps,
//! giving up only when shutdown is requested.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use crate::metric::MetricSample;
use crate::shutdown::ShutdownToken;

/// Wait between retries while the queue is full.
const FULL_RETRY: Duration = Duration::from_millis(50);

/// The consumer side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("metric queue closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Outcome of a blocking dequeue.
#[derive(Debug, PartialEq)]
pub enum Recv {
    Sample(MetricSample),
    Timeout,
    /// Producer dropped and the queue is drained.
    Closed,
}

pub struct MetricQueue;

impl MetricQueue {
    /// Creates a queue holding at most `capacity` samples.
    pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (QueueProducer { tx }, QueueConsumer { rx })
    }
}

/// Producer handle, owned by the poller.
pub struct QueueProducer {
    tx: SyncSender<MetricSample>,
}

impl QueueProducer {
    /// Enqueues `sample`, waiting while the queue is full.
    ///
    /// Returns `Ok(false)` if shutdown was requested before the sample
    /// fit; the sample is then dropped.
    pub fn push(&self, sample: MetricSample, shutdown: &ShutdownToken) -> Result<bool, QueueClosed> {
        let mut sample = sample;
        loop {
            match self.tx.try_send(sample) {
                Ok(()) => return Ok(true),
                Err(TrySendError::Disconnected(_)) => return Err(QueueClosed),
                Err(TrySendError::Full(back)) => {
                    if shutdown.wait_timeout(FULL_RETRY) {
                        return Ok(false);
                    }
                    sample = back;
                }
            }
        }
    }
}

/// Consumer handle, owned by the sender.
pub struct QueueConsumer {
    rx: Receiver<MetricSample>,
}

impl QueueConsumer {
    pub fn recv_timeout(&self, timeout: Duration) -> Recv {
        match self.rx.recv_timeout(timeout) {
            Ok(sample) => Recv::Sample(sample),
            Err(RecvTimeoutError::Timeout) => Recv::Timeout,
            Err(RecvTimeoutError::Disconnected) => Recv::Closed,
        }
    }

    /// Takes whatever is queued right now without blocking.
    pub fn drain(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(sample) => samples.push(sample),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return samples,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricKind, MetricValue};
    use std::thread;

    fn sample(key: &str) -> MetricSample {
        MetricSample::new(key, MetricValue::Int(1), MetricKind::Gauge)
    }

    #[test]
    fn fifo_order() {
        let (tx, rx) = MetricQueue::bounded(4);
        let token = ShutdownToken::new();
        tx.push(sample("a"), &token).unwrap();
        tx.push(sample("b"), &token).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Recv::Sample(sample("a")));
        assert_eq!(rx.drain(), vec![sample("b")]);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Recv::Timeout);
    }

    #[test]
    fn full_queue_waits_for_consumer() {
        let (tx, rx) = MetricQueue::bounded(1);
        let token = ShutdownToken::new();
        tx.push(sample("a"), &token).unwrap();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let first = rx.drain();
            let second = rx.recv_timeout(Duration::from_secs(5));
            (first, second)
        });
        assert_eq!(tx.push(sample("b"), &token), Ok(true));
        let (first, second) = handle.join().unwrap();
        assert_eq!(first, vec![sample("a")]);
        assert_eq!(second, Recv::Sample(sample("b")));
    }

    #[test]
    fn full_queue_gives_up_on_shutdown() {
        let (tx, _rx) = MetricQueue::bounded(1);
        let token = ShutdownToken::new();
        tx.push(sample("a"), &token).unwrap();
        token.cancel();
        assert_eq!(tx.push(sample("b"), &token), Ok(false));
    }

    #[test]
    fn closed_ends() {
        let (tx, rx) = MetricQueue::bounded(2);
        let token = ShutdownToken::new();
        tx.push(sample("a"), &token).unwrap();
        drop(tx);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Recv::Sample(sample("a")));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Recv::Closed);

        let (tx, rx) = MetricQueue::bounded(2);
        drop(rx);
        assert_eq!(tx.push(sample("a"), &token), Err(QueueClosed));
    }
}
