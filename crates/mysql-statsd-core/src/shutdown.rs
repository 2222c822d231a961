//! Cooperative cancellation shared by the daemon's units.
//!
//! Units check [`ShutdownToken::is_cancelled`] before each unit of work and
//! sleep through [`ShutdownToken::wait_timeout`], which returns as soon as
//! the token is cancelled.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Cloneable stop signal. All clones observe the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Returns true only for the call that flipped the token.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *cancelled {
            return false;
        }
        *cancelled = true;
        self.inner.cond.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps up to `timeout`, waking early on cancellation.
    ///
    /// Returns true if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }
        *cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_is_idempotent() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn wait_times_out_when_not_cancelled() {
        let token = ShutdownToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_wakes_on_cancel() {
        let token = ShutdownToken::new();
        let other = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.cancel();
        });
        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
