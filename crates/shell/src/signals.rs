// SPDX-License-Identifier: MIT

//! Cancellation propagation for a running process pool, grounded on
//! `spec.md` §4.3/§5: "A pool receiving SIGTERM or SIGINT propagates the
//! signal to all live children, waits briefly, then hard-kills survivors."

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Grace period between SIGTERM delivery to children and a hard SIGKILL of
/// survivors (`spec.md` §5).
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Shared cancellation flag threaded through a run's process pool and its
/// heartbeat worker. Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    signal: Arc<AtomicI32>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            signal: Arc::new(AtomicI32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Mark the token cancelled by `signal` (a `libc`-style signal number,
    /// e.g. 15 for SIGTERM, 2 for SIGINT) and wake every waiter. Idempotent:
    /// a signal caught "exactly once" per `spec.md` §5 is enforced by the
    /// caller checking `is_cancelled()` before calling this again.
    pub fn cancel(&self, signal: i32) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.signal.store(signal, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The signal that triggered cancellation, if any.
    pub fn signal(&self) -> Option<i32> {
        self.is_cancelled().then(|| self.signal.load(Ordering::SeqCst))
    }

    /// Resolve once `cancel` has been called. Safe to call from multiple
    /// tasks; all are woken.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Install OS-level SIGTERM/SIGINT listeners that cancel `token` on receipt.
/// Unix-only: the engine targets Linux execution hosts per `spec.md` §5
/// (driver processes coordinate purely through the filesystem).
#[cfg(unix)]
pub fn install_signal_handlers(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::warn!("received SIGTERM, cancelling run");
                token.cancel(15);
            }
            _ = sigint.recv() => {
                tracing::warn!("received SIGINT, cancelling run");
                token.cancel(2);
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel(15);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter woke in time")
            .expect("task joined");
        assert_eq!(token.signal(), Some(15));
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel(2);
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("resolved immediately");
    }

    #[test]
    fn first_signal_wins() {
        let token = CancellationToken::new();
        token.cancel(15);
        token.cancel(2);
        assert_eq!(token.signal(), Some(15));
    }
}
