//! Cooperative cancellation for the accept loops and long-running calls.
//!
//! A [`CancelSource`] owns the signal; any number of [`CancelToken`]s observe
//! it, either by polling [`CancelToken::is_cancelled`] at timeout ticks or by
//! awaiting [`CancelToken::cancelled`]. Firing the source is idempotent and
//! safe from any task.

use tokio::sync::watch;

/// The owning side of a cancellation signal.
///
/// Dropping the source fires its tokens: a signal that can no longer be
/// raised deliberately is treated as raised, so loops holding a token never
/// wait on a sender that is gone.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    /// Create a new, un-fired cancellation source.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Raise the signal. Idempotent, callable from any task.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Mint a new token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is raised (or the source is dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
