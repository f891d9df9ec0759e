//! Counting drain barrier for in-flight connection handlers.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;

use futures_util::future::poll_fn;
use futures_util::task::AtomicWaker;

/// Tracks in-flight handlers so shutdown can wait for all of them to finish.
///
/// A [`WaitGroupGuard`] is acquired when a handler is dispatched and released
/// when it drops, on every exit path. [`WaitGroup::wait`] resolves once the
/// count reaches zero.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    waker: AtomicWaker,
}

impl WaitGroup {
    /// Create an empty wait group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a guard, incrementing the in-flight count.
    pub fn guard(&self) -> WaitGroupGuard {
        self.inner.count.fetch_add(1, Ordering::Release);
        WaitGroupGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// The number of guards currently alive.
    pub fn in_flight(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolve once every guard has been dropped.
    ///
    /// Returns immediately if the count is already zero. Guards acquired
    /// after `wait` resolves are not waited for.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.in_flight() == 0 {
                return Poll::Ready(());
            }
            self.inner.waker.register(cx.waker());
            // Re-check after registering: the last guard may have dropped in
            // between and already consumed the previous waker.
            if self.in_flight() == 0 {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

/// Guard representing one in-flight handler.
pub struct WaitGroupGuard {
    inner: Arc<Inner>,
}

impl fmt::Debug for WaitGroupGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGroupGuard").finish()
    }
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_empty() {
        let group = WaitGroup::new();
        group.wait().await;
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn wait_blocks_until_guards_drop() {
        let group = WaitGroup::new();
        let first = group.guard();
        let second = group.guard();
        assert_eq!(group.in_flight(), 2);

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });

        group.wait().await;
        assert_eq!(group.in_flight(), 0);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn guard_released_on_panic_path() {
        let group = WaitGroup::new();
        let guard = group.guard();

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("handler failed");
        });

        assert!(task.await.is_err());
        group.wait().await;
        assert_eq!(group.in_flight(), 0);
    }
}
