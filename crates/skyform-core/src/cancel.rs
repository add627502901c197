//! Run-wide cancellation channel.
//!
//! A single [`CancelToken`] is shared by every task of a run. It is set
//! either by the operator interrupt task or by the coordinator when the
//! run reaches a terminal state. Setting it is idempotent and wakes every
//! task currently parked in [`CancelToken::cancelled`].
//!
//! The interrupt path only ever calls [`CancelToken::cancel`]: no state
//! mutation and no I/O happen there. Logging and teardown happen in the
//! coordinator after it observes the flag.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Atomic cancellation flag plus a broadcast wake.
#[derive(Debug, Default)]
pub struct CancelToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,

    /// Wakes every waiter when the flag is first set.
    notify: Notify,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Returns `true` if this call set the flag, `false` if it was
    /// already set.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Wait until cancellation has been requested.
    ///
    /// Returns immediately if the flag is already set. The waiter is
    /// registered before the flag is re-checked, so a `cancel` racing
    /// with this call is never missed.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn initial_state_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_set() {
        let token = CancelToken::new();
        token.cancel();
        let waited = tokio::time::timeout(Duration::from_millis(100), token.cancelled()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn cancel_wakes_every_waiter() {
        let token = Arc::new(CancelToken::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let t = Arc::clone(&token);
            waiters.push(tokio::spawn(async move { t.cancelled().await }));
        }
        tokio::task::yield_now().await;
        token.cancel();
        for waiter in waiters {
            let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
            assert!(matches!(joined, Ok(Ok(()))));
        }
    }
}
