//! Cooperative cancellation token
//!
//! A clonable token threaded through every orchestration call. Cancellation
//! is observed either by polling [`CancelToken::is_cancelled`] inside loops
//! or by awaiting [`CancelToken::cancelled`] in a race against other work.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clonable cancellation token
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    tx: async_channel::Sender<()>,
    rx: async_channel::Receiver<()>,
}

impl CancelToken {
    /// Create a fresh, untripped token
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        }
    }

    /// Trip the token, waking every task awaiting [`CancelToken::cancelled`]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Closing the channel wakes all pending receivers at once.
        self.tx.close();
    }

    /// Whether the token has been tripped
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is tripped
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Nothing is ever sent; recv only resolves when the channel closes.
        let _ = self.rx.recv().await;
    }

    /// Fail with an orchestrator abort if the token has been tripped
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::orchestrator(format!("{} aborted by cancellation", during)))
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check("test").is_ok());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.check("test").is_err());
    }

    #[smol_potat::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let task = smol::spawn(async move {
            waiter.cancelled().await;
            true
        });

        smol::Timer::after(Duration::from_millis(10)).await;
        token.cancel();
        assert!(task.await);
    }

    #[smol_potat::test]
    async fn test_cancelled_returns_immediately_when_tripped() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
