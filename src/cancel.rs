//! Cooperative cancellation signal observed by the loader and pacer workers.
//!
//! `stop()` sets the token; both workers poll it at their natural suspension points
//! (the loader between windows, the pacer between drain cycles) rather than being
//! interrupted mid-flight. No record already handed to the [`BrokerPublisher`](crate::broker::BrokerPublisher)
//! is cancelled.

use tokio::sync::watch;

/// Handle used by the coordinator to request a cooperative stop.
#[derive(Debug, Clone)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

/// Handle polled by workers to observe a cooperative stop request.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Construct a linked [`CancelTrigger`] / [`CancelToken`] pair, unset initially.
pub fn cancel_pair() -> (CancelTrigger, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelToken { rx })
}

impl CancelTrigger {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// True once [`CancelTrigger::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_token_observes_trigger() {
        let (trigger, mut token) = cancel_pair();
        assert!(!token.is_cancelled());

        trigger.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_not_set_initially() {
        let (_trigger, token) = cancel_pair();
        assert!(!token.is_cancelled());
    }
}
