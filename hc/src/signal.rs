//! One-shot termination signal

use tokio::sync::watch;
use tracing::debug;

/// Raised once to let the main flow proceed to shutdown
///
/// Cloning yields another handle to the same signal. Triggering more than
/// once has no further effect.
#[derive(Clone)]
pub struct TerminationSignal {
    tx: watch::Sender<bool>,
}

impl TerminationSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Raise the signal; returns false if it was already raised
    pub fn trigger(&self) -> bool {
        let raised = self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
        debug!(raised, "TerminationSignal::trigger: called");
        raised
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is raised, with no time limit
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let signal = TerminationSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert!(signal.trigger());
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_trigger_before_wait() {
        let signal = TerminationSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_trigger_only_once() {
        let signal = TerminationSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }
}
