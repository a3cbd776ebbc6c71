//! Broker connection establishment with bounded retries

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::broker::{Connection, Connector};
use crate::config::ConnectionConfig;
use crate::error::{BrokerError, ConnectError};

/// Fixed-interval retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

impl From<&ConnectionConfig> for RetryPolicy {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            interval: config.retry_interval(),
        }
    }
}

/// Opens the participant's single broker connection
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    attempts: AtomicU32,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        debug!(?policy, "ConnectionManager::new: called");
        Self {
            connector,
            policy,
            attempts: AtomicU32::new(0),
        }
    }

    /// Attempts made so far, across every call
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Connect, retrying on failure
    ///
    /// Returns exactly once: either the live connection or the terminal
    /// failure after `max_attempts` attempts.
    pub async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>, ConnectError> {
        let mut last = BrokerError::ConnectionClosed;

        for attempt in 1..=self.policy.max_attempts {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            info!(%address, attempt, "Trying to connect to broker");

            match self.connector.connect(address).await {
                Ok(connection) => {
                    info!(%address, attempt, "Got a new connection");
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(%address, attempt, error = %e, "Connection attempt failed");
                    last = e;
                }
            }

            if attempt < self.policy.max_attempts {
                debug!(interval = ?self.policy.interval, "ConnectionManager::connect: sleeping before retry");
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        error!(%address, attempts = self.policy.max_attempts, error = %last, "Giving up on broker connection");
        Err(ConnectError::Exhausted {
            address: address.to_string(),
            attempts: self.policy.max_attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_connects_first_try() {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), fast_policy());

        let connection = manager.connect("memory").await.unwrap();
        assert!(connection.is_open());
        assert_eq!(manager.attempts(), 1);
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let broker = MemoryBroker::refusing(3);
        let manager = ConnectionManager::new(Arc::new(broker.clone()), fast_policy());

        assert!(manager.connect("memory").await.is_ok());
        assert_eq!(broker.connect_attempts(), 4);
    }

    #[tokio::test]
    async fn test_always_failing_target_tried_exactly_five_times() {
        let broker = MemoryBroker::refusing(u32::MAX);
        let manager = ConnectionManager::new(Arc::new(broker.clone()), fast_policy());

        let Err(ConnectError::Exhausted { attempts, last, .. }) = manager.connect("memory").await else {
            panic!("connected to a refusing broker");
        };
        assert_eq!(attempts, 5);
        assert!(matches!(last, BrokerError::ConnectionRefused { .. }));
        assert_eq!(broker.connect_attempts(), 5);
        assert_eq!(manager.attempts(), 5);

        // No stray attempts after the terminal failure
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(broker.connect_attempts(), 5);
    }

    #[tokio::test]
    async fn test_sleeps_between_attempts_only() {
        let broker = MemoryBroker::refusing(u32::MAX);
        let policy = RetryPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(20),
        };
        let manager = ConnectionManager::new(Arc::new(broker), policy);

        let start = Instant::now();
        assert!(manager.connect("memory").await.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "two pauses expected, got {elapsed:?}");
    }

    #[test]
    fn test_policy_from_config_never_zero_attempts() {
        let config = ConnectionConfig {
            max_attempts: 0,
            retry_interval_ms: 1,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.interval, Duration::from_millis(1));
    }
}
