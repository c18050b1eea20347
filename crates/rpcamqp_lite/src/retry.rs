use std::time::Duration;

use bon::Builder;
use tracing::{debug, error, info, warn};

use crate::error::RpcServerError;
use crate::transport::BrokerConnector;

pub const DEFAULT_MAX_RETRIES: u32 = 30;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Bounded retry policy for establishing the broker connection.
///
/// One initial attempt is made, followed by up to `max_retries` retries, each
/// preceded by a fixed `backoff` sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
    #[builder(default = DEFAULT_BACKOFF)]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self::builder().max_retries(0).build()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Connect through `connector`, retrying according to this policy.
    pub async fn connect<C: BrokerConnector>(
        &self,
        connector: &C,
    ) -> Result<C::Channel, RpcServerError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            debug!(attempt = attempts, "Connecting to broker");

            match connector.connect().await {
                Ok(channel) => {
                    info!(attempts, "Connected to broker");
                    return Ok(channel);
                }
                Err(e) if attempts >= self.max_attempts() => {
                    error!(attempts, error = %e, "Failed to connect to broker, giving up");
                    return Err(RpcServerError::ConnectRetriesExhausted { attempts, last: e });
                }
                Err(e) => {
                    warn!(
                        attempt = attempts,
                        max_attempts = self.max_attempts(),
                        error = %e,
                        "Broker connection failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBroker;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .backoff(Duration::ZERO)
            .build()
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 30);
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 31);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(30);

        let result = instant_policy(30).connect(&broker.connector()).await;
        assert!(result.is_ok());
        assert_eq!(broker.connect_attempts(), 31);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(31);

        let result = instant_policy(30).connect(&broker.connector()).await;
        assert!(matches!(
            result,
            Err(RpcServerError::ConnectRetriesExhausted { attempts: 31, .. })
        ));
        assert_eq!(broker.connect_attempts(), 31);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(1);

        let result = RetryPolicy::no_retry().connect(&broker.connector()).await;
        assert!(result.is_err());
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(3);
        let started = tokio::time::Instant::now();

        let policy = RetryPolicy::builder().max_retries(5).build();
        policy.connect(&broker.connector()).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }
}
