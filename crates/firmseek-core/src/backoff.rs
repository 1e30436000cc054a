//! Throttle handling around a single query.
//!
//! A throttled candidate is re-issued after a cooldown until the service
//! answers with anything else. Every other outcome is returned after one
//! attempt, followed by a short courtesy pause that keeps the steady-state
//! request rate below the service's throttle threshold.

use crate::client::{FirmwareQuery, QueryOutcome};
use crate::config::{DeviceTarget, SearchConfig};
use crate::error::{Error, Result};
use crate::version::VersionBuild;
use std::time::Duration;
use tracing::info;

/// A non-throttled outcome and what it took to get it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Final outcome; never [`QueryOutcome::Throttled`]
    pub outcome: QueryOutcome,
    /// Requests issued for this candidate, including throttled ones
    pub attempts: u32,
}

impl Exchange {
    /// Number of cooldowns slept before the final attempt
    pub fn throttled(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Retries throttled queries with a fixed cooldown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffController {
    cooldown: Duration,
    courtesy_delay: Duration,
    max_retries: Option<u32>,
}

impl BackoffController {
    /// Creates an unbounded controller
    pub fn new(cooldown: Duration, courtesy_delay: Duration) -> Self {
        Self {
            cooldown,
            courtesy_delay,
            max_retries: None,
        }
    }

    /// Creates a controller from search tuning
    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.throttle_cooldown_duration(),
            config.courtesy_delay_duration(),
        )
        .max_retries(config.max_throttle_retries)
    }

    /// Caps retries per candidate; `None` retries forever
    pub fn max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    /// Issues `candidate` until it is not throttled.
    ///
    /// Errors from the client pass straight through without a retry.
    pub async fn execute<Q: FirmwareQuery>(
        &self,
        client: &Q,
        target: &DeviceTarget,
        candidate: &VersionBuild,
    ) -> Result<Exchange> {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let outcome = client.query(target, candidate).await?;
            outcome.log(target, candidate);

            if matches!(outcome, QueryOutcome::Throttled(_)) {
                if let Some(max) = self.max_retries {
                    if attempts > max {
                        return Err(Error::RetryLimitExceeded { attempts });
                    }
                }
                info!(
                    device = target.name.as_str(),
                    attempt = attempts,
                    cooldown = ?self.cooldown,
                    "waiting out throttle"
                );
                pause(self.cooldown).await;
                continue;
            }

            pause(self.courtesy_delay).await;
            return Ok(Exchange { outcome, attempts });
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, FnClient};
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    const COOLDOWN: Duration = Duration::from_secs(60);
    const COURTESY: Duration = Duration::from_millis(500);

    fn throttled_then_not_found(throttles: u32) -> FnClient {
        FnClient::new(move |_, call| {
            if call <= throttles {
                Ok(QueryOutcome::Throttled("请求过于频繁".to_string()))
            } else {
                Ok(QueryOutcome::NotFound)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_throttled_until_clear() {
        let target = device("cam", "V1.0.0 build 240101");
        let candidate = target.initial_version;
        let controller = BackoffController::new(COOLDOWN, COURTESY);

        for throttles in [0u32, 1, 4] {
            let client = throttled_then_not_found(throttles);
            let start = Instant::now();

            let exchange = controller.execute(&client, &target, &candidate).await.unwrap();

            assert_eq!(exchange.outcome, QueryOutcome::NotFound);
            assert_eq!(exchange.attempts, throttles + 1);
            assert_eq!(exchange.throttled(), throttles);
            assert_eq!(client.calls(), throttles + 1);
            assert_eq!(start.elapsed(), COOLDOWN * throttles + COURTESY);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_outcomes_are_single_attempt() {
        let target = device("cam", "V1.0.0 build 240101");
        let controller = BackoffController::new(COOLDOWN, COURTESY);

        let client = FnClient::new(|_, _| Ok(QueryOutcome::TransportError(503)));
        let exchange = controller
            .execute(&client, &target, &target.initial_version)
            .await
            .unwrap();

        assert_eq!(exchange.outcome, QueryOutcome::TransportError(503));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap() {
        let target = device("cam", "V1.0.0 build 240101");
        let controller = BackoffController::new(COOLDOWN, COURTESY).max_retries(Some(2));
        let client = throttled_then_not_found(u32::MAX);

        let err = controller
            .execute(&client, &target, &target.initial_version)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RetryLimitExceeded { attempts: 3 }));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subsecond_cooldown_from_config() {
        let target = device("cam", "V1.0.0 build 240101");
        let config = SearchConfig::new()
            .throttle_cooldown(Duration::from_millis(1500))
            .courtesy_delay(Duration::from_millis(250));
        let controller = BackoffController::from_config(&config);
        let client = throttled_then_not_found(2);
        let start = Instant::now();

        controller
            .execute(&client, &target, &target.initial_version)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(2 * 1500 + 250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let target = device("cam", "V1.0.0 build 240101");
        let controller = BackoffController::new(COOLDOWN, COURTESY);
        let client = FnClient::new(|_, _| Err(Error::protocol_violation("999", "nope")));

        let err = controller
            .execute(&client, &target, &target.initial_version)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert_eq!(client.calls(), 1);
    }
}
