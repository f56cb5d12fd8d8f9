//! Bounded retry with exponential backoff

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{Transport, UpstreamResponse};
use crate::error::{FetchError, TransportError};

/// Retry policy for upstream fetches
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_retry_delay: Duration,
    /// Growth factor applied to the delay after every failed attempt
    pub backoff_multiplier: f64,
    /// Minimum delay after a 429 response
    pub rate_limit_backoff: Duration,
    /// Upper bound for the grown delay
    pub max_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_retry_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            rate_limit_backoff: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.max_attempts == 0 {
            return Err(FetchError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(FetchError::InvalidPolicy(format!(
                "backoff_multiplier must be greater than 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.rate_limit_backoff < self.base_retry_delay {
            return Err(FetchError::InvalidPolicy(
                "rate_limit_backoff must be at least base_retry_delay".to_string(),
            ));
        }
        if self.max_retry_delay < self.rate_limit_backoff {
            return Err(FetchError::InvalidPolicy(
                "max_retry_delay must be at least rate_limit_backoff".to_string(),
            ));
        }
        Ok(())
    }

    /// Next delay after having waited `current`
    fn grow(&self, current: Duration) -> Duration {
        let nanos = (current.as_nanos() as f64 * self.backoff_multiplier).round();
        if nanos.is_finite() && nanos < self.max_retry_delay.as_nanos() as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            self.max_retry_delay
        }
    }
}

/// Suspension point between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fetch `url`, retrying transient failures according to `policy`
///
/// Returns the first 2xx response. When every attempt produced a non-2xx
/// response, the last one is returned so the caller can pass it through.
/// `FetchError::Exhausted` is only returned when no response was ever
/// received.
pub async fn fetch_with_retry(
    transport: &dyn Transport,
    sleeper: &dyn Sleeper,
    url: &str,
    policy: &RetryPolicy,
) -> Result<UpstreamResponse, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.base_retry_delay;
    let mut last_response: Option<UpstreamResponse> = None;
    let mut last_error: Option<TransportError> = None;

    for attempt in 1..=max_attempts {
        metrics::counter!("relay_upstream_attempts_total").increment(1);

        let delay = match transport.get(url).await {
            Ok(response) if response.is_success() => {
                if attempt > 1 {
                    info!(attempt, status = response.status, "Upstream succeeded after retry");
                }
                return Ok(response);
            }
            Ok(response) => {
                let delay = if response.is_rate_limited() {
                    backoff.max(policy.rate_limit_backoff)
                } else {
                    backoff
                };
                warn!(
                    attempt,
                    max_attempts,
                    status = response.status,
                    "Upstream returned non-success status"
                );
                last_response = Some(response);
                delay
            }
            Err(e) if e.is_retryable() => {
                warn!(attempt, max_attempts, error = %e, "Upstream request failed");
                last_error = Some(e);
                backoff
            }
            Err(e) => {
                warn!(attempt, error = %e, "Upstream request failed with non-retryable fault");
                return Err(FetchError::Transport(e));
            }
        };

        if attempt < max_attempts {
            debug!(attempt, delay = ?delay, "Backing off before next attempt");
            metrics::counter!("relay_upstream_retries_total").increment(1);
            sleeper.sleep(delay).await;
            backoff = policy.grow(delay);
        }
    }

    match last_response {
        Some(response) => Ok(response),
        None => Err(FetchError::Exhausted {
            attempts: max_attempts,
            last_error: last_error
                .unwrap_or_else(|| TransportError::Network("no attempt completed".to_string())),
        }),
    }
}

/// Transport, sleeper and policy bundled for repeated use
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        policy.validate()?;
        Ok(Self {
            transport,
            sleeper,
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, url: &str) -> Result<UpstreamResponse, FetchError> {
        fetch_with_retry(self.transport.as_ref(), self.sleeper.as_ref(), url, &self.policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed script of outcomes; repeats the last one when drained
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<UpstreamResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<UpstreamResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<UpstreamResponse, TransportError> {
            *self.calls.lock() += 1;
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            rate_limit_backoff: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(5),
        }
    }

    fn network_error() -> Result<UpstreamResponse, TransportError> {
        Err(TransportError::Network("connection reset".to_string()))
    }

    const URL: &str = "https://games.roblox.com/v1/games";

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let transport = ScriptedTransport::new(vec![Ok(UpstreamResponse::new(
            200,
            "{}",
            Some("application/json"),
        ))]);
        let sleeper = RecordingSleeper::default();

        let response = fetch_with_retry(&transport, &sleeper, URL, &policy(3))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_transport_failures() {
        let max_attempts = 4;
        let mut script: Vec<_> = (0..max_attempts - 1).map(|_| network_error()).collect();
        script.push(Ok(UpstreamResponse::new(200, "ok", None)));
        let transport = ScriptedTransport::new(script);
        let sleeper = RecordingSleeper::default();

        let response = fetch_with_retry(&transport, &sleeper, URL, &policy(max_attempts))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), max_attempts);

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len() as u32, max_attempts - 1);
        assert!(sleeps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test]
    async fn test_always_rate_limited_returns_last_response() {
        let transport = ScriptedTransport::new(vec![Ok(UpstreamResponse::new(
            429,
            "Too many requests",
            Some("text/plain"),
        ))]);
        let sleeper = RecordingSleeper::default();

        let response = fetch_with_retry(&transport, &sleeper, URL, &policy(3))
            .await
            .unwrap();

        assert_eq!(response.status, 429);
        assert_eq!(response.body, "Too many requests");
        assert_eq!(transport.calls(), 3);

        // Rate-limit sleeps never drop below the configured floor
        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps.iter().all(|d| *d >= Duration::from_millis(500)));
        assert!(sleeps[0] <= sleeps[1]);
    }

    #[tokio::test]
    async fn test_always_failing_transport_is_exhausted() {
        let transport = ScriptedTransport::new(vec![network_error()]);
        let sleeper = RecordingSleeper::default();

        let err = fetch_with_retry(&transport, &sleeper, URL, &policy(3))
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.is_retryable());
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_server_errors_pass_through_after_budget() {
        let transport = ScriptedTransport::new(vec![
            Ok(UpstreamResponse::new(503, "busy", None)),
            Ok(UpstreamResponse::new(500, "broken", None)),
        ]);
        let sleeper = RecordingSleeper::default();

        let response = fetch_with_retry(&transport, &sleeper, URL, &policy(3))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(response.body, "broken");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_response_received_earlier_beats_final_network_error() {
        let transport = ScriptedTransport::new(vec![
            Ok(UpstreamResponse::new(404, "missing", None)),
            network_error(),
        ]);
        let sleeper = RecordingSleeper::default();

        let response = fetch_with_retry(&transport, &sleeper, URL, &policy(2))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_fatal_transport_error_aborts() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Fatal(
            "invalid header".to_string(),
        ))]);
        let sleeper = RecordingSleeper::default();

        let err = fetch_with_retry(&transport, &sleeper, URL, &policy(5))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transport(TransportError::Fatal(_))));
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let transport = ScriptedTransport::new(vec![network_error()]);
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_attempts: 6,
            base_retry_delay: Duration::from_millis(100),
            backoff_multiplier: 3.0,
            rate_limit_backoff: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(1000),
        };

        let _ = fetch_with_retry(&transport, &sleeper, URL, &policy).await;

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 5);
        assert_eq!(sleeps[0], Duration::from_millis(100));
        assert_eq!(sleeps[1], Duration::from_millis(300));
        assert_eq!(sleeps[2], Duration::from_millis(900));
        assert_eq!(sleeps[3], Duration::from_millis(1000));
        assert_eq!(sleeps[4], Duration::from_millis(1000));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());

        let zero = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let flat = RetryPolicy {
            backoff_multiplier: 1.0,
            ..Default::default()
        };
        assert!(flat.validate().is_err());

        let short_rate_limit = RetryPolicy {
            base_retry_delay: Duration::from_secs(2),
            rate_limit_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(short_rate_limit.validate().is_err());
    }

    #[test]
    fn test_fetcher_rejects_invalid_policy() {
        let transport = Arc::new(ScriptedTransport::new(vec![network_error()]));
        let result = RetryingFetcher::new(
            transport,
            Arc::new(TokioSleeper),
            RetryPolicy {
                max_attempts: 0,
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}
