// Feed errors and bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use pickem_core::config::RetryConfig;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("feed response is missing {0}")]
    MissingField(&'static str),
}

impl FeedError {
    /// Transport failures, 5xx responses, and rate limiting are worth
    /// another attempt. Anything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Http { .. } | FeedError::RateLimited { .. } => true,
            FeedError::Status { status, .. } => *status >= 500,
            FeedError::Decode { .. } | FeedError::MissingField(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32, err: &FeedError) -> Duration {
        match err {
            FeedError::RateLimited {
                retry_after: Some(wait),
                ..
            } => (*wait).min(self.max_delay),
            _ => self.backoff(attempt),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of retries.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt, &err);
                    attempt += 1;
                    warn!(
                        what,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "feed request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }

    fn server_error() -> FeedError {
        FeedError::Status {
            url: "http://feed".into(),
            status: 503,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(5));
        assert_eq!(p.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn transient_classification() {
        assert!(server_error().is_transient());
        assert!(FeedError::RateLimited {
            url: "u".into(),
            retry_after: None
        }
        .is_transient());
        assert!(!FeedError::Status {
            url: "u".into(),
            status: 404
        }
        .is_transient());
        assert!(!FeedError::MissingField("competitions").is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_backoff() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let value = policy()
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let err = policy()
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(server_error())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FeedError::Status { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = policy()
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FeedError::MissingField("header"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FeedError::MissingField("header")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_for_retry_after() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        policy()
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FeedError::RateLimited {
                        url: "u".into(),
                        retry_after: Some(Duration::from_secs(4)),
                    })
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(start.elapsed().as_secs(), 4);
    }
}
