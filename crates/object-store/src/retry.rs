//! Bounded retry with linear backoff around an [`ObjectStoreClient`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{BucketStatus, ListRequest, ObjectStoreClient, Page};
use crate::error::{Result, StoreError};

/// How hard to try before giving up on a store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Sleep before the first retry
    #[serde(rename = "sleep_interval_secs", default = "default_sleep_interval", with = "secs")]
    pub sleep_interval: Duration,
    /// Added to the sleep before every further retry
    #[serde(rename = "sleep_increment_secs", default = "default_sleep_increment", with = "secs")]
    pub sleep_increment: Duration,
    /// Bound on a single attempt; zero means unbounded
    #[serde(rename = "request_timeout_ms", default, with = "millis")]
    pub request_timeout: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_sleep_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_sleep_increment() -> Duration {
    Duration::from_secs(1)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            sleep_interval: default_sleep_interval(),
            sleep_increment: default_sleep_increment(),
            request_timeout: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Sleep taken before retry number `retry` (1-based). Saturates at
    /// `Duration::MAX`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.sleep_increment
            .saturating_mul(retry.saturating_sub(1))
            .saturating_add(self.sleep_interval)
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// The listing and probe operations of a client, retried per [`RetryPolicy`].
///
/// Sleeps only happen between attempts. A non-retryable error ends the
/// request on the spot; running out of attempts returns the last error seen.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    inner: Arc<dyn ObjectStoreClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn ObjectStoreClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    pub async fn list_page(&self, request: &ListRequest) -> Result<Page> {
        self.execute("list_page", || self.inner.list_page(request))
            .await
    }

    pub async fn probe_bucket(&self) -> Result<BucketStatus> {
        self.execute("probe_bucket", || self.inner.probe_bucket())
            .await
    }

    async fn execute<T, F, Fut>(&self, operation_name: &'static str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(operation()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.inner.is_retryable(&err) {
                tracing::debug!(
                    bucket = %self.inner.bucket(),
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "store request failed with a terminal error"
                );
                return Err(err);
            }
            if attempt >= attempts {
                tracing::warn!(
                    bucket = %self.inner.bucket(),
                    operation = operation_name,
                    attempts,
                    error = %err,
                    "store request failed, retries exhausted"
                );
                return Err(err);
            }

            let delay = self.policy.backoff(attempt);
            tracing::warn!(
                bucket = %self.inner.bucket(),
                operation = operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying store request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        if self.policy.request_timeout.is_zero() {
            return fut.await;
        }
        match tokio::time::timeout(self.policy.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.policy.request_timeout)),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
