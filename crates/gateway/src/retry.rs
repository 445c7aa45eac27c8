use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rekon_core::{GatewayError, KeyFailure, ResourceKey, ResourceKind, TagSet};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{RemoteGateway, TaggingGateway};

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

/// Backoff policy for transient transport errors. The budget bounds the total
/// time spent on one call including sleeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub budget_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 8, initial_backoff_ms: 200, max_backoff_ms: 5_000, budget_secs: 60 }
    }
}

impl RetryPolicy {
    /// Defaults overridden by `REKON_RETRY_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_attempts: env_u64("REKON_RETRY_MAX_ATTEMPTS").map(|v| v as u32).unwrap_or(d.max_attempts).max(1),
            initial_backoff_ms: env_u64("REKON_RETRY_BACKOFF_MS").unwrap_or(d.initial_backoff_ms),
            max_backoff_ms: env_u64("REKON_RETRY_MAX_BACKOFF_MS").unwrap_or(d.max_backoff_ms),
            budget_secs: env_u64("REKON_RETRY_BUDGET_SECS").unwrap_or(d.budget_secs),
        }
    }

    pub fn budget(&self) -> Duration { Duration::from_secs(self.budget_secs) }

    /// Exponential delay before retry number `attempt` (1-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(1u64 << shift).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, runs out of
/// attempts, or the next sleep would overrun the policy budget.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &'static str, mut call: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let deadline = Instant::now() + policy.budget();
    let mut attempt = 0u32;
    loop {
        let err = match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };
        attempt += 1;
        if attempt >= policy.max_attempts {
            debug!(op, attempt, error = %err, "retry attempts exhausted");
            return Err(err);
        }
        let delay = policy.backoff(attempt);
        if Instant::now() + delay > deadline {
            debug!(op, attempt, error = %err, "retry budget exhausted");
            return Err(err);
        }
        counter!("gateway_retry_total", 1u64, "op" => op);
        warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient gateway error; retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Gateway wrapper applying a `RetryPolicy` to every call.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self { Self { inner, policy } }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }

    pub fn inner(&self) -> &G { &self.inner }
}

#[async_trait]
impl<K, G> RemoteGateway<K> for RetryingGateway<G>
where
    K: ResourceKind,
    G: RemoteGateway<K>,
{
    async fn create(&self, request: &K::Request) -> Result<(ResourceKey, K::Remote), GatewayError> {
        let inner = &self.inner;
        with_retry(&self.policy, "create", move || inner.create(request)).await
    }

    async fn describe(&self, key: &ResourceKey) -> Result<Vec<K::Remote>, GatewayError> {
        let inner = &self.inner;
        with_retry(&self.policy, "describe", move || inner.describe(key)).await
    }

    async fn update(&self, key: &ResourceKey, request: &K::Request) -> Result<K::Remote, GatewayError> {
        let inner = &self.inner;
        with_retry(&self.policy, "update", move || inner.update(key, request)).await
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), GatewayError> {
        let inner = &self.inner;
        with_retry(&self.policy, "delete", move || inner.delete(key)).await
    }
}

#[async_trait]
impl<G: TaggingGateway> TaggingGateway for RetryingGateway<G> {
    async fn tag_resource(&self, target: &str, tags: &TagSet) -> Result<Vec<KeyFailure>, GatewayError> {
        let inner = &self.inner;
        with_retry(&self.policy, "tag_resource", move || inner.tag_resource(target, tags)).await
    }

    async fn untag_resource(&self, target: &str, keys: &[String]) -> Result<Vec<KeyFailure>, GatewayError> {
        let inner = &self.inner;
        with_retry(&self.policy, "untag_resource", move || inner.untag_resource(target, keys)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy { max_attempts: 4, initial_backoff_ms: 1, max_backoff_ms: 4, budget_secs: 5 }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy { max_attempts: 10, initial_backoff_ms: 100, max_backoff_ms: 1_000, budget_secs: 60 };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(5), Duration::from_millis(1_000));
        assert_eq!(p.backoff(60), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let c = &calls;
        let res = with_retry(&fast(), "describe", move || async move {
            let n = c.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err(GatewayError::Throttled) } else { Ok(n) }
        })
        .await;
        assert_eq!(res, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_not_found() {
        let calls = AtomicU32::new(0);
        let c = &calls;
        let res: Result<(), _> = with_retry(&fast(), "describe", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::NotFound("q".into()))
        })
        .await;
        assert!(matches!(res, Err(GatewayError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let c = &calls;
        let res: Result<(), _> = with_retry(&fast(), "update", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Unavailable { status: 503 })
        })
        .await;
        assert_eq!(res, Err(GatewayError::Unavailable { status: 503 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn budget_bounds_total_wait() {
        let p = RetryPolicy { max_attempts: 100, initial_backoff_ms: 2_000, max_backoff_ms: 2_000, budget_secs: 1 };
        let calls = AtomicU32::new(0);
        let c = &calls;
        let res: Result<(), _> = with_retry(&p, "update", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::ConnectionReset)
        })
        .await;
        assert_eq!(res, Err(GatewayError::ConnectionReset));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.initial_backoff_ms, RetryPolicy::default().initial_backoff_ms);
    }
}
