//! Lookup resolver: turns "describe by identifier" responses into exactly one
//! remote object, a `NotFound`, or an `Ambiguous` error.

use std::future::Future;
use std::sync::Arc;

use rekon_core::{GatewayError, Operation, ReconcileError, ResourceKey, ResourceKind};
use rekon_gateway::RemoteGateway;
use tracing::debug;

/// Await `query`, keep the items accepted by `predicate` and require exactly
/// one. Gateway errors other than not-found are passed through as transport
/// errors without retrying.
pub async fn find_single<T, Fut, P>(
    type_name: &'static str,
    key: &str,
    op: Operation,
    query: Fut,
    predicate: P,
) -> Result<T, ReconcileError>
where
    Fut: Future<Output = Result<Vec<T>, GatewayError>>,
    P: Fn(&T) -> bool,
{
    let items = query.await.map_err(|e| ReconcileError::gateway(type_name, key, op, e))?;
    let mut matched: Vec<T> = items.into_iter().filter(|item| predicate(item)).collect();
    match matched.len() {
        0 => Err(ReconcileError::NotFound { type_name, key: key.to_string() }),
        1 => matched.pop().ok_or_else(|| ReconcileError::NotFound { type_name, key: key.to_string() }),
        count => Err(ReconcileError::Ambiguous { type_name, key: key.to_string(), op, count }),
    }
}

/// Resolver for one resource kind.
pub struct Resolver<K: ResourceKind> {
    gateway: Arc<dyn RemoteGateway<K>>,
}

impl<K: ResourceKind> Clone for Resolver<K> {
    fn clone(&self) -> Self { Self { gateway: Arc::clone(&self.gateway) } }
}

impl<K: ResourceKind> Resolver<K> {
    pub fn new(gateway: Arc<dyn RemoteGateway<K>>) -> Self { Self { gateway } }

    /// Find the single remote object bound to `key`. The key shape is checked
    /// before any remote call is made; tombstoned objects count as absent.
    pub async fn find(&self, key: &ResourceKey) -> Result<K::Remote, ReconcileError> {
        key.validate_arity(K::KEY_ARITY).map_err(|e| ReconcileError::key(K::TYPE_NAME, e))?;
        let id = key.to_string();
        debug!(kind = K::TYPE_NAME, key = %id, "describe");
        find_single(K::TYPE_NAME, &id, Operation::Read, self.gateway.describe(key), |remote| {
            K::matches(key, remote) && !K::is_tombstone(remote)
        })
        .await
    }

    /// `Ok(false)` when the object is absent; other errors propagate.
    pub async fn exists(&self, key: &ResourceKey) -> Result<bool, ReconcileError> {
        match self.find(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(items: Vec<&'static str>) -> Result<&'static str, ReconcileError> {
        find_single("Thing", "a", Operation::Read, async move { Ok(items) }, |s: &&str| s.starts_with('a')).await
    }

    #[tokio::test]
    async fn zero_matches_is_not_found() {
        let e = run(vec!["b1", "c1"]).await.unwrap_err();
        assert!(e.is_not_found());
        let e = run(vec![]).await.unwrap_err();
        assert!(e.is_not_found());
    }

    #[tokio::test]
    async fn one_match_is_returned() {
        assert_eq!(run(vec!["b1", "a1"]).await.unwrap(), "a1");
    }

    #[tokio::test]
    async fn many_matches_are_ambiguous() {
        let e = run(vec!["a1", "a2", "b"]).await.unwrap_err();
        assert!(matches!(e, ReconcileError::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn gateway_not_found_is_classified() {
        let e = find_single::<u8, _, _>("Thing", "a", Operation::Read, async { Err(GatewayError::NotFound("a".into())) }, |_| true)
            .await
            .unwrap_err();
        assert!(e.is_not_found());
        let e = find_single::<u8, _, _>("Thing", "a", Operation::Read, async { Err(GatewayError::Throttled) }, |_| true)
            .await
            .unwrap_err();
        assert!(matches!(e, ReconcileError::Transport { source: GatewayError::Throttled, .. }));
    }
}
