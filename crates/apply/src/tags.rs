//! Tag synchronization.
//!
//! Two categories exist and must not be conflated:
//! - generic tag sets, diffed and applied with partial add/remove calls;
//! - status-flag tags, where deleting means flipping the status to inactive.

use std::sync::Arc;

use metrics::counter;
use rekon_core::{GatewayError, KeyFailure, Operation, ReconcileError, ResourceKey, ResourceKind, TagSet, WriteIntent};
use rekon_gateway::{RemoteGateway, TaggingGateway};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Minimal set of tag operations turning `observed` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDiff {
    /// Keys to add or overwrite, with their desired values.
    pub upsert: TagSet,
    /// Keys to remove.
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool { self.upsert.is_empty() && self.remove.is_empty() }
}

/// Keys equal on both sides are left alone.
pub fn plan(desired: &TagSet, observed: &TagSet) -> TagDiff {
    let upsert = desired
        .iter()
        .filter(|(k, v)| observed.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let remove = observed.keys().filter(|k| !desired.contains_key(*k)).cloned().collect();
    TagDiff { upsert, remove }
}

/// Generic tag-set synchronizer over the tagging side-channel.
#[derive(Clone)]
pub struct TagSynchronizer {
    tagging: Arc<dyn TaggingGateway>,
}

impl TagSynchronizer {
    pub fn new(tagging: Arc<dyn TaggingGateway>) -> Self { Self { tagging } }

    /// Apply the diff between `desired` and `observed` on `target`.
    ///
    /// Upserts and removals are separate calls and nothing is rolled back:
    /// if only some keys fail the error is `PartialFailure` listing both the
    /// failed and the applied keys.
    pub async fn sync(
        &self,
        type_name: &'static str,
        key: &str,
        target: &str,
        desired: &TagSet,
        observed: &TagSet,
    ) -> Result<TagDiff, ReconcileError> {
        let diff = plan(desired, observed);
        if diff.is_empty() {
            return Ok(diff);
        }
        debug!(kind = type_name, key, upsert = diff.upsert.len(), remove = diff.remove.len(), "tag diff");

        let mut failed: Vec<KeyFailure> = Vec::new();
        let mut applied: Vec<String> = Vec::new();

        if !diff.upsert.is_empty() {
            let keys: Vec<String> = diff.upsert.keys().cloned().collect();
            let res = self.tagging.tag_resource(target, &diff.upsert).await;
            counter!("tag_sync_ops_total", 1u64, "call" => "tag");
            settle(keys, res, &mut failed, &mut applied);
        }
        if !diff.remove.is_empty() {
            let res = self.tagging.untag_resource(target, &diff.remove).await;
            counter!("tag_sync_ops_total", 1u64, "call" => "untag");
            settle(diff.remove.clone(), res, &mut failed, &mut applied);
        }

        if failed.is_empty() {
            info!(kind = type_name, key, applied = applied.len(), "tags updated");
            return Ok(diff);
        }
        warn!(kind = type_name, key, failed = failed.len(), applied = applied.len(), "tag update failed");
        if applied.is_empty() {
            return Err(ReconcileError::Transport {
                type_name,
                key: key.to_string(),
                op: Operation::Update,
                source: GatewayError::KeyErrors(failed),
            });
        }
        Err(ReconcileError::PartialFailure { type_name, key: key.to_string(), op: Operation::Update, failed, applied })
    }
}

/// Sort the keys of one call into failed and applied. A whole-call error
/// fails every key it carried.
fn settle(
    keys: Vec<String>,
    res: Result<Vec<KeyFailure>, GatewayError>,
    failed: &mut Vec<KeyFailure>,
    applied: &mut Vec<String>,
) {
    let per_key = match res {
        Ok(per_key) | Err(GatewayError::KeyErrors(per_key)) => per_key,
        Err(e) => {
            let message = e.to_string();
            failed.extend(keys.into_iter().map(|k| KeyFailure::new(k, message.clone())));
            return;
        }
    };
    for k in keys {
        if !per_key.iter().any(|f| f.key == k) {
            applied.push(k);
        }
    }
    failed.extend(per_key);
}

/// Single-key status transitions for upsert-only, status-flag kinds.
pub struct StatusFlagSync<'a, K: ResourceKind> {
    gateway: &'a dyn RemoteGateway<K>,
}

impl<'a, K: ResourceKind> StatusFlagSync<'a, K> {
    pub fn new(gateway: &'a dyn RemoteGateway<K>) -> Self { Self { gateway } }

    /// Upsert the declared status. Serves as both create and update.
    pub async fn apply(&self, key: &ResourceKey, declared: &K::Declared, intent: WriteIntent) -> Result<K::Remote, ReconcileError> {
        let request = K::to_request(declared, intent)?;
        let remote = self.gateway.update(key, &request).await.map_err(|source| ReconcileError::Transport {
            type_name: K::TYPE_NAME,
            key: key.to_string(),
            op: Operation::Update,
            source,
        })?;
        counter!("tag_sync_ops_total", 1u64, "call" => "status");
        Ok(remote)
    }

    /// Force the inactive status regardless of what is declared. There is no
    /// delete call for these kinds.
    pub async fn retire(&self, key: &ResourceKey, declared: &K::Declared) -> Result<K::Remote, ReconcileError> {
        info!(kind = K::TYPE_NAME, key = %key, "retiring status-flag tag");
        self.apply(key, &K::retire(declared), WriteIntent::Update).await
    }
}
