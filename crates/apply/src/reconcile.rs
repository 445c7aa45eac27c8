//! The reconciler: drives one resource instance through
//! `Absent -> Creating -> Active -> Updating -> Active -> Deleting -> Absent`.
//!
//! A pass never mutates the record it was given. It returns a new record only
//! once every mutating call has been accepted and confirmed by a read. A
//! failed pass leaves local state as it was, except that a create the remote
//! accepted is reported as `Unconfirmed` with its key so the caller can keep
//! it bound (see [`Reconciler::after_failure`]).

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use metrics::{counter, histogram};
use rekon_core::{
    Operation, Phase, ReconcileError, ResourceKey, ResourceKind, StateRecord, WriteIntent, WriteMode,
};
use rekon_gateway::{RemoteGateway, TaggingGateway};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::lookup::Resolver;
use crate::tags::{StatusFlagSync, TagSynchronizer};

/// What a pass decided to do for a bound or unbound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Noop,
    Create,
    Update { attributes: bool, tags: bool },
    Delete,
}

/// Result of a standalone read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<D> {
    Found(D),
    /// The remote object no longer exists; local state should be dropped.
    Gone,
}

pub struct Reconciler<K: ResourceKind> {
    gateway: Arc<dyn RemoteGateway<K>>,
    tagging: Option<Arc<dyn TaggingGateway>>,
    resolver: Resolver<K>,
    config: ReconcilerConfig,
}

fn transition(kind: &'static str, key: &str, from: Phase, to: Phase) {
    debug_assert!(from.can_transition(to), "invalid transition {:?} -> {:?}", from, to);
    debug!(kind, key, ?from, ?to, "transition");
}

impl<K: ResourceKind> Reconciler<K> {
    pub fn new(gateway: Arc<dyn RemoteGateway<K>>, config: ReconcilerConfig) -> Self {
        let resolver = Resolver::new(Arc::clone(&gateway));
        Self { gateway, tagging: None, resolver, config }
    }

    /// Attach the generic tagging side-channel used for tag drift.
    pub fn with_tagging(mut self, tagging: Arc<dyn TaggingGateway>) -> Self {
        self.tagging = Some(tagging);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig { &self.config }

    pub fn resolver(&self) -> &Resolver<K> { &self.resolver }

    /// Decide the action for one resource given desired and observed state.
    pub fn plan(desired: Option<&K::Declared>, observed: Option<&K::Declared>) -> Action {
        match (desired, observed) {
            (None, None) => Action::Noop,
            (Some(_), None) => Action::Create,
            (None, Some(_)) => Action::Delete,
            (Some(d), Some(o)) => {
                let attributes = K::attributes_differ(d, o);
                let tags = match (K::tags(d), K::tags(o)) {
                    (Some(dt), Some(ot)) => dt != ot,
                    (Some(dt), None) => !dt.is_empty(),
                    _ => false,
                };
                if attributes || tags {
                    Action::Update { attributes, tags }
                } else {
                    Action::Noop
                }
            }
        }
    }

    /// Create the remote object and bind its key. If the create is accepted
    /// but the confirming read fails, the error is `Unconfirmed` and carries
    /// the accepted key.
    pub async fn create(&self, desired: &K::Declared) -> Result<StateRecord<K::Declared>, ReconcileError> {
        let accepted = OnceLock::new();
        self.create_bound(desired, &accepted).await.map_err(|e| self.unconfirmed(&accepted, e))
    }

    async fn create_bound(
        &self,
        desired: &K::Declared,
        accepted: &OnceLock<ResourceKey>,
    ) -> Result<StateRecord<K::Declared>, ReconcileError> {
        transition(K::TYPE_NAME, "", Phase::Absent, Phase::Creating);
        let key = match K::WRITE_MODE {
            WriteMode::Crud => {
                let request = K::to_request(desired, WriteIntent::Create)?;
                let label = K::natural_key(desired).map(|k| k.to_string()).unwrap_or_else(|| "(new)".to_string());
                let (key, _) = self
                    .gateway
                    .create(&request)
                    .await
                    .map_err(|e| ReconcileError::gateway(K::TYPE_NAME, label, Operation::Create, e))?;
                key
            }
            WriteMode::StatusFlag => {
                let key = K::natural_key(desired)
                    .ok_or_else(|| ReconcileError::validation(K::TYPE_NAME, "upsert-only kind without a natural key"))?;
                key.validate_arity(K::KEY_ARITY).map_err(|e| ReconcileError::key(K::TYPE_NAME, e))?;
                StatusFlagSync::new(self.gateway.as_ref()).apply(&key, desired, WriteIntent::Create).await?;
                key
            }
        };
        info!(kind = K::TYPE_NAME, key = %key, "created");
        let _ = accepted.set(key.clone());

        let attrs = self.confirm_created(&key, Some(desired)).await?;
        Ok(StateRecord::active(&key, attrs))
    }

    /// Read back an accepted create and project it.
    async fn confirm_created(&self, key: &ResourceKey, prior: Option<&K::Declared>) -> Result<K::Declared, ReconcileError> {
        let remote = self.confirm(key, Operation::Create).await?;
        let mut attrs = K::to_declared(&remote);
        if let Some(prior) = prior {
            K::carry_forward(&mut attrs, prior);
        }
        transition(K::TYPE_NAME, &key.to_string(), Phase::Creating, Phase::Active);
        Ok(attrs)
    }

    fn unconfirmed(&self, accepted: &OnceLock<ResourceKey>, err: ReconcileError) -> ReconcileError {
        match (accepted.get(), err) {
            (_, e @ ReconcileError::Unconfirmed { .. }) => e,
            (Some(key), e) => {
                warn!(kind = K::TYPE_NAME, key = %key, error = %e, "create accepted but not confirmed; keeping key");
                ReconcileError::Unconfirmed { type_name: K::TYPE_NAME, key: key.to_string(), source: Box::new(e) }
            }
            (None, e) => e,
        }
    }

    /// Record to keep after a failed pass: the prior record, or a pending
    /// record bound to the key of a create the remote already accepted.
    pub fn after_failure(
        prior: &StateRecord<K::Declared>,
        desired: Option<&K::Declared>,
        err: &ReconcileError,
    ) -> StateRecord<K::Declared> {
        match err.bound_id() {
            Some(id) => StateRecord::pending(id, desired.cloned().or_else(|| prior.attrs.clone())),
            None => prior.clone(),
        }
    }

    /// Standalone refresh. Absence is drift, not an error: the caller should
    /// drop its local state.
    pub async fn read(&self, key: &ResourceKey, prior: Option<&K::Declared>) -> Result<ReadOutcome<K::Declared>, ReconcileError> {
        match self.resolver.find(key).await {
            Ok(remote) => {
                let mut attrs = K::to_declared(&remote);
                if let Some(prior) = prior {
                    K::carry_forward(&mut attrs, prior);
                }
                Ok(ReadOutcome::Found(attrs))
            }
            Err(e) if e.is_not_found() => {
                warn!(kind = K::TYPE_NAME, key = %key, "not found, removing from state");
                counter!("reconcile_drift_absorbed_total", 1u64, "kind" => K::TYPE_NAME);
                Ok(ReadOutcome::Gone)
            }
            Err(e) => Err(e),
        }
    }

    /// Push mutable attribute and tag drift, then refresh from the remote.
    pub async fn update(
        &self,
        key: &ResourceKey,
        desired: &K::Declared,
        observed: &K::Declared,
    ) -> Result<StateRecord<K::Declared>, ReconcileError> {
        let id = key.to_string();
        transition(K::TYPE_NAME, &id, Phase::Active, Phase::Updating);
        let Action::Update { attributes, tags } = Self::plan(Some(desired), Some(observed)) else {
            transition(K::TYPE_NAME, &id, Phase::Updating, Phase::Active);
            return Ok(StateRecord::active(key, observed.clone()));
        };

        if attributes {
            match K::WRITE_MODE {
                WriteMode::Crud => {
                    let request = K::to_request(desired, WriteIntent::Update)?;
                    self.gateway
                        .update(key, &request)
                        .await
                        .map_err(|e| ReconcileError::gateway(K::TYPE_NAME, id.as_str(), Operation::Update, e))?;
                }
                WriteMode::StatusFlag => {
                    StatusFlagSync::new(self.gateway.as_ref()).apply(key, desired, WriteIntent::Update).await?;
                }
            }
            info!(kind = K::TYPE_NAME, key = %id, "attributes updated");
        }

        if tags {
            self.sync_tags(&id, desired, observed).await?;
        }

        let remote = self.confirm(key, Operation::Update).await?;
        let mut attrs = K::to_declared(&remote);
        K::carry_forward(&mut attrs, desired);
        transition(K::TYPE_NAME, &id, Phase::Updating, Phase::Active);
        Ok(StateRecord::active(key, attrs))
    }

    async fn sync_tags(&self, id: &str, desired: &K::Declared, observed: &K::Declared) -> Result<(), ReconcileError> {
        let Some(want) = K::tags(desired) else { return Ok(()) };
        let empty = rekon_core::TagSet::new();
        let have = K::tags(observed).unwrap_or(&empty);
        let target = K::tag_target(observed)
            .ok_or_else(|| ReconcileError::validation(K::TYPE_NAME, "observed state has no tagging address"))?;
        let tagging = self
            .tagging
            .as_ref()
            .ok_or_else(|| ReconcileError::validation(K::TYPE_NAME, "tag drift but no tagging gateway configured"))?;
        TagSynchronizer::new(Arc::clone(tagging)).sync(K::TYPE_NAME, id, &target, want, have).await?;
        Ok(())
    }

    /// Delete the remote object. Deleting something already absent succeeds.
    pub async fn delete(&self, key: &ResourceKey, declared: Option<&K::Declared>) -> Result<(), ReconcileError> {
        let id = key.to_string();
        let current = match self.resolver.find(key).await {
            Ok(remote) => remote,
            Err(e) if e.is_not_found() => {
                info!(kind = K::TYPE_NAME, key = %id, "already absent");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        transition(K::TYPE_NAME, &id, Phase::Active, Phase::Deleting);

        match K::WRITE_MODE {
            WriteMode::StatusFlag => {
                let base = match declared {
                    Some(d) => d.clone(),
                    None => K::to_declared(&current),
                };
                StatusFlagSync::new(self.gateway.as_ref()).retire(key, &base).await?;
            }
            WriteMode::Crud => {
                match self.gateway.delete(key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!(kind = K::TYPE_NAME, key = %id, "deleted concurrently"),
                    Err(source) => {
                        return Err(ReconcileError::Transport { type_name: K::TYPE_NAME, key: id, op: Operation::Delete, source })
                    }
                }
                if self.config.verify_delete {
                    self.wait_absent(key).await?;
                }
            }
        }
        info!(kind = K::TYPE_NAME, key = %id, "deleted");
        transition(K::TYPE_NAME, &id, Phase::Deleting, Phase::Absent);
        Ok(())
    }

    /// Bootstrap declared state from nothing but an id.
    pub async fn import(&self, id: &str) -> Result<StateRecord<K::Declared>, ReconcileError> {
        let key = ResourceKey::parse(id, K::KEY_ARITY).map_err(|e| ReconcileError::key(K::TYPE_NAME, e))?;
        let remote = self.resolver.find(&key).await?;
        let bound = K::canonical_key(&remote).unwrap_or(key);
        info!(kind = K::TYPE_NAME, key = %bound, "imported");
        Ok(StateRecord::active(&bound, K::to_declared(&remote)))
    }

    /// One full pass: read, decide, act, read to confirm.
    pub async fn reconcile(
        &self,
        record: &StateRecord<K::Declared>,
        desired: Option<&K::Declared>,
    ) -> Result<StateRecord<K::Declared>, ReconcileError> {
        self.reconcile_with_cancel(record, desired, &CancellationToken::new()).await
    }

    /// Like `reconcile`, aborting on `cancel` or after the configured pass
    /// timeout. The input record stays authoritative on abort unless the
    /// error is `Unconfirmed`.
    pub async fn reconcile_with_cancel(
        &self,
        record: &StateRecord<K::Declared>,
        desired: Option<&K::Declared>,
        cancel: &CancellationToken,
    ) -> Result<StateRecord<K::Declared>, ReconcileError> {
        let started = Instant::now();
        let id = record.id.clone().unwrap_or_default();
        let op = match (record.is_bound(), desired.is_some()) {
            (false, true) => Operation::Create,
            (true, false) => Operation::Delete,
            (true, true) => Operation::Update,
            (false, false) => Operation::Read,
        };
        let accepted = OnceLock::new();
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReconcileError::Cancelled { type_name: K::TYPE_NAME, key: id.clone(), op }),
            res = tokio::time::timeout(self.config.pass_timeout(), self.pass(record, desired, &accepted)) => match res {
                Ok(res) => res,
                Err(_) => Err(ReconcileError::DeadlineExceeded { type_name: K::TYPE_NAME, key: id.clone(), op }),
            },
        };
        let res = res.map_err(|e| self.unconfirmed(&accepted, e));
        histogram!("reconcile_pass_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => K::TYPE_NAME);
        let outcome = if res.is_ok() { "ok" } else { "error" };
        counter!("reconcile_pass_total", 1u64, "kind" => K::TYPE_NAME, "outcome" => outcome);
        if let Err(e) = &res {
            warn!(kind = K::TYPE_NAME, key = %id, error = %e, "reconcile pass failed");
        }
        res
    }

    async fn pass(
        &self,
        record: &StateRecord<K::Declared>,
        desired: Option<&K::Declared>,
        accepted: &OnceLock<ResourceKey>,
    ) -> Result<StateRecord<K::Declared>, ReconcileError> {
        let key = match record.key(K::KEY_ARITY) {
            None => None,
            Some(parsed) => Some(parsed.map_err(|e| ReconcileError::key(K::TYPE_NAME, e))?),
        };
        let Some(key) = key else {
            return match desired {
                Some(d) => self.create_bound(d, accepted).await,
                None => Ok(StateRecord::absent()),
            };
        };

        // A create accepted by an earlier pass is confirmed, never absorbed
        // as drift and never repeated.
        let confirmed = if record.phase == Phase::Creating {
            let _ = accepted.set(key.clone());
            Some(self.confirm_created(&key, desired.or(record.attrs.as_ref())).await?)
        } else {
            None
        };

        let Some(desired) = desired else {
            self.delete(&key, record.attrs.as_ref()).await?;
            return Ok(StateRecord::absent());
        };
        let observed = match confirmed {
            Some(observed) => observed,
            None => match self.read(&key, record.attrs.as_ref()).await? {
                ReadOutcome::Found(observed) => observed,
                ReadOutcome::Gone => return Ok(StateRecord::absent()),
            },
        };
        match Self::plan(Some(desired), Some(&observed)) {
            Action::Update { .. } => self.update(&key, desired, &observed).await,
            _ => Ok(StateRecord::active(&key, observed)),
        }
    }

    /// Read-after-write. Absence right after a write is eventual consistency
    /// until the window closes, then an inconsistency error. Never drift.
    async fn confirm(&self, key: &ResourceKey, op: Operation) -> Result<K::Remote, ReconcileError> {
        let mut attempt = 0u32;
        loop {
            match self.resolver.find(key).await {
                Ok(remote) => return Ok(remote),
                Err(e) if e.is_not_found() => {
                    attempt += 1;
                    if attempt >= self.config.consistency_attempts {
                        counter!("reconcile_inconsistent_read_total", 1u64, "kind" => K::TYPE_NAME);
                        return Err(ReconcileError::InconsistentRead { type_name: K::TYPE_NAME, key: key.to_string(), op });
                    }
                    let delay = self.config.consistency_backoff(attempt);
                    debug!(kind = K::TYPE_NAME, key = %key, attempt, delay_ms = delay.as_millis() as u64, "not visible yet");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_absent(&self, key: &ResourceKey) -> Result<(), ReconcileError> {
        let mut attempt = 0u32;
        loop {
            if !self.resolver.exists(key).await? {
                return Ok(());
            }
            attempt += 1;
            if attempt >= self.config.consistency_attempts {
                return Err(ReconcileError::InconsistentRead { type_name: K::TYPE_NAME, key: key.to_string(), op: Operation::Delete });
            }
            tokio::time::sleep(self.config.consistency_backoff(attempt)).await;
        }
    }
}
