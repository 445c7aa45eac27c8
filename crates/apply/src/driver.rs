//! Batch driver: many reconciliation passes with bounded concurrency, never
//! two at once for the same resource address.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use rekon_core::{ReconcileError, ResourceKind, StateRecord};
use rustc_hash::FxHashMap;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::reconcile::Reconciler;

/// Per-address mutual exclusion.
#[derive(Default)]
pub struct KeyLocks {
    map: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self { Self::default() }

    pub async fn lock(&self, address: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(address.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Drop slots nobody holds or waits on.
    pub fn prune(&self) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize { self.map.lock().unwrap_or_else(|e| e.into_inner()).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// One resource instance to reconcile.
#[derive(Debug, Clone)]
pub struct Job<D> {
    /// Stable address of the declaration, e.g. `aws_batch_job_queue.main`.
    pub address: String,
    pub record: StateRecord<D>,
    pub desired: Option<D>,
}

#[derive(Debug)]
pub struct JobResult<D> {
    pub address: String,
    /// Record to keep for `address`: the new record on success, otherwise
    /// [`Reconciler::after_failure`] of the record the pass started from.
    pub record: StateRecord<D>,
    pub result: Result<StateRecord<D>, ReconcileError>,
}

/// Latest record per address within one batch.
type Latest<D> = Mutex<FxHashMap<String, StateRecord<D>>>;

pub struct Driver<K: ResourceKind> {
    reconciler: Arc<Reconciler<K>>,
    locks: Arc<KeyLocks>,
    concurrency: usize,
}

impl<K: ResourceKind> Driver<K> {
    pub fn new(reconciler: Arc<Reconciler<K>>, concurrency: usize) -> Self {
        Self { reconciler, locks: Arc::new(KeyLocks::new()), concurrency: concurrency.max(1) }
    }

    /// Share locks with other drivers reconciling the same addresses.
    pub fn with_locks(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub async fn run_one(&self, job: Job<K::Declared>, cancel: &CancellationToken) -> JobResult<K::Declared> {
        self.run_job(job, cancel, None).await
    }

    /// Results come back in completion order. Jobs sharing an address run one
    /// after another, each starting from the record the previous one left.
    pub async fn run(&self, jobs: Vec<Job<K::Declared>>, cancel: &CancellationToken) -> Vec<JobResult<K::Declared>> {
        let total = jobs.len();
        let latest: Latest<K::Declared> = Mutex::new(FxHashMap::default());
        let results: Vec<_> = futures::stream::iter(jobs)
            .map(|job| self.run_job(job, cancel, Some(&latest)))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let failed = results.iter().filter(|r| r.result.is_err()).count();
        info!(kind = K::TYPE_NAME, total, failed, "batch reconciled");
        results
    }

    async fn run_job(
        &self,
        job: Job<K::Declared>,
        cancel: &CancellationToken,
        latest: Option<&Latest<K::Declared>>,
    ) -> JobResult<K::Declared> {
        let (record, result) = {
            let _guard = self.locks.lock(&job.address).await;
            let start = latest
                .and_then(|l| l.lock().unwrap_or_else(|e| e.into_inner()).get(&job.address).cloned())
                .unwrap_or_else(|| job.record.clone());
            let result = self.reconciler.reconcile_with_cancel(&start, job.desired.as_ref(), cancel).await;
            let record = match &result {
                Ok(next) => next.clone(),
                Err(e) => Reconciler::<K>::after_failure(&start, job.desired.as_ref(), e),
            };
            if let Some(l) = latest {
                l.lock().unwrap_or_else(|e| e.into_inner()).insert(job.address.clone(), record.clone());
            }
            (record, result)
        };
        self.locks.prune();
        JobResult { address: job.address, record, result }
    }
}
