#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rekon_apply::ReconcilerConfig;
use rekon_core::{GatewayError, KeyFailure, ResourceKey, TagSet, TagStatus};
use rekon_gateway::{RemoteGateway, TaggingGateway};
use rekon_resources::access_grant::{AccessGrantDetail, CreateAccessGrantInput};
use rekon_resources::cost_allocation_tag::{CostAllocationTagEntry, UpdateCostAllocationTagsStatusInput};
use rekon_resources::job_queue::{JobQueueDetail, JobQueueRequest};
use rekon_resources::{AccessGrant, CostAllocationTag, JobQueue};

pub const ACCOUNT: &str = "123456789012";

pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        consistency_attempts: 3,
        consistency_backoff_ms: 1,
        consistency_max_backoff_ms: 2,
        pass_timeout_secs: 5,
        verify_delete: true,
    }
}

pub fn tags(pairs: &[(&str, &str)]) -> TagSet {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// In-memory control plane shared by the fakes: objects, a call log, hidden
/// reads for eventual consistency and one-shot failure injection.
pub struct Plane<R> {
    objects: Mutex<Vec<R>>,
    calls: Mutex<Vec<&'static str>>,
    hidden_reads: AtomicU32,
    failures: Mutex<HashMap<&'static str, GatewayError>>,
    hide_after: Mutex<HashMap<&'static str, u32>>,
    no_effect: Mutex<HashSet<&'static str>>,
    pub tag_log: Mutex<Vec<TagSet>>,
    pub untag_log: Mutex<Vec<Vec<String>>>,
}

impl<R: Clone> Plane<R> {
    pub fn new(objects: Vec<R>) -> Self {
        Self {
            objects: Mutex::new(objects),
            calls: Mutex::new(Vec::new()),
            hidden_reads: AtomicU32::new(0),
            failures: Mutex::new(HashMap::new()),
            hide_after: Mutex::new(HashMap::new()),
            no_effect: Mutex::new(HashSet::new()),
            tag_log: Mutex::new(Vec::new()),
            untag_log: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: &'static str) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(call);
        if let Some(n) = self.hide_after.lock().unwrap().remove(call) {
            self.hide_next_reads(n);
        }
        match self.failures.lock().unwrap().remove(call) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// True when this describe should pretend the write is not visible yet.
    fn hide_read(&self) -> bool {
        self.hidden_reads.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }

    pub fn calls(&self) -> Vec<&'static str> { self.calls.lock().unwrap().clone() }

    pub fn count(&self, call: &str) -> usize { self.calls.lock().unwrap().iter().filter(|c| **c == call).count() }

    pub fn clear_calls(&self) { self.calls.lock().unwrap().clear(); }

    pub fn hide_next_reads(&self, n: u32) { self.hidden_reads.store(n, Ordering::SeqCst); }

    /// Hide the next `n` reads once `call` has been made.
    pub fn hide_reads_after(&self, call: &'static str, n: u32) { self.hide_after.lock().unwrap().insert(call, n); }

    /// Accept `call` but leave the objects untouched.
    pub fn without_effect(&self, call: &'static str) { self.no_effect.lock().unwrap().insert(call); }

    fn has_effect(&self, call: &'static str) -> bool { !self.no_effect.lock().unwrap().contains(call) }

    pub fn fail_once(&self, call: &'static str, err: GatewayError) { self.failures.lock().unwrap().insert(call, err); }

    pub fn objects(&self) -> Vec<R> { self.objects.lock().unwrap().clone() }

    pub fn push(&self, obj: R) { self.objects.lock().unwrap().push(obj); }

    pub fn remove_where(&self, pred: impl Fn(&R) -> bool) { self.objects.lock().unwrap().retain(|o| !pred(o)); }

    pub fn modify<T>(&self, pred: impl Fn(&R) -> bool, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        let mut objs = self.objects.lock().unwrap();
        objs.iter_mut().find(|o| pred(o)).map(f)
    }

    fn select(&self, pred: impl Fn(&R) -> bool) -> Vec<R> {
        if self.hide_read() {
            return Vec::new();
        }
        self.objects.lock().unwrap().iter().filter(|o| pred(o)).cloned().collect()
    }
}

fn apply_tags<R>(plane: &Plane<R>, target_tags: Option<&mut TagSet>, tags: &TagSet) -> Result<Vec<KeyFailure>, GatewayError> {
    let Some(current) = target_tags else { return Err(GatewayError::NotFound("tag target".into())) };
    plane.tag_log.lock().unwrap().push(tags.clone());
    current.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(Vec::new())
}

// ---- Batch ----

pub struct FakeBatch {
    pub plane: Plane<JobQueueDetail>,
}

impl FakeBatch {
    pub fn new(objects: Vec<JobQueueDetail>) -> Self { Self { plane: Plane::new(objects) } }

    pub fn arn(name: &str) -> String { format!("arn:aws:batch:us-west-2:{}:job-queue/{}", ACCOUNT, name) }
}

fn is_queue(id: &str, q: &JobQueueDetail) -> bool { q.job_queue_arn == id || q.job_queue_name == id }

#[async_trait]
impl RemoteGateway<JobQueue> for FakeBatch {
    async fn create(&self, request: &JobQueueRequest) -> Result<(ResourceKey, JobQueueDetail), GatewayError> {
        self.plane.record("create")?;
        let JobQueueRequest::Create(c) = request else { return Err(GatewayError::Rejected("create needs a create input".into())) };
        let arn = Self::arn(&c.job_queue_name);
        if self.plane.objects().iter().any(|q| q.job_queue_arn == arn && q.status.as_deref() != Some("DELETED")) {
            return Err(GatewayError::Rejected(format!("job queue {} already exists", c.job_queue_name)));
        }
        let detail = JobQueueDetail {
            job_queue_arn: arn.clone(),
            job_queue_name: c.job_queue_name.clone(),
            priority: c.priority,
            state: c.state,
            status: Some("VALID".into()),
            status_reason: Some("JobQueue Healthy".into()),
            scheduling_policy_arn: c.scheduling_policy_arn.clone(),
            compute_environment_order: c.compute_environment_order.clone(),
            job_state_time_limit_actions: c.job_state_time_limit_actions.clone(),
            tags: c.tags.clone(),
        };
        self.plane.push(detail.clone());
        Ok((ResourceKey::single(arn), detail))
    }

    async fn describe(&self, key: &ResourceKey) -> Result<Vec<JobQueueDetail>, GatewayError> {
        self.plane.record("describe")?;
        let id = key.to_string();
        Ok(self.plane.select(|q| is_queue(&id, q)))
    }

    async fn update(&self, key: &ResourceKey, request: &JobQueueRequest) -> Result<JobQueueDetail, GatewayError> {
        self.plane.record("update")?;
        let JobQueueRequest::Update(u) = request else { return Err(GatewayError::Rejected("update needs an update input".into())) };
        let id = key.to_string();
        self.plane
            .modify(
                |q| is_queue(&id, q),
                |q| {
                    q.priority = u.priority;
                    q.state = u.state;
                    q.scheduling_policy_arn = u.scheduling_policy_arn.clone();
                    q.compute_environment_order = u.compute_environment_order.clone();
                    q.job_state_time_limit_actions = u.job_state_time_limit_actions.clone();
                    q.clone()
                },
            )
            .ok_or(GatewayError::NotFound(id))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), GatewayError> {
        self.plane.record("delete")?;
        let id = key.to_string();
        if !self.plane.has_effect("delete") {
            return Ok(());
        }
        self.plane
            .modify(|q| is_queue(&id, q), |q| q.status = Some("DELETED".into()))
            .ok_or(GatewayError::NotFound(id))
    }
}

#[async_trait]
impl TaggingGateway for FakeBatch {
    async fn tag_resource(&self, target: &str, tags: &TagSet) -> Result<Vec<KeyFailure>, GatewayError> {
        self.plane.record("tag")?;
        let mut objs = self.plane.objects.lock().unwrap();
        apply_tags(&self.plane, objs.iter_mut().find(|q| q.job_queue_arn == target).map(|q| &mut q.tags), tags)
    }

    async fn untag_resource(&self, target: &str, keys: &[String]) -> Result<Vec<KeyFailure>, GatewayError> {
        self.plane.record("untag")?;
        self.plane.untag_log.lock().unwrap().push(keys.to_vec());
        self.plane
            .modify(|q| q.job_queue_arn == target, |q| keys.iter().for_each(|k| { q.tags.remove(k); }))
            .ok_or_else(|| GatewayError::NotFound(target.to_string()))?;
        Ok(Vec::new())
    }
}

// ---- Cost Explorer ----

pub struct FakeCostExplorer {
    pub plane: Plane<CostAllocationTagEntry>,
    pub requests: Mutex<Vec<UpdateCostAllocationTagsStatusInput>>,
}

impl FakeCostExplorer {
    pub fn new(objects: Vec<CostAllocationTagEntry>) -> Self {
        Self { plane: Plane::new(objects), requests: Mutex::new(Vec::new()) }
    }

    pub fn status_of(&self, key: &str) -> Option<TagStatus> {
        self.plane.objects().into_iter().find(|t| t.tag_key == key).map(|t| t.status)
    }
}

#[async_trait]
impl RemoteGateway<CostAllocationTag> for FakeCostExplorer {
    async fn describe(&self, key: &ResourceKey) -> Result<Vec<CostAllocationTagEntry>, GatewayError> {
        self.plane.record("describe")?;
        let id = key.to_string();
        Ok(self.plane.select(|t| t.tag_key == id))
    }

    async fn update(&self, key: &ResourceKey, request: &UpdateCostAllocationTagsStatusInput) -> Result<CostAllocationTagEntry, GatewayError> {
        self.plane.record("update")?;
        self.requests.lock().unwrap().push(request.clone());
        for entry in &request.entries {
            let found = self.plane.modify(|t| t.tag_key == entry.tag_key, |t| t.status = entry.status);
            if found.is_none() {
                self.plane.push(CostAllocationTagEntry {
                    tag_key: entry.tag_key.clone(),
                    status: entry.status,
                    tag_type: "UserDefined".into(),
                    last_updated_date: None,
                    last_used_date: None,
                });
            }
        }
        let id = key.to_string();
        self.plane
            .objects()
            .into_iter()
            .find(|t| t.tag_key == id)
            .ok_or(GatewayError::NotFound(id))
    }

    async fn delete(&self, _key: &ResourceKey) -> Result<(), GatewayError> {
        self.plane.record("delete")?;
        Ok(())
    }
}

// ---- S3 Control ----

pub struct FakeS3Control {
    pub plane: Plane<AccessGrantDetail>,
}

impl FakeS3Control {
    pub fn new(objects: Vec<AccessGrantDetail>) -> Self { Self { plane: Plane::new(objects) } }
}

fn grant_matches(key: &ResourceKey, g: &AccessGrantDetail) -> bool {
    key.as_composite()
        .is_some_and(|k| k.part(0) == Some(g.account_id.as_str()) && k.part(1) == Some(g.access_grant_id.as_str()))
}

#[async_trait]
impl RemoteGateway<AccessGrant> for FakeS3Control {
    async fn create(&self, request: &CreateAccessGrantInput) -> Result<(ResourceKey, AccessGrantDetail), GatewayError> {
        self.plane.record("create")?;
        let account_id = request.account_id.clone().unwrap_or_else(|| ACCOUNT.to_string());
        let access_grant_id = format!("grant-{}", uuid::Uuid::new_v4().simple());
        let detail = AccessGrantDetail {
            access_grant_arn: format!("arn:aws:s3:us-west-2:{}:access-grants/default/grant/{}", account_id, access_grant_id),
            account_id,
            access_grant_id,
            access_grants_location_id: request.access_grants_location_id.clone(),
            access_grants_location_configuration: request.access_grants_location_configuration.clone(),
            grantee: request.grantee.clone(),
            permission: request.permission,
            grant_scope: "s3://bucket/prefix*".into(),
            tags: request.tags.clone(),
        };
        self.plane.push(detail.clone());
        let key = AccessGrant::key(&detail.account_id, &detail.access_grant_id)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        Ok((key, detail))
    }

    /// get-access-grant reports a missing grant as an error, not an empty list.
    async fn describe(&self, key: &ResourceKey) -> Result<Vec<AccessGrantDetail>, GatewayError> {
        self.plane.record("describe")?;
        let found = self.plane.select(|g| grant_matches(key, g));
        if found.is_empty() {
            return Err(GatewayError::NotFound(key.to_string()));
        }
        Ok(found)
    }

    async fn update(&self, _key: &ResourceKey, _request: &CreateAccessGrantInput) -> Result<AccessGrantDetail, GatewayError> {
        self.plane.record("update")?;
        Err(GatewayError::Rejected("access grants cannot be updated".into()))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), GatewayError> {
        self.plane.record("delete")?;
        let before = self.plane.objects().len();
        self.plane.remove_where(|g| grant_matches(key, g));
        if self.plane.objects().len() == before {
            return Err(GatewayError::NotFound(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaggingGateway for FakeS3Control {
    async fn tag_resource(&self, target: &str, tags: &TagSet) -> Result<Vec<KeyFailure>, GatewayError> {
        self.plane.record("tag")?;
        let mut objs = self.plane.objects.lock().unwrap();
        apply_tags(&self.plane, objs.iter_mut().find(|g| g.access_grant_arn == target).map(|g| &mut g.tags), tags)
    }

    async fn untag_resource(&self, target: &str, keys: &[String]) -> Result<Vec<KeyFailure>, GatewayError> {
        self.plane.record("untag")?;
        self.plane.untag_log.lock().unwrap().push(keys.to_vec());
        self.plane
            .modify(|g| g.access_grant_arn == target, |g| keys.iter().for_each(|k| { g.tags.remove(k); }))
            .ok_or_else(|| GatewayError::NotFound(target.to_string()))?;
        Ok(Vec::new())
    }
}
