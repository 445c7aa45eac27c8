//! Batch job queue.
//!
//! Keyed by ARN; describe also accepts the queue name, which is how a queue
//! is imported or looked up as a data source.

use rekon_core::{Projector, ReconcileError, ResourceKey, ResourceKind, TagSet, WriteIntent};
use serde::{Deserialize, Serialize};

const TYPE_NAME: &str = "Batch Job Queue";
const MAX_COMPUTE_ENVIRONMENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobQueueState {
    #[default]
    Enabled,
    Disabled,
}

/// One ranked compute environment. `order` is authoritative; the position in
/// the list is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeEnvironmentOrder {
    pub compute_environment: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStateTimeLimitAction {
    pub action: String,
    pub max_time_seconds: i64,
    pub reason: String,
    pub state: String,
}

/// Describe output for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueueDetail {
    pub job_queue_arn: String,
    pub job_queue_name: String,
    pub priority: i64,
    pub state: JobQueueState,
    pub status: Option<String>,
    pub status_reason: Option<String>,
    pub scheduling_policy_arn: Option<String>,
    pub compute_environment_order: Vec<ComputeEnvironmentOrder>,
    pub job_state_time_limit_actions: Vec<JobStateTimeLimitAction>,
    pub tags: TagSet,
}

/// Declared attributes. `arn`, `status` and `status_reason` are computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobQueueAttrs {
    pub name: String,
    pub priority: i64,
    #[serde(default)]
    pub state: JobQueueState,
    #[serde(default)]
    pub scheduling_policy_arn: Option<String>,
    #[serde(default)]
    pub compute_environment_order: Vec<ComputeEnvironmentOrder>,
    #[serde(default)]
    pub job_state_time_limit_action: Vec<JobStateTimeLimitAction>,
    #[serde(default)]
    pub tags: TagSet,

    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateJobQueueInput {
    pub job_queue_name: String,
    pub priority: i64,
    pub state: JobQueueState,
    pub scheduling_policy_arn: Option<String>,
    pub compute_environment_order: Vec<ComputeEnvironmentOrder>,
    pub job_state_time_limit_actions: Vec<JobStateTimeLimitAction>,
    pub tags: TagSet,
}

/// Update takes no name and no tags; tags go through the tagging API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateJobQueueInput {
    pub priority: i64,
    pub state: JobQueueState,
    pub scheduling_policy_arn: Option<String>,
    pub compute_environment_order: Vec<ComputeEnvironmentOrder>,
    pub job_state_time_limit_actions: Vec<JobStateTimeLimitAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobQueueRequest {
    Create(CreateJobQueueInput),
    Update(UpdateJobQueueInput),
}

pub struct JobQueue;

fn validate(attrs: &JobQueueAttrs) -> Result<(), ReconcileError> {
    let name = &attrs.name;
    if name.is_empty() || name.len() > 128 {
        return Err(ReconcileError::validation(TYPE_NAME, "name must be 1-128 characters"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ReconcileError::validation(TYPE_NAME, format!("name {:?} may only contain letters, numbers, hyphens and underscores", name)));
    }
    if !(0..=1000).contains(&attrs.priority) {
        return Err(ReconcileError::validation(TYPE_NAME, format!("priority {} out of range 0-1000", attrs.priority)));
    }
    if attrs.compute_environment_order.len() > MAX_COMPUTE_ENVIRONMENTS {
        return Err(ReconcileError::validation(
            TYPE_NAME,
            format!("at most {} compute environments, got {}", MAX_COMPUTE_ENVIRONMENTS, attrs.compute_environment_order.len()),
        ));
    }
    Ok(())
}

/// Compare rankings by their explicit order values, ignoring list position.
fn ranking(list: &[ComputeEnvironmentOrder]) -> Vec<(i64, &str)> {
    let mut out: Vec<(i64, &str)> = list.iter().map(|c| (c.order, c.compute_environment.as_str())).collect();
    out.sort_unstable();
    out
}

impl Projector for JobQueue {
    type Remote = JobQueueDetail;
    type Declared = JobQueueAttrs;
    type Request = JobQueueRequest;

    fn to_declared(remote: &JobQueueDetail) -> JobQueueAttrs {
        JobQueueAttrs {
            name: remote.job_queue_name.clone(),
            priority: remote.priority,
            state: remote.state,
            scheduling_policy_arn: remote.scheduling_policy_arn.clone(),
            compute_environment_order: remote.compute_environment_order.clone(),
            job_state_time_limit_action: remote.job_state_time_limit_actions.clone(),
            tags: remote.tags.clone(),
            arn: Some(remote.job_queue_arn.clone()),
            status: remote.status.clone(),
            status_reason: remote.status_reason.clone(),
        }
    }

    fn to_request(declared: &JobQueueAttrs, intent: WriteIntent) -> Result<JobQueueRequest, ReconcileError> {
        validate(declared)?;
        Ok(match intent {
            WriteIntent::Create => JobQueueRequest::Create(CreateJobQueueInput {
                job_queue_name: declared.name.clone(),
                priority: declared.priority,
                state: declared.state,
                scheduling_policy_arn: declared.scheduling_policy_arn.clone(),
                compute_environment_order: declared.compute_environment_order.clone(),
                job_state_time_limit_actions: declared.job_state_time_limit_action.clone(),
                tags: declared.tags.clone(),
            }),
            WriteIntent::Update => JobQueueRequest::Update(UpdateJobQueueInput {
                priority: declared.priority,
                state: declared.state,
                scheduling_policy_arn: declared.scheduling_policy_arn.clone(),
                compute_environment_order: declared.compute_environment_order.clone(),
                job_state_time_limit_actions: declared.job_state_time_limit_action.clone(),
            }),
        })
    }
}

impl ResourceKind for JobQueue {
    const TYPE_NAME: &'static str = TYPE_NAME;

    fn canonical_key(remote: &JobQueueDetail) -> Option<ResourceKey> {
        Some(ResourceKey::single(remote.job_queue_arn.clone()))
    }

    fn is_tombstone(remote: &JobQueueDetail) -> bool { remote.status.as_deref() == Some("DELETED") }

    fn matches(key: &ResourceKey, remote: &JobQueueDetail) -> bool {
        key.as_single().is_some_and(|id| id == remote.job_queue_arn || id == remote.job_queue_name)
    }

    fn attributes_differ(desired: &JobQueueAttrs, observed: &JobQueueAttrs) -> bool {
        desired.priority != observed.priority
            || desired.state != observed.state
            || desired.scheduling_policy_arn != observed.scheduling_policy_arn
            || ranking(&desired.compute_environment_order) != ranking(&observed.compute_environment_order)
            || desired.job_state_time_limit_action != observed.job_state_time_limit_action
    }

    fn tags(declared: &JobQueueAttrs) -> Option<&TagSet> { Some(&declared.tags) }

    fn tag_target(observed: &JobQueueAttrs) -> Option<String> { observed.arn.clone() }
}
