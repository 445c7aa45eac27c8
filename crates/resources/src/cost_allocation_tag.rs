//! Cost allocation tag activation.
//!
//! The remote API only upserts tag statuses: creating means activating and
//! deleting means deactivating. The tag key is the resource id.

use rekon_core::{Projector, ReconcileError, ResourceKey, ResourceKind, TagStatus, WriteIntent, WriteMode};
use serde::{Deserialize, Serialize};

const TYPE_NAME: &str = "Cost Allocation Tag";
const MAX_TAG_KEY_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAllocationTagEntry {
    pub tag_key: String,
    pub status: TagStatus,
    /// `AWSGenerated` or `UserDefined`.
    pub tag_type: String,
    pub last_updated_date: Option<String>,
    pub last_used_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAllocationTagAttrs {
    pub tag_key: String,
    pub status: TagStatus,
    /// Computed.
    #[serde(default, rename = "type")]
    pub tag_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostAllocationTagStatusEntry {
    pub tag_key: String,
    pub status: TagStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCostAllocationTagsStatusInput {
    pub entries: Vec<CostAllocationTagStatusEntry>,
}

pub struct CostAllocationTag;

impl Projector for CostAllocationTag {
    type Remote = CostAllocationTagEntry;
    type Declared = CostAllocationTagAttrs;
    type Request = UpdateCostAllocationTagsStatusInput;

    fn to_declared(remote: &CostAllocationTagEntry) -> CostAllocationTagAttrs {
        CostAllocationTagAttrs { tag_key: remote.tag_key.clone(), status: remote.status, tag_type: Some(remote.tag_type.clone()) }
    }

    fn to_request(declared: &CostAllocationTagAttrs, _intent: WriteIntent) -> Result<UpdateCostAllocationTagsStatusInput, ReconcileError> {
        let len = declared.tag_key.chars().count();
        if len == 0 || len > MAX_TAG_KEY_LEN {
            return Err(ReconcileError::validation(TYPE_NAME, format!("tag_key must be 1-{} characters", MAX_TAG_KEY_LEN)));
        }
        Ok(UpdateCostAllocationTagsStatusInput {
            entries: vec![CostAllocationTagStatusEntry { tag_key: declared.tag_key.clone(), status: declared.status }],
        })
    }
}

impl ResourceKind for CostAllocationTag {
    const TYPE_NAME: &'static str = TYPE_NAME;
    const WRITE_MODE: WriteMode = WriteMode::StatusFlag;

    fn natural_key(declared: &CostAllocationTagAttrs) -> Option<ResourceKey> {
        (!declared.tag_key.is_empty()).then(|| ResourceKey::single(declared.tag_key.clone()))
    }

    fn matches(key: &ResourceKey, remote: &CostAllocationTagEntry) -> bool {
        key.as_single() == Some(remote.tag_key.as_str())
    }

    fn attributes_differ(desired: &CostAllocationTagAttrs, observed: &CostAllocationTagAttrs) -> bool {
        desired.status != observed.status
    }

    fn retire(declared: &CostAllocationTagAttrs) -> CostAllocationTagAttrs {
        CostAllocationTagAttrs { status: TagStatus::Inactive, ..declared.clone() }
    }
}
