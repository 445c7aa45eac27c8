//! S3 access grant, keyed by `account_id,access_grant_id`.
//!
//! Grants cannot be modified in place: every attribute except tags forces
//! replacement, so an update only ever touches tags.

use rekon_core::{CompositeKey, Projector, ReconcileError, ResourceKey, ResourceKind, TagSet, WriteIntent};
use serde::{Deserialize, Serialize};

const TYPE_NAME: &str = "S3 Access Grant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Read,
    Write,
    Readwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grantee {
    /// `IAM`, `DIRECTORY_USER` or `DIRECTORY_GROUP`.
    pub grantee_type: String,
    pub grantee_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfiguration {
    pub s3_sub_prefix: String,
}

/// Remote grant as returned by get-access-grant, with tags and the owning
/// account filled in by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrantDetail {
    pub account_id: String,
    pub access_grant_id: String,
    pub access_grant_arn: String,
    pub access_grants_location_id: String,
    pub access_grants_location_configuration: Option<LocationConfiguration>,
    pub grantee: Grantee,
    pub permission: Permission,
    pub grant_scope: String,
    pub tags: TagSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrantAttrs {
    /// Optional; the caller's account when unset.
    #[serde(default)]
    pub account_id: Option<String>,
    pub access_grants_location_id: String,
    #[serde(default)]
    pub access_grants_location_configuration: Vec<LocationConfiguration>,
    pub grantee: Option<Grantee>,
    pub permission: Permission,
    /// Write-only: accepted on create, never returned.
    #[serde(default)]
    pub s3_prefix_type: Option<String>,
    #[serde(default)]
    pub tags: TagSet,

    #[serde(default)]
    pub access_grant_arn: Option<String>,
    #[serde(default)]
    pub access_grant_id: Option<String>,
    #[serde(default)]
    pub grant_scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccessGrantInput {
    pub account_id: Option<String>,
    pub access_grants_location_id: String,
    pub access_grants_location_configuration: Option<LocationConfiguration>,
    pub grantee: Grantee,
    pub permission: Permission,
    pub s3_prefix_type: Option<String>,
    pub tags: TagSet,
}

pub struct AccessGrant;

impl AccessGrant {
    pub fn key(account_id: &str, access_grant_id: &str) -> Result<ResourceKey, ReconcileError> {
        CompositeKey::new([account_id, access_grant_id])
            .map(ResourceKey::from)
            .map_err(|e| ReconcileError::key(TYPE_NAME, e))
    }
}

impl Projector for AccessGrant {
    type Remote = AccessGrantDetail;
    type Declared = AccessGrantAttrs;
    type Request = CreateAccessGrantInput;

    fn to_declared(remote: &AccessGrantDetail) -> AccessGrantAttrs {
        AccessGrantAttrs {
            account_id: Some(remote.account_id.clone()),
            access_grants_location_id: remote.access_grants_location_id.clone(),
            access_grants_location_configuration: remote.access_grants_location_configuration.iter().cloned().collect(),
            grantee: Some(remote.grantee.clone()),
            permission: remote.permission,
            s3_prefix_type: None,
            tags: remote.tags.clone(),
            access_grant_arn: Some(remote.access_grant_arn.clone()),
            access_grant_id: Some(remote.access_grant_id.clone()),
            grant_scope: Some(remote.grant_scope.clone()),
        }
    }

    fn to_request(declared: &AccessGrantAttrs, intent: WriteIntent) -> Result<CreateAccessGrantInput, ReconcileError> {
        if intent == WriteIntent::Update {
            return Err(ReconcileError::validation(TYPE_NAME, "grants have no update API; attribute changes require replacement"));
        }
        if declared.access_grants_location_id.is_empty() {
            return Err(ReconcileError::validation(TYPE_NAME, "access_grants_location_id is required"));
        }
        let grantee = declared.grantee.clone().ok_or_else(|| ReconcileError::validation(TYPE_NAME, "grantee is required"))?;
        if declared.access_grants_location_configuration.len() > 1 {
            return Err(ReconcileError::validation(TYPE_NAME, "at most one access_grants_location_configuration block"));
        }
        Ok(CreateAccessGrantInput {
            account_id: declared.account_id.clone(),
            access_grants_location_id: declared.access_grants_location_id.clone(),
            access_grants_location_configuration: declared.access_grants_location_configuration.first().cloned(),
            grantee,
            permission: declared.permission,
            s3_prefix_type: declared.s3_prefix_type.clone(),
            tags: declared.tags.clone(),
        })
    }

    fn carry_forward(projected: &mut AccessGrantAttrs, prior: &AccessGrantAttrs) {
        projected.s3_prefix_type = prior.s3_prefix_type.clone();
    }
}

impl ResourceKind for AccessGrant {
    const TYPE_NAME: &'static str = TYPE_NAME;
    const KEY_ARITY: usize = 2;

    fn canonical_key(remote: &AccessGrantDetail) -> Option<ResourceKey> {
        Self::key(&remote.account_id, &remote.access_grant_id).ok()
    }

    fn matches(key: &ResourceKey, remote: &AccessGrantDetail) -> bool {
        key.as_composite().is_some_and(|k| {
            k.part(0) == Some(remote.account_id.as_str()) && k.part(1) == Some(remote.access_grant_id.as_str())
        })
    }

    fn attributes_differ(_desired: &AccessGrantAttrs, _observed: &AccessGrantAttrs) -> bool { false }

    fn tags(declared: &AccessGrantAttrs) -> Option<&TagSet> { Some(&declared.tags) }

    fn tag_target(observed: &AccessGrantAttrs) -> Option<String> { observed.access_grant_arn.clone() }
}
