//! Rekon gateway: the interface to the remote control plane.
//!
//! Implementations issue authenticated calls against the remote API; this
//! crate only fixes the shape of those calls and the retry policy applied at
//! the boundary.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use rekon_core::{GatewayError, KeyFailure, ResourceKey, ResourceKind, TagSet};

mod retry;

pub use retry::{with_retry, RetryPolicy, RetryingGateway};

/// Create/describe/update/delete calls for one resource kind.
///
/// `NotFound` must be reported as `GatewayError::NotFound` (or an empty
/// describe result), never folded into a transport error.
#[allow(unused_variables)]
#[async_trait]
pub trait RemoteGateway<K: ResourceKind>: Send + Sync {
    /// Create the object; returns the identifier the remote assigned.
    async fn create(&self, request: &K::Request) -> Result<(ResourceKey, K::Remote), GatewayError> {
        Err(GatewayError::Unsupported("create"))
    }

    /// Describe/list by identifier. May return zero, one or several candidates.
    async fn describe(&self, key: &ResourceKey) -> Result<Vec<K::Remote>, GatewayError>;

    async fn update(&self, key: &ResourceKey, request: &K::Request) -> Result<K::Remote, GatewayError>;

    async fn delete(&self, key: &ResourceKey) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported("delete"))
    }
}

/// Generic tagging side-channel addressed by resource target (e.g. ARN).
/// Both calls return the keys the remote rejected individually.
#[async_trait]
pub trait TaggingGateway: Send + Sync {
    async fn tag_resource(&self, target: &str, tags: &TagSet) -> Result<Vec<KeyFailure>, GatewayError>;
    async fn untag_resource(&self, target: &str, keys: &[String]) -> Result<Vec<KeyFailure>, GatewayError>;
}
