//! Rekon resource kinds.
//!
//! Each kind is a marker type implementing `ResourceKind` plus the typed
//! remote, declared and request shapes it projects between.

#![forbid(unsafe_code)]

pub mod access_grant;
pub mod cost_allocation_tag;
pub mod job_queue;

pub use access_grant::AccessGrant;
pub use cost_allocation_tag::CostAllocationTag;
pub use job_queue::JobQueue;
