//! Rekon apply: the reconciliation core.
//!
//! - [`lookup`]: singular-result lookup by key
//! - [`reconcile`]: the create/read/update/delete state machine
//! - [`tags`]: generic tag-set and status-flag synchronization
//! - [`driver`]: batched passes with per-address serialization

#![forbid(unsafe_code)]

pub mod config;
pub mod driver;
pub mod lookup;
pub mod reconcile;
pub mod tags;

pub use config::ReconcilerConfig;
pub use driver::{Driver, Job, JobResult, KeyLocks};
pub use lookup::{find_single, Resolver};
pub use reconcile::{Action, ReadOutcome, Reconciler};
pub use tags::{plan as plan_tags, StatusFlagSync, TagDiff, TagSynchronizer};

pub use rekon_core as core;
pub use rekon_gateway as gateway;
