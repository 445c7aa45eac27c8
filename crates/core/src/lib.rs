//! Rekon core types: resource keys, the error taxonomy, tag sets and the
//! traits every reconcilable resource kind implements.

#![forbid(unsafe_code)]

pub mod error;
pub mod key;
pub mod kind;
pub mod record;
pub mod tags;

pub use error::{GatewayError, KeyFailure, Operation, ReconcileError};
pub use key::{CompositeKey, KeyError, ResourceKey, KEY_DELIMITER};
pub use kind::{Projector, ResourceKind, WriteIntent, WriteMode};
pub use record::{Phase, StateRecord};
pub use tags::{TagSet, TagStatus};

pub mod prelude {
    pub use super::{
        CompositeKey, GatewayError, KeyFailure, Operation, Phase, Projector, ReconcileError, ResourceKey,
        ResourceKind, StateRecord, TagSet, TagStatus, WriteIntent, WriteMode,
    };
}
