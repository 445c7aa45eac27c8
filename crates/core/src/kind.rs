//! Traits implemented once per resource kind.
//!
//! A kind is a zero-sized marker type tying together the typed declared
//! attributes, the remote object shape and the write request shape, plus the
//! pure projections between them.

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ReconcileError;
use crate::key::ResourceKey;
use crate::tags::TagSet;

/// How the remote API mutates objects of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Distinct create, update and delete primitives.
    Crud,
    /// Upsert-only API: create collapses into update, and delete is an update
    /// that flips an enumerated status to its inactive value.
    StatusFlag,
}

/// Which write a request is being built for. Remote APIs often accept a
/// different field subset on create than on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteIntent {
    Create,
    Update,
}

/// Pure mappings between remote objects, declared attributes and write requests.
pub trait Projector {
    type Remote: Clone + Debug + Send + Sync + 'static;
    type Declared: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Request: Clone + Debug + Send + Sync + 'static;

    /// Remote object to declared attributes. Empty lists stay empty lists and
    /// explicit order fields are copied, never re-derived from position.
    fn to_declared(remote: &Self::Remote) -> Self::Declared;

    /// Declared attributes to a write request, with computed-only fields stripped.
    fn to_request(declared: &Self::Declared, intent: WriteIntent) -> Result<Self::Request, ReconcileError>;

    /// Copy write-only attributes the remote never returns from the prior
    /// declared state onto a fresh projection.
    fn carry_forward(_projected: &mut Self::Declared, _prior: &Self::Declared) {}
}

pub trait ResourceKind: Projector + Send + Sync + 'static {
    /// Human readable name used in errors and logs, e.g. "Batch Job Queue".
    const TYPE_NAME: &'static str;
    const WRITE_MODE: WriteMode = WriteMode::Crud;
    /// Number of components in this kind's key; 1 means a single opaque id.
    const KEY_ARITY: usize = 1;

    /// Key derivable from declared attributes alone, for kinds whose identity
    /// is user-chosen.
    fn natural_key(_declared: &Self::Declared) -> Option<ResourceKey> { None }

    /// Canonical key of a remote object, when it differs from the key used to
    /// look it up (e.g. a name resolving to an ARN).
    fn canonical_key(_remote: &Self::Remote) -> Option<ResourceKey> { None }

    /// Objects still listed by the remote but already deleted count as absent.
    fn is_tombstone(_remote: &Self::Remote) -> bool { false }

    /// Equality predicate used by the lookup resolver to pick candidates out
    /// of a describe/list response.
    fn matches(key: &ResourceKey, remote: &Self::Remote) -> bool;

    /// Whether any mutable non-tag attribute differs.
    fn attributes_differ(desired: &Self::Declared, observed: &Self::Declared) -> bool;

    /// Declared state with its status forced to the inactive value. Only
    /// meaningful for `WriteMode::StatusFlag` kinds.
    fn retire(declared: &Self::Declared) -> Self::Declared { declared.clone() }

    /// Tags managed through the generic tagging side-channel, if any.
    fn tags(_declared: &Self::Declared) -> Option<&TagSet> { None }

    /// Address the tagging side-channel expects (usually an ARN), taken from
    /// observed state.
    fn tag_target(_observed: &Self::Declared) -> Option<String> { None }
}
