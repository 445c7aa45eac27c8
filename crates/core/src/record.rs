use serde::{Deserialize, Serialize};

use crate::key::{KeyError, ResourceKey};

/// Lifecycle phase of one resource instance.
///
/// `Absent -> Creating -> Active -> Updating -> Active -> Deleting -> Absent`;
/// `Absent` and `Active` survive the end of a pass, and `Creating` survives
/// only when a create was accepted but never confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Absent,
    Creating,
    Active,
    Updating,
    Deleting,
}

impl Phase {
    pub fn can_transition(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Absent, Creating)
                | (Creating, Active)
                | (Creating, Absent)
                | (Active, Updating)
                | (Active, Deleting)
                | (Active, Absent)
                | (Updating, Active)
                | (Deleting, Absent)
        )
    }
}

/// Persisted state record: the bound id plus the last known declared attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "D: serde::de::DeserializeOwned", serialize = "D: Serialize"))]
pub struct StateRecord<D> {
    pub id: Option<String>,
    pub attrs: Option<D>,
    #[serde(default)]
    pub phase: Phase,
}

impl<D> Default for StateRecord<D> {
    fn default() -> Self { Self::absent() }
}

impl<D> StateRecord<D> {
    pub fn absent() -> Self { Self { id: None, attrs: None, phase: Phase::Absent } }

    pub fn active(key: &ResourceKey, attrs: D) -> Self {
        Self { id: Some(key.to_string()), attrs: Some(attrs), phase: Phase::Active }
    }

    /// Bound to a key the remote accepted but no read has confirmed yet.
    pub fn pending(id: impl Into<String>, attrs: Option<D>) -> Self {
        Self { id: Some(id.into()), attrs, phase: Phase::Creating }
    }

    pub fn is_bound(&self) -> bool { self.id.is_some() }

    /// Parse the bound id for a kind with `arity` key components.
    pub fn key(&self, arity: usize) -> Option<Result<ResourceKey, KeyError>> {
        self.id.as_deref().map(|id| ResourceKey::parse(id, arity))
    }
}
