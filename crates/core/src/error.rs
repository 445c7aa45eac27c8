//! Error taxonomy shared by the gateway, the resolver and the reconciler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::KeyError;

/// Reconciliation step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "creating",
            Self::Read => "reading",
            Self::Update => "updating",
            Self::Delete => "deleting",
            Self::Import => "importing",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Per-key failure reported by a multi-key remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFailure {
    pub key: String,
    pub message: String,
}

impl KeyFailure {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self { key: key.into(), message: message.into() }
    }
}

/// Errors surfaced by a Remote Gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("request throttled")]
    Throttled,
    #[error("remote service unavailable (status {status})")]
    Unavailable { status: u16 },
    #[error("connection reset")]
    ConnectionReset,
    #[error("request timed out")]
    Timeout,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("{} key(s) failed", .0.len())]
    KeyErrors(Vec<KeyFailure>),
    #[error("operation not supported by this resource type: {0}")]
    Unsupported(&'static str),
}

impl GatewayError {
    /// Transient transport conditions worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable { .. } | Self::ConnectionReset | Self::Timeout)
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{type_name} ({key}) not found")]
    NotFound { type_name: &'static str, key: String },

    #[error("{op} {type_name} ({key}): too many results: wanted 1, got {count}")]
    Ambiguous { type_name: &'static str, key: String, op: Operation, count: usize },

    #[error("{op} {type_name} ({key}): {source}")]
    Transport {
        type_name: &'static str,
        key: String,
        op: Operation,
        #[source]
        source: GatewayError,
    },

    #[error("invalid {type_name}: {message}")]
    Validation { type_name: &'static str, message: String },

    #[error("{op} {type_name} ({key}): {} key(s) failed ({}), {} applied", .failed.len(), failed_keys(.failed), .applied.len())]
    PartialFailure {
        type_name: &'static str,
        key: String,
        op: Operation,
        failed: Vec<KeyFailure>,
        applied: Vec<String>,
    },

    #[error("{op} {type_name} ({key}): remote object not visible after write")]
    InconsistentRead { type_name: &'static str, key: String, op: Operation },

    #[error("{op} {type_name} ({key}): cancelled")]
    Cancelled { type_name: &'static str, key: String, op: Operation },

    #[error("{op} {type_name} ({key}): deadline exceeded")]
    DeadlineExceeded { type_name: &'static str, key: String, op: Operation },

    /// The remote accepted a create under `key` but the pass failed before it
    /// finished. Local state must keep `key` or the object is orphaned.
    #[error("{type_name} ({key}) was created but the pass did not complete: {source}")]
    Unconfirmed {
        type_name: &'static str,
        key: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

fn failed_keys(failed: &[KeyFailure]) -> String {
    failed.iter().map(|f| f.key.as_str()).collect::<Vec<_>>().join(", ")
}

impl ReconcileError {
    pub fn validation(type_name: &'static str, message: impl fmt::Display) -> Self {
        Self::Validation { type_name, message: message.to_string() }
    }

    pub fn key(type_name: &'static str, err: KeyError) -> Self { Self::validation(type_name, err) }

    /// Map a gateway error raised during `op`. `NotFound` keeps its own class.
    pub fn gateway(type_name: &'static str, key: impl Into<String>, op: Operation, source: GatewayError) -> Self {
        let key = key.into();
        match source {
            GatewayError::NotFound(_) => Self::NotFound { type_name, key },
            source => Self::Transport { type_name, key, op, source },
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }

    /// Id the remote accepted during the failed pass, if any.
    pub fn bound_id(&self) -> Option<&str> {
        match self {
            Self::Unconfirmed { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }

    /// The underlying failure, looking through `Unconfirmed`.
    pub fn root(&self) -> &ReconcileError {
        match self {
            Self::Unconfirmed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Keys a partial or per-key failure is attributed to.
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            Self::PartialFailure { failed, .. } => failed.iter().map(|f| f.key.as_str()).collect(),
            Self::Transport { source: GatewayError::KeyErrors(failed), .. } => {
                failed.iter().map(|f| f.key.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}
