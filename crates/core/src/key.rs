//! Resource keys: opaque single identifiers (e.g. ARNs) and composite keys
//! made of ordered, independently meaningful components.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Delimiter between composite key components in the serialized form.
pub const KEY_DELIMITER: char = ',';
const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("resource id is empty")]
    Empty,
    #[error("key component {index} is empty")]
    EmptyComponent { index: usize },
    #[error("expected {expected} key components, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("resource id ends with a dangling escape")]
    DanglingEscape,
}

/// Ordered tuple of key components. Components may contain the delimiter;
/// the serialized form escapes it so parsing is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    parts: SmallVec<[String; 3]>,
}

impl CompositeKey {
    pub fn new<I, S>(parts: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = Self { parts: parts.into_iter().map(Into::into).collect() };
        key.validate()?;
        Ok(key)
    }

    pub fn parts(&self) -> &[String] { &self.parts }

    pub fn len(&self) -> usize { self.parts.len() }

    pub fn is_empty(&self) -> bool { self.parts.is_empty() }

    /// Component at `index`, if present.
    pub fn part(&self, index: usize) -> Option<&str> { self.parts.get(index).map(String::as_str) }

    pub fn validate(&self) -> Result<(), KeyError> {
        if self.parts.is_empty() {
            return Err(KeyError::Empty);
        }
        if let Some(index) = self.parts.iter().position(|p| p.is_empty()) {
            return Err(KeyError::EmptyComponent { index });
        }
        Ok(())
    }

    /// Parse a serialized id, requiring exactly `arity` components.
    pub fn parse(id: &str, arity: usize) -> Result<Self, KeyError> {
        if id.is_empty() {
            return Err(KeyError::Empty);
        }
        let mut parts: SmallVec<[String; 3]> = SmallVec::new();
        let mut cur = String::new();
        let mut chars = id.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(next) => cur.push(next),
                    None => return Err(KeyError::DanglingEscape),
                },
                KEY_DELIMITER => parts.push(std::mem::take(&mut cur)),
                other => cur.push(other),
            }
        }
        parts.push(cur);
        if parts.len() != arity {
            return Err(KeyError::Arity { expected: arity, found: parts.len() });
        }
        let key = Self { parts };
        key.validate()?;
        Ok(key)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", KEY_DELIMITER)?;
            }
            for c in part.chars() {
                if c == KEY_DELIMITER || c == ESCAPE {
                    write!(f, "{}", ESCAPE)?;
                }
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Identifier bound to a declared resource once the remote object exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    Single(String),
    Composite(CompositeKey),
}

impl ResourceKey {
    pub fn single(id: impl Into<String>) -> Self { Self::Single(id.into()) }

    /// Parse an id for a kind whose key has `arity` components. Arity 1 keeps
    /// the id verbatim.
    pub fn parse(id: &str, arity: usize) -> Result<Self, KeyError> {
        if arity <= 1 {
            if id.is_empty() {
                return Err(KeyError::Empty);
            }
            return Ok(Self::Single(id.to_string()));
        }
        CompositeKey::parse(id, arity).map(Self::Composite)
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Composite(k) => k.len(),
        }
    }

    pub fn validate(&self) -> Result<(), KeyError> {
        match self {
            Self::Single(s) if s.is_empty() => Err(KeyError::Empty),
            Self::Single(_) => Ok(()),
            Self::Composite(k) => k.validate(),
        }
    }

    /// Check component count against what a kind expects.
    pub fn validate_arity(&self, expected: usize) -> Result<(), KeyError> {
        self.validate()?;
        if self.arity() != expected {
            return Err(KeyError::Arity { expected, found: self.arity() });
        }
        Ok(())
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(s) => Some(s),
            Self::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeKey> {
        match self {
            Self::Single(_) => None,
            Self::Composite(k) => Some(k),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(s) => f.write_str(s),
            Self::Composite(k) => fmt::Display::fmt(k, f),
        }
    }
}

impl From<CompositeKey> for ResourceKey {
    fn from(k: CompositeKey) -> Self { Self::Composite(k) }
}
