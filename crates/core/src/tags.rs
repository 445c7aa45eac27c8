use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tag key to tag value. Keys are unique; iteration order is deterministic.
pub type TagSet = BTreeMap<String, String>;

/// Status of a status-flag tag. Removing such a tag means flipping it to
/// `Inactive`; the entry itself is never deleted remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TagStatus {
    #[default]
    Active,
    Inactive,
}

impl TagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for TagStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown tag status {:?} (expected Active or Inactive)", other)),
        }
    }
}
