use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Reconciler knobs. Durations are stored as integers so the struct reads
/// naturally from YAML and env vars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Reads attempted after a write before the object is declared
    /// inconsistent (and before a delete is declared unconfirmed).
    pub consistency_attempts: u32,
    pub consistency_backoff_ms: u64,
    pub consistency_max_backoff_ms: u64,
    /// Upper bound on one reconciliation pass.
    pub pass_timeout_secs: u64,
    /// Poll until the object is gone after a delete call.
    pub verify_delete: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            consistency_attempts: 5,
            consistency_backoff_ms: 500,
            consistency_max_backoff_ms: 2_000,
            pass_timeout_secs: 300,
            verify_delete: true,
        }
    }
}

impl ReconcilerConfig {
    /// Defaults overridden by `REKON_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            consistency_attempts: env_u64("REKON_CONSISTENCY_ATTEMPTS").map(|v| v as u32).unwrap_or(d.consistency_attempts).max(1),
            consistency_backoff_ms: env_u64("REKON_CONSISTENCY_BACKOFF_MS").unwrap_or(d.consistency_backoff_ms),
            consistency_max_backoff_ms: env_u64("REKON_CONSISTENCY_MAX_BACKOFF_MS").unwrap_or(d.consistency_max_backoff_ms),
            pass_timeout_secs: env_u64("REKON_PASS_TIMEOUT_SECS").unwrap_or(d.pass_timeout_secs),
            verify_delete: env_flag("REKON_VERIFY_DELETE").unwrap_or(d.verify_delete),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml).context("parsing reconciler config YAML")?;
        Ok(cfg)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    pub fn pass_timeout(&self) -> Duration { Duration::from_secs(self.pass_timeout_secs) }

    /// Delay before consistency read number `attempt` (1-based).
    pub fn consistency_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.consistency_backoff_ms.saturating_mul(1u64 << shift).min(self.consistency_max_backoff_ms);
        Duration::from_millis(ms)
    }
}
