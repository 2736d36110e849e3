//! Runtime configuration (`<root>/config.toml`).
//!
//! Every field is optional in the file; missing keys take the defaults below.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{LoopError, Result};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STALE_LOCK_MAX_AGE_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_PROCESSED_CAPACITY: usize = 200;
pub const DEFAULT_DIALOG_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_RESPONSE_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_REOPEN_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub poll_interval_ms: u64,
    pub sweep_interval_secs: u64,
    pub stale_lock_max_age_secs: u64,
    pub processed_capacity: usize,
    pub dialog_ttl_secs: u64,
    pub response_poll_interval_ms: u64,
    pub reopen_after_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            stale_lock_max_age_secs: DEFAULT_STALE_LOCK_MAX_AGE_SECS,
            processed_capacity: DEFAULT_PROCESSED_CAPACITY,
            dialog_ttl_secs: DEFAULT_DIALOG_TTL_SECS,
            response_poll_interval_ms: DEFAULT_RESPONSE_POLL_INTERVAL_MS,
            reopen_after_secs: DEFAULT_REOPEN_AFTER_SECS,
        }
    }
}

impl LoopConfig {
    /// Loads the config file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(LoopError::io("Failed to read config", err)),
        };

        toml::from_str(&content).map_err(|err| LoopError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_lock_max_age(&self) -> chrono::Duration {
        saturating_seconds(self.stale_lock_max_age_secs)
    }

    pub fn dialog_ttl(&self) -> chrono::Duration {
        saturating_seconds(self.dialog_ttl_secs)
    }

    pub fn response_poll_interval(&self) -> Duration {
        Duration::from_millis(self.response_poll_interval_ms.max(1))
    }

    pub fn reopen_after(&self) -> Duration {
        Duration::from_secs(self.reopen_after_secs)
    }
}

/// Values past chrono's range mean "never expires" and clamp to its maximum.
fn saturating_seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let config = LoopConfig::load(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config, LoopConfig::default());
        assert_eq!(config.processed_capacity, 200);
        assert_eq!(config.stale_lock_max_age_secs, 86_400);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = 250\nprocessed_capacity = 50\n").unwrap();

        let config = LoopConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.processed_capacity, 50);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(config.dialog_ttl_secs, DEFAULT_DIALOG_TTL_SECS);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = \"fast\"").unwrap();

        assert!(matches!(
            LoopConfig::load(&path),
            Err(LoopError::ConfigMalformed { .. })
        ));
    }

    #[test]
    fn test_huge_ages_saturate() {
        let config = LoopConfig {
            stale_lock_max_age_secs: u64::MAX,
            dialog_ttl_secs: 10_000_000_000_000_000,
            ..LoopConfig::default()
        };
        assert_eq!(config.stale_lock_max_age(), chrono::Duration::MAX);
        assert_eq!(config.dialog_ttl(), chrono::Duration::MAX);

    }

    #[test]
    fn test_huge_ttl_keeps_dialog_open() {
        let config = LoopConfig {
            dialog_ttl_secs: u64::MAX,
            ..LoopConfig::default()
        };
        let mut correlator = crate::DialogCorrelator::new(config.dialog_ttl());
        let set_at = chrono::Utc::now();
        correlator.set_pending_at(
            Some(crate::AskRequest::from(&crate::Request::stub("r1"))),
            set_at,
        );
        let much_later = set_at + chrono::Duration::days(365 * 100);
        assert!(correlator.get_pending_at(much_later).is_some());
    }
}
