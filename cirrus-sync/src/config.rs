//! Sync agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::scope::SyncRange;

/// What to do with the rest of a pass when a branch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPolicy {
    /// Skip the failed branch's subtree and continue with its siblings.
    #[default]
    SkipSubtree,
    /// Stop walking after the first failed branch.
    AbortPass,
}

/// Runtime configuration of the sync daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub provider_id: String,
    pub provider_name: String,
    /// JSON inventory snapshot served as the provider.
    pub inventory: PathBuf,
    /// Directory of the SQLite inventory; `None` keeps it in memory.
    pub data_dir: Option<PathBuf>,
    /// Directory of the persistent audit log; `None` only traces.
    pub log_dir: Option<PathBuf>,
    /// Seconds between passes; 0 runs a single pass.
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default)]
    pub range: SyncRange,
    #[serde(default)]
    pub policy: BranchPolicy,
}

impl SyncConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider_id.trim().is_empty() {
            bail!("provider id must not be empty");
        }
        if self.provider_name.trim().is_empty() {
            bail!("provider name must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig {
            provider_id: "p-1".to_string(),
            provider_name: "acme".to_string(),
            inventory: PathBuf::from("/tmp/inventory.json"),
            data_dir: None,
            log_dir: None,
            interval_secs: 0,
            range: SyncRange::full(),
            policy: BranchPolicy::default(),
        }
    }

    #[test]
    fn single_pass_has_no_interval() {
        assert!(config().interval().is_none());
        let periodic = SyncConfig {
            interval_secs: 300,
            ..config()
        };
        assert_eq!(periodic.interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn validate_requires_provider_identity() {
        assert!(config().validate().is_ok());
        let probe_only = SyncConfig {
            range: SyncRange::default(),
            ..config()
        };
        assert!(probe_only.validate().is_ok());
        let nameless = SyncConfig {
            provider_id: " ".to_string(),
            ..config()
        };
        assert!(nameless.validate().is_err());
    }

    #[test]
    fn policy_defaults_to_skip() {
        let parsed: SyncConfig = serde_json::from_value(serde_json::json!({
            "provider_id": "p-1",
            "provider_name": "acme",
            "inventory": "/tmp/x.json",
            "data_dir": null,
            "log_dir": null
        }))
        .unwrap();
        assert_eq!(parsed.policy, BranchPolicy::SkipSubtree);
        assert!(!parsed.range.needs_sync_info());
    }
}
