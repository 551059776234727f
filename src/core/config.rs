//! Project-level configuration for the Calypso Workflow Kernel.
//!
//! Mirrors the teacher's tiered `proofs.toml` lookup: try the project root
//! first, then its parent (for callers that pass a session/store root
//! instead), and fall back to defaults when no file is present — absence of
//! config is never an error.

use crate::core::error::CalypsoError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// `.calypso/config.toml` shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KernelConfig {
    /// Display persona used when building session roots (`§3`).
    #[serde(default = "default_persona")]
    pub persona: String,
    /// Seconds a suspension point may run before the host should treat it as
    /// cancelled (§5). Advisory — the kernel itself never starts a timer.
    #[serde(default = "default_cancellation_timeout_secs")]
    pub cancellation_timeout_secs: u64,
    /// Path (relative to project root) to the workflow manifest to load.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
}

fn default_persona() -> String {
    "operator".to_string()
}

fn default_cancellation_timeout_secs() -> u64 {
    300
}

fn default_manifest_path() -> String {
    ".calypso/workflow.toml".to_string()
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            persona: default_persona(),
            cancellation_timeout_secs: default_cancellation_timeout_secs(),
            manifest_path: default_manifest_path(),
        }
    }
}

/// Load config from `<project_root>/.calypso/config.toml`, then
/// `<project_root's parent>/.calypso/config.toml`, else defaults.
pub fn load_config(project_root: &Path) -> Result<KernelConfig, CalypsoError> {
    let direct = project_root.join(".calypso").join("config.toml");
    if direct.exists() {
        let content = fs::read_to_string(&direct)?;
        return Ok(toml::from_str(&content)?);
    }

    if let Some(parent) = project_root.parent() {
        let parent_path = parent.join(".calypso").join("config.toml");
        if parent_path.exists() {
            let content = fs::read_to_string(&parent_path)?;
            return Ok(toml::from_str(&content)?);
        }
    }

    Ok(KernelConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg.persona, "operator");
        assert_eq!(cfg.cancellation_timeout_secs, 300);
    }

    #[test]
    fn direct_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".calypso")).unwrap();
        fs::write(
            dir.path().join(".calypso/config.toml"),
            "persona = \"pathfinder\"\ncancellation_timeout_secs = 45\n",
        )
        .unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg.persona, "pathfinder");
        assert_eq!(cfg.cancellation_timeout_secs, 45);
    }

    #[test]
    fn parent_config_is_loaded_when_direct_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".calypso")).unwrap();
        fs::write(
            dir.path().join(".calypso/config.toml"),
            "persona = \"archivist\"\n",
        )
        .unwrap();
        let nested = dir.path().join("sessions").join("s1");
        fs::create_dir_all(&nested).unwrap();
        let cfg = load_config(&nested).unwrap();
        assert_eq!(cfg.persona, "archivist");
    }
}
