// config.rs — On-disk Warden configuration.
//
// `.warden/config.toml` holds the capability options and, optionally, a
// custom policy file. `for_project()` resolves the standard layout under a
// project root; a missing config file means the restrictive defaults and the
// built-in policy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityPolicy;
use crate::error::PolicyError;
use crate::options::ConfinementOptions;

/// Top-level configuration from `.warden/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Construction options.
    #[serde(default)]
    pub capabilities: ConfinementOptions,

    /// Where the base policy comes from.
    #[serde(default)]
    pub policy: PolicySource,
}

/// Policy source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySource {
    /// Custom policy document. Relative paths resolve against the config
    /// file's directory. `None` uses the built-in default policy.
    pub path: Option<PathBuf>,
}

impl WardenConfig {
    /// Standard config file location for a project.
    pub fn project_path(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(".warden").join("config.toml")
    }

    /// Load the project's config, or defaults if it has none.
    pub fn for_project(project_root: impl AsRef<Path>) -> Result<Self, PolicyError> {
        Self::load_or_default(&Self::project_path(project_root))
    }

    /// Parse a config file. Relative policy paths are anchored to the file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: WardenConfig =
            toml::from_str(&text).map_err(|source| PolicyError::InvalidConfig {
                path: path.to_path_buf(),
                source,
            })?;

        if let (Some(policy_path), Some(dir)) = (config.policy.path.as_mut(), path.parent()) {
            if policy_path.is_relative() {
                *policy_path = dir.join(&*policy_path);
            }
        }
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, PolicyError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// The base policy this configuration names.
    pub fn base_policy(&self) -> Result<CapabilityPolicy, PolicyError> {
        match &self.policy.path {
            Some(path) => CapabilityPolicy::load(path),
            None => CapabilityPolicy::default_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CapabilityMode;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().unwrap();
        let config = WardenConfig::for_project(dir.path()).unwrap();
        assert_eq!(config.capabilities, ConfinementOptions::default());
        assert!(config.policy.path.is_none());
        assert_eq!(
            config.base_policy().unwrap(),
            CapabilityPolicy::default_policy().unwrap()
        );
    }

    #[test]
    fn loads_options_and_relative_policy_path() {
        let dir = tempdir().unwrap();
        let warden_dir = dir.path().join(".warden");
        std::fs::create_dir_all(&warden_dir).unwrap();
        std::fs::write(
            warden_dir.join("config.toml"),
            "[capabilities]\nclock_mode = \"allow\"\nfuture_mode = \"allow\"\n\n[policy]\npath = \"policy.json\"\n",
        )
        .unwrap();
        std::fs::write(
            warden_dir.join("policy.json"),
            r#"{"version": 9, "named": {"Math": true}}"#,
        )
        .unwrap();

        let config = WardenConfig::for_project(dir.path()).unwrap();
        assert_eq!(config.capabilities.clock_mode, CapabilityMode::Allow);
        assert_eq!(config.capabilities.random_mode, CapabilityMode::Tame);
        assert_eq!(config.policy.path, Some(warden_dir.join("policy.json")));

        let policy = config.base_policy().unwrap();
        assert_eq!(policy.version, 9);
        assert!(policy.permits("Math.random"));
    }

    #[test]
    fn malformed_config_is_reported_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capabilities\n").unwrap();
        match WardenConfig::load(&path) {
            Err(PolicyError::InvalidConfig { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }
}
