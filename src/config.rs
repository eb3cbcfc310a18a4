//! Configuration for sandbox-shell.
//!
//! Loaded from `config.toml` in the platform config directory (or an explicit
//! path), then overlaid with `DAYTONA_*` environment variables. A missing file
//! is not an error: every field has a default.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default Daytona API root.
pub const DEFAULT_API_URL: &str = "https://app.daytona.io/api";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Which [`crate::sandbox::SandboxClient`] implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Daytona,
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub provider: Provider,
    /// Daytona API root, without a trailing slash.
    pub api_url: String,
    pub api_key: Option<String>,
    /// Sandbox that sessions are created in.
    pub sandbox_id: Option<String>,
    /// Shell binary for the local provider. Defaults to `bash`, then `sh`.
    pub shell: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            sandbox_id: None,
            shell: None,
        }
    }
}

impl Config {
    /// Load from `path` (with `~` expanded) or the default location, then
    /// apply environment overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => Some(PathBuf::from(shellexpand::tilde(p).into_owned())),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            Some(ref p) => {
                tracing::debug!("No config file at {}, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay values from `DAYTONA_API_KEY`, `DAYTONA_API_URL` and
    /// `DAYTONA_SANDBOX_ID`. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("DAYTONA_API_KEY") {
            self.sandbox.api_key = Some(key);
        }
        if let Some(url) = get("DAYTONA_API_URL") {
            self.sandbox.api_url = url;
        }
        if let Some(id) = get("DAYTONA_SANDBOX_ID") {
            self.sandbox.sandbox_id = Some(id);
        }
    }
}

/// `<config dir>/sandbox-shell/config.toml`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sandbox-shell")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_daytona() {
        let config = Config::default();
        assert_eq!(config.sandbox.provider, Provider::Daytona);
        assert_eq!(config.sandbox.api_url, DEFAULT_API_URL);
        assert!(config.sandbox.api_key.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sandbox]\nprovider = \"local\"\nshell = \"/bin/sh\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sandbox.provider, Provider::Local);
        assert_eq!(config.sandbox.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(config.sandbox.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sandbox]\nprovider = \"kubernetes\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn missing_explicit_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.sandbox.provider, Provider::Daytona);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = Config::default();
        config.sandbox.api_key = Some("from-file".into());

        let env: HashMap<&str, &str> = [
            ("DAYTONA_API_KEY", "from-env"),
            ("DAYTONA_SANDBOX_ID", "sb-42"),
            ("DAYTONA_API_URL", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.sandbox.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.sandbox.sandbox_id.as_deref(), Some("sb-42"));
        assert_eq!(config.sandbox.api_url, DEFAULT_API_URL);
    }
}
