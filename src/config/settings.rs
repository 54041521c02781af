//! Tool configuration loading
//!
//! An optional TOML file overrides the built-in paths, external command
//! names and validation thresholds. Everything has a sensible default so
//! the tool works without any configuration on a standard system.

use super::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level safegrub configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub commands: Commands,

    #[serde(default)]
    pub limits: Limits,
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    /// The live configuration file
    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,

    /// The generated artifact; discovered when unset
    pub artifact: Option<PathBuf>,

    /// Backup directory; defaults to the config file's directory
    pub backup_dir: Option<PathBuf>,
}

fn default_config_file() -> PathBuf {
    PathBuf::from(paths::GRUB_DEFAULT_PATH)
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            artifact: None,
            backup_dir: None,
        }
    }
}

/// External command names
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Commands {
    /// Generates an artifact from the live configuration (`-o <path>`)
    #[serde(default = "default_generate")]
    pub generate: String,

    /// Syntax-checks a generated artifact
    #[serde(default = "default_check")]
    pub check: String,

    /// Regenerates the live artifact in place
    #[serde(default = "default_update")]
    pub update: String,
}

fn default_generate() -> String {
    "grub-mkconfig".to_string()
}

fn default_check() -> String {
    "grub-script-check".to_string()
}

fn default_update() -> String {
    "update-grub".to_string()
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            generate: default_generate(),
            check: default_check(),
            update: default_update(),
        }
    }
}

/// Validation thresholds and timeouts.
///
/// These are fixed policy constants, not derived values: a generated
/// artifact smaller than `min_artifact_bytes` or shorter than
/// `min_artifact_lines` meaningful lines is rejected outright.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Per-external-command timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Minimum byte size of a generated artifact
    #[serde(default = "default_min_bytes")]
    pub min_artifact_bytes: u64,

    /// Minimum meaningful (non-blank, non-comment) lines in an artifact
    #[serde(default = "default_min_lines")]
    pub min_artifact_lines: usize,

    /// Manual backups retained by prune
    #[serde(default = "default_keep_backups")]
    pub keep_manual_backups: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_bytes() -> u64 {
    100
}

fn default_min_lines() -> usize {
    30
}

fn default_keep_backups() -> usize {
    3
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_timeout_secs(),
            min_artifact_bytes: default_min_bytes(),
            min_artifact_lines: default_min_lines(),
            keep_manual_backups: default_keep_backups(),
        }
    }
}

impl Limits {
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from an explicit path, the user config
    /// directory, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => dirs::config_dir()
                .map(|dir| dir.join("safegrub").join("config.toml"))
                .filter(|p| p.exists()),
        };

        let mut config = match candidate {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("failed to parse config: {}", path.display()))?
            }
            None => Self::default(),
        };

        config.expand_paths();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.paths.config_file = expand(&self.paths.config_file);
        self.paths.artifact = self.paths.artifact.as_deref().map(expand);
        self.paths.backup_dir = self.paths.backup_dir.as_deref().map(expand);
    }

    /// Resolved artifact path: configured, or discovered on this system.
    pub fn artifact_path(&self) -> PathBuf {
        self.paths
            .artifact
            .clone()
            .unwrap_or_else(paths::default_artifact_path)
    }

    /// Resolved backup directory: configured, or the config file's parent.
    pub fn backup_dir(&self) -> PathBuf {
        self.paths.backup_dir.clone().unwrap_or_else(|| {
            self.paths
                .config_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}
