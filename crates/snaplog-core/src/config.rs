use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::{BackupPolicy, Threshold};
use crate::sync::upload::RetryPolicy;

/// Name of the per-project state directory.
pub const PROJECT_DIR: &str = ".snaplog";

/// Environment override for the archive location.
pub const ARCHIVE_DIR_ENV: &str = "SNAPLOG_ARCHIVE_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive directory. Relative paths resolve against the project root.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Pages at or above this serialized size are never merged into.
    #[serde(default = "default_max_page_bytes")]
    pub max_page_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_page_bytes: default_max_page_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// An issued token older than this may be abandoned by a fresh `start`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            upload_attempts: default_upload_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.upload_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_full_days")]
    pub full_days: u32,
    #[serde(default = "default_full_events")]
    pub full_events: u64,
    #[serde(default = "default_partial_days")]
    pub partial_days: u32,
    #[serde(default = "default_partial_events")]
    pub partial_events: u64,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            full_days: default_full_days(),
            full_events: default_full_events(),
            partial_days: default_partial_days(),
            partial_events: default_partial_events(),
            recipients: Vec::new(),
        }
    }
}

impl BackupConfig {
    #[must_use]
    pub fn policy(&self) -> BackupPolicy {
        BackupPolicy {
            full: Threshold {
                interval: chrono::Duration::days(i64::from(self.full_days)),
                events: self.full_events,
            },
            partial: Threshold {
                interval: chrono::Duration::days(i64::from(self.partial_days)),
                events: self.partial_events,
            },
            recipients: self
                .recipients
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }
}

/// Path of the project state directory under `project_root`.
#[must_use]
pub fn project_dir(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR)
}

/// Load `.snaplog/config.toml`, falling back to defaults when it is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_dir(project_root).join("config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve the archive directory: env override, then config, then
/// `.snaplog/archive`.
#[must_use]
pub fn resolve_archive_dir(project_root: &Path, config: &ProjectConfig) -> PathBuf {
    let configured = env::var_os(ARCHIVE_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| config.archive.dir.clone());

    match configured {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => project_root.join(dir),
        None => project_dir(project_root).join("archive"),
    }
}

const fn default_max_page_bytes() -> u64 {
    10_000_000
}

const fn default_stale_after_secs() -> u64 {
    15 * 60
}

const fn default_upload_attempts() -> u32 {
    3
}

const fn default_backoff_base_ms() -> u64 {
    200
}

const fn default_lock_timeout_ms() -> u64 {
    2_000
}

const fn default_full_days() -> u32 {
    7
}

const fn default_full_events() -> u64 {
    1000
}

const fn default_partial_days() -> u32 {
    1
}

const fn default_partial_events() -> u64 {
    100
}
