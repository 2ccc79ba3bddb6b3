pub mod backup;
pub mod completions;
pub mod event;
pub mod file;
pub mod init;
pub mod pages;
pub mod snapshot;
pub mod status;
pub mod sync;

use anyhow::{Context as _, Result};
use chrono::DateTime;
use snaplog_core::archive::dir::DirArchive;
use snaplog_core::config::{self, ProjectConfig};
use snaplog_core::{Engine, EngineSettings};
use std::path::{Path, PathBuf};

/// An initialized project directory and its archive.
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub archive: DirArchive,
}

impl Project {
    /// Load the project rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `.snaplog/` is missing or its config is invalid.
    pub fn load(root: &Path) -> Result<Self> {
        let dir = config::project_dir(root);
        if !dir.is_dir() {
            anyhow::bail!(
                "{} not found. Run `snaplog init` first.",
                config::PROJECT_DIR
            );
        }
        let config = config::load_project_config(root)?;
        let archive = DirArchive::new(config::resolve_archive_dir(root, &config));
        Ok(Self {
            root: root.to_path_buf(),
            config,
            archive,
        })
    }

    /// Cold-start the engine against the project's archive.
    ///
    /// # Errors
    ///
    /// Returns lock, storage or checkpoint errors.
    pub fn engine(&self) -> Result<Engine> {
        Engine::open_project(
            &self.root,
            &self.archive,
            EngineSettings::from(&self.config.sync),
        )
        .context("Failed to open the event store")
    }
}

/// Format epoch seconds for human output.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
