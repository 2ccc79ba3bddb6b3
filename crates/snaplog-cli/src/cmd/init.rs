use crate::output::{OutputMode, pretty_kv, render};
use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use snaplog_core::checkpoint::NoCheckpoint;
use snaplog_core::config::{self, ProjectConfig};
use snaplog_core::engine::STORE_FILE;
use snaplog_core::{Engine, EngineSettings};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.snaplog/config.toml`.
    #[arg(long)]
    pub force: bool,

    /// Archive directory to record in the config (default `.snaplog/archive`).
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct InitReport {
    project_dir: PathBuf,
    store: PathBuf,
    archive_dir: PathBuf,
}

const GITIGNORE: &str = "store.sqlite3*\nlock\noutbox/\n";

/// Execute `snaplog init`. Creates the project skeleton:
///
/// ```text
/// .snaplog/
///   config.toml     (defaults, plus --archive-dir when given)
///   store.sqlite3   (event store, migrated to the latest schema)
///   .gitignore
/// ```
///
/// # Errors
///
/// Returns an error if the project already exists and `--force` is not set,
/// or if any filesystem or store operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let dir = config::project_dir(project_root);
    let config_path = dir.join("config.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use `snaplog init --force` to rewrite the config.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut project = ProjectConfig::default();
    project.archive.dir.clone_from(&args.archive_dir);
    let rendered = toml::to_string_pretty(&project).context("Failed to render config")?;
    std::fs::write(&config_path, rendered)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore = dir.join(".gitignore");
    std::fs::write(&gitignore, GITIGNORE)
        .with_context(|| format!("Failed to write {}", gitignore.display()))?;

    // Creates and migrates the store; the archive is not consulted yet.
    Engine::open_project(
        project_root,
        &NoCheckpoint,
        EngineSettings::from(&project.sync),
    )
    .context("Failed to create the event store")?;

    let archive_dir = config::resolve_archive_dir(project_root, &project);
    std::fs::create_dir_all(&archive_dir)
        .with_context(|| format!("Failed to create archive {}", archive_dir.display()))?;

    let report = InitReport {
        project_dir: dir.clone(),
        store: dir.join(STORE_FILE),
        archive_dir,
    };
    render(output, &report, |report, w| {
        writeln!(w, "✓ Initialized {}", config::PROJECT_DIR)?;
        writeln!(w)?;
        pretty_kv(w, "Store", report.store.display().to_string())?;
        pretty_kv(w, "Archive", report.archive_dir.display().to_string())?;
        writeln!(w)?;
        writeln!(w, "Next steps:")?;
        writeln!(w, "  export SNAPLOG_ACTOR=you@example.com")?;
        writeln!(w, "  snaplog add-event '{{\"post\": {{\"title\": \"Hello\"}}}}'")
    })
}
