use crate::cmd::Project;
use crate::output::{OutputMode, render};
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use snaplog_core::backup::OutboxNotifier;
use snaplog_core::config;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Directory receiving backup messages (default `.snaplog/outbox`).
    #[arg(long)]
    pub outbox: Option<PathBuf>,
}

/// Execute `snaplog backup`.
///
/// A failed delivery is reported in the output but does not fail the
/// command; the next run retries it.
///
/// # Errors
///
/// Returns an error if the engine cannot start or the store cannot be read.
pub fn run_backup(args: &BackupArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let engine = project.engine()?;
    let outbox = args
        .outbox
        .clone()
        .unwrap_or_else(|| config::project_dir(project_root).join("outbox"));

    let report = engine.backup(
        &project.config.backup.policy(),
        &OutboxNotifier::new(outbox),
        Utc::now(),
    )?;

    render(output, &report, |report, w| {
        match (report.kind, &report.error) {
            (None, _) => writeln!(w, "No backup due."),
            (Some(kind), Some(error)) => writeln!(w, "✗ {kind} backup not sent: {error}"),
            (Some(kind), None) => {
                writeln!(w, "✓ {kind} backup sent ({} events)", report.events)
            }
        }
    })
}
