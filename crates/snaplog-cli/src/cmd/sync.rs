//! `snaplog sync start|finish|abort`, `snaplog publish` and `snaplog pull`.

use crate::cmd::Project;
use crate::output::{OutputMode, pretty_kv, render};
use anyhow::Result;
use serde::Serialize;
use snaplog_core::CheckpointLoader;
use snaplog_core::archive::FileArchiver;
use snaplog_core::sync::SyncToken;
use snaplog_core::sync::publish::publish;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct TokenReport {
    token: SyncToken,
    artifacts: Vec<String>,
}

/// Execute `snaplog sync start`.
///
/// # Errors
///
/// Returns a conflict error while a fresh token is outstanding.
pub fn run_start(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let token = project.engine()?.sync_start()?;
    let report = TokenReport {
        artifacts: token.artifacts()?.iter().map(ToString::to_string).collect(),
        token,
    };

    render(output, &report, |report, w| {
        for artifact in &report.artifacts {
            writeln!(w, "  {artifact}")?;
        }
        writeln!(w)?;
        writeln!(w, "Archive the artifacts above, then run:")?;
        writeln!(w, "  snaplog sync finish '{}'", report.token)
    })
}

/// Execute `snaplog sync finish <token>`.
///
/// # Errors
///
/// Returns precondition or token-mismatch errors from the coordinator.
pub fn run_finish(token: &str, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let report = project.engine()?.sync_finish(token)?;

    render(output, &report, |report, w| {
        if report.already_completed {
            return writeln!(w, "✓ Token already completed; nothing to do.");
        }
        writeln!(
            w,
            "✓ Purged {} events and {} files",
            report.events_purged, report.files_purged
        )
    })
}

#[derive(Debug, Serialize)]
struct AbortReport {
    released: bool,
}

/// Execute `snaplog sync abort <token>`.
///
/// # Errors
///
/// Returns a storage error if the new state cannot be saved.
pub fn run_abort(token: &str, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let released = project.engine()?.sync_abort(&SyncToken::from(token))?;

    render(output, &AbortReport { released }, |report, w| {
        if report.released {
            writeln!(w, "✓ Token released")
        } else {
            writeln!(w, "Token is not outstanding; nothing released.")
        }
    })
}

/// Execute `snaplog publish`.
///
/// # Errors
///
/// Returns the first failure of the cycle; local data is never purged
/// unless the archive write succeeded.
pub fn run_publish(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let engine = project.engine()?;
    let archiver = FileArchiver::new(project.config.archive.max_page_bytes);
    let retry = project.config.sync.retry_policy();

    let report = publish(&engine, &project.archive, &archiver, &retry)?;
    info!(token = %report.token, "publish complete");

    render(output, &report, |report, w| {
        if report.resumed {
            pretty_kv(w, "Resumed", report.token.as_str())?;
        }
        match &report.page {
            Some(page) => pretty_kv(w, "Page", page.archive_path())?,
            None => pretty_kv(w, "Page", "(no pending events)")?,
        }
        if let Some(old) = &report.superseded {
            pretty_kv(w, "Merged", old.archive_path())?;
        }
        pretty_kv(w, "Files", report.files_uploaded.to_string())?;
        pretty_kv(w, "Archived thru", report.last_applied_event_id.to_string())?;
        writeln!(
            w,
            "✓ Published; purged {} events and {} files",
            report.finish.events_purged, report.finish.files_purged
        )
    })
}

#[derive(Debug, Serialize)]
struct PullReport {
    found: bool,
    last_applied_event_id: u64,
    pages: usize,
}

/// Execute `snaplog pull`.
///
/// # Errors
///
/// Returns a stale-checkpoint error if the archive is behind the store.
pub fn run_pull(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let engine = project.engine()?;

    let report = match project.archive.load_checkpoint()? {
        Some(checkpoint) => {
            let view = engine.pull(checkpoint)?;
            PullReport {
                found: true,
                last_applied_event_id: view.last_applied_event_id(),
                pages: view.state.pages.len(),
            }
        }
        None => PullReport {
            found: false,
            last_applied_event_id: engine.view().last_applied_event_id(),
            pages: 0,
        },
    };

    render(output, &report, |report, w| {
        if report.found {
            writeln!(
                w,
                "✓ Snapshot at event {} ({} pages archived)",
                report.last_applied_event_id, report.pages
            )
        } else {
            writeln!(w, "Archive has no snap.json yet.")
        }
    })
}
