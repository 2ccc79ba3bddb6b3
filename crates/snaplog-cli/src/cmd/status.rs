use crate::cmd::Project;
use crate::output::{OutputMode, pretty_kv, pretty_section, render};
use anyhow::Result;
use serde::Serialize;
use snaplog_core::archive::files::FileIndex;
use snaplog_core::engine::SyncStatus;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    sync: SyncStatus,
    archived_pages: usize,
    archived_files: usize,
    archive_dir: String,
}

/// Execute `snaplog status`.
///
/// # Errors
///
/// Returns an error if the engine cannot start or the file index is
/// unreadable.
pub fn run_status(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let engine = project.engine()?;
    let report = StatusReport {
        sync: engine.sync_status()?,
        archived_pages: engine.view().state.pages.len(),
        archived_files: FileIndex::fetch(&project.archive)?.0.len(),
        archive_dir: project.archive.root().display().to_string(),
    };

    render(output, &report, |report, w| {
        let sync = &report.sync;
        pretty_section(w, "Store")?;
        pretty_kv(w, "Last applied", sync.last_applied_event_id.to_string())?;
        pretty_kv(w, "Archived thru", sync.archived_through.to_string())?;
        pretty_kv(w, "Pending events", sync.pending_events.to_string())?;
        pretty_kv(w, "Pending files", sync.pending_files.to_string())?;
        pretty_kv(w, "Pages", report.archived_pages.to_string())?;
        pretty_kv(w, "Files", report.archived_files.to_string())?;
        pretty_kv(w, "Archive", &report.archive_dir)?;
        writeln!(w)?;

        pretty_section(w, "Sync")?;
        match (&sync.token, sync.issued_at) {
            (Some(token), Some(at)) => {
                let stale = if sync.stale { " (stale)" } else { "" };
                pretty_kv(w, "Issued", format!("{}{stale}", at.to_rfc3339()))?;
                pretty_kv(w, "Token", token.as_str())?;
            }
            _ => pretty_kv(w, "State", "idle")?,
        }
        if let Some(done) = &sync.last_completed {
            pretty_kv(w, "Last completed", done.as_str())?;
        }
        Ok(())
    })
}
