use crate::actor;
use crate::cmd::{Project, format_timestamp};
use crate::output::{OutputMode, render};
use anyhow::{Context as _, Result};
use clap::Args;
use snaplog_core::archive::files::FileIndex;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct AddFileArgs {
    /// File to stage.
    pub path: PathBuf,

    /// Name in the archive (default: the file name of `path`).
    #[arg(long)]
    pub name: Option<String>,
}

/// Execute `snaplog add-file`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the name is unusable or
/// already pending, or no actor is configured.
pub fn run_add_file(
    args: &AddFileArgs,
    actor_flag: Option<&str>,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let actor = actor::require_actor(actor_flag)?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => args
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a name from {}", args.path.display()))?,
    };
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    let project = Project::load(project_root)?;
    let file = project.engine()?.add_file(&name, &actor, &bytes)?;

    render(output, &file, |file, w| {
        writeln!(w, "✓ Staged {} ({} bytes)", file.name, file.size)
    })
}

/// Execute `snaplog files`: list the archived file index.
///
/// # Errors
///
/// Returns an error if the project is missing or `files.json` is malformed.
pub fn run_files(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let (index, _) = FileIndex::fetch(&project.archive)?;

    render(output, &index.entries(), |entries, w| {
        if entries.is_empty() {
            return writeln!(w, "No archived files.");
        }
        for entry in *entries {
            writeln!(
                w,
                "{:<32} {:>10}  {}  {}",
                entry.name,
                entry.size,
                format_timestamp(entry.added_at),
                &entry.digest[..entry.digest.len().min(12)]
            )?;
        }
        Ok(())
    })
}
