use crate::cmd::{Project, format_timestamp};
use crate::output::{OutputMode, render};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use snaplog_core::archive::PageName;
use snaplog_core::sync::publish::read_page;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct PagesArgs {
    /// Decode one archived page and print its events.
    #[arg(long)]
    pub show: Option<String>,
}

#[derive(Debug, Serialize)]
struct PageRow {
    name: PageName,
    path: String,
    first_id: u64,
    last_id: u64,
    events: u64,
}

impl From<PageName> for PageRow {
    fn from(name: PageName) -> Self {
        Self {
            path: name.archive_path(),
            first_id: name.first_id,
            last_id: name.last_id,
            events: name.last_id - name.first_id + 1,
            name,
        }
    }
}

/// Execute `snaplog pages`.
///
/// # Errors
///
/// Returns an error if the engine cannot start, or, with `--show`, if the
/// page is unknown, fails to decode, or does not match its manifest.
pub fn run_pages(args: &PagesArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let engine = project.engine()?;
    let view = engine.view();

    let Some(raw) = &args.show else {
        let rows: Vec<PageRow> = view.state.pages.sorted().into_iter().map(PageRow::from).collect();
        return render(output, &rows, |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No archived pages.");
            }
            for row in rows {
                writeln!(w, "{:<48} ids {}..={}", row.name.to_string(), row.first_id, row.last_id)?;
            }
            Ok(())
        });
    };

    let name: PageName = raw.parse()?;
    if !view.state.pages.contains(&name) {
        anyhow::bail!("page '{name}' is not in the archived page index");
    }
    let batch = read_page(&project.archive, &name)?;

    render(output, &batch.events(), |events, w| {
        for event in *events {
            writeln!(
                w,
                "#{:<6} {}  {}",
                event.id,
                format_timestamp(event.timestamp),
                event.actor
            )?;
        }
        Ok(())
    })
}
