use crate::cmd::Project;
use crate::output::{OutputMode, pretty_section, render};
use anyhow::Result;
use clap::Args;
use serde_json::{Value, json};
use snaplog_core::Snapshot;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Only print this category.
    #[arg(long)]
    pub category: Option<String>,

    /// Print the number of keys per category instead of the values.
    #[arg(long, conflicts_with = "category")]
    pub summary: bool,
}

fn category_sizes(snap: &Snapshot) -> Value {
    snap.categories()
        .map(|(name, entries)| (name.to_string(), json!(entries.len())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// Execute `snaplog snapshot`.
///
/// # Errors
///
/// Returns an error if the engine cannot start or the category is unknown.
pub fn run_snapshot(args: &SnapshotArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let engine = project.engine()?;

    let value = if args.summary {
        engine.derived_snap("category_sizes", category_sizes).as_ref().clone()
    } else {
        let view = engine.view();
        match &args.category {
            Some(name) => {
                let entries = view
                    .snap()
                    .category(name)
                    .ok_or_else(|| anyhow::anyhow!("category '{name}' is not in the snapshot"))?;
                serde_json::to_value(entries)?
            }
            None => view.snap().to_value(),
        }
    };

    render(output, &value, |value, w| {
        let Some(map) = value.as_object() else {
            return writeln!(w, "{value}");
        };
        if map.is_empty() {
            return writeln!(w, "Snapshot is empty.");
        }
        for (name, entry) in map {
            match entry.as_object() {
                Some(entries) => {
                    pretty_section(w, name)?;
                    for (key, v) in entries {
                        writeln!(w, "  {key} = {v}")?;
                    }
                    writeln!(w)?;
                }
                None => writeln!(w, "{name} = {entry}")?,
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_count_keys_per_category() {
        let snap: Snapshot =
            serde_json::from_value(json!({"post": {"a": 1, "b": 2}, "user": {"name": "X"}}))
                .unwrap();
        assert_eq!(category_sizes(&snap), json!({"post": 2, "user": 1}));
    }
}
