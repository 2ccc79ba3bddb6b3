//! `snaplog add-event`, `snaplog events` and `snaplog event`.

use crate::actor;
use crate::cmd::{Project, format_timestamp};
use crate::output::{OutputMode, render};
use anyhow::{Context as _, Result};
use clap::Args;
use snaplog_core::Event;
use snaplog_core::event::validate::payload_from_value;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Args, Debug)]
pub struct AddEventArgs {
    /// Payload JSON object, or `-` to read it from stdin.
    pub payload: String,
}

#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Only list events with an id greater than this.
    #[arg(long)]
    pub since: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ShowEventArgs {
    pub id: u64,
}

fn read_payload(raw: &str) -> Result<serde_json::Value> {
    let text = if raw == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        raw.to_string()
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

fn write_event(event: &Event, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "#{:<6} {}  {}",
        event.id,
        format_timestamp(event.timestamp),
        event.actor
    )?;
    for (category, key, value) in event.triples() {
        writeln!(w, "        {category}.{key} = {value}")?;
    }
    Ok(())
}

/// Execute `snaplog add-event`.
///
/// # Errors
///
/// Returns an error if no actor is configured, the payload is not a
/// non-empty JSON object, or the append fails.
pub fn run_add_event(
    args: &AddEventArgs,
    actor_flag: Option<&str>,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let actor = actor::require_actor(actor_flag)?;
    let payload = payload_from_value(read_payload(&args.payload)?)?;

    let project = Project::load(project_root)?;
    let engine = project.engine()?;
    let event = engine.add_event(&actor, payload)?;

    render(output, &event, |event, w| {
        writeln!(w, "✓ Appended event #{}", event.id)
    })
}

/// Execute `snaplog events`.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn run_events(args: &EventsArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let events = project.engine()?.events_since(args.since)?;

    render(output, &events, |events, w| {
        if events.is_empty() {
            return writeln!(w, "No pending events.");
        }
        for event in events {
            write_event(event, w)?;
        }
        Ok(())
    })
}

/// Execute `snaplog event <id>`.
///
/// # Errors
///
/// Returns an error if the event is unknown or already archived.
pub fn run_show_event(args: &ShowEventArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::load(project_root)?;
    let event = project.engine()?.event_by_id(args.id)?;
    render(output, &event, |event, w| write_event(event, w))
}
