//! Shared output layer for human/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`]. JSON output is one
//! pretty-printed document on stdout; errors go to stderr in the same mode.

use serde::Serialize;
use snaplog_core::CoreError;
use std::io::{self, Write};

/// Shared width for human separators.
pub const RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<16} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    /// Returns `true` if JSON output was requested.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable `E####` code when the failure came from the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }

    /// Build from a command failure, surfacing the core error code and hint
    /// when one is in the chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let core = err.chain().find_map(|cause| cause.downcast_ref::<CoreError>());
        match core {
            Some(core) => {
                let mut error = Self::from(core);
                error.message = format!("{err:#}");
                error
            }
            None => Self::new(format!("{err:#}")),
        }
    }
}

impl From<&CoreError> for CliError {
    fn from(err: &CoreError) -> Self {
        Self {
            message: err.to_string(),
            suggestion: err.hint().map(str::to_string),
            error_code: Some(err.code().code().to_string()),
        }
    }
}

/// Render a serializable value to stdout in the requested format.
///
/// In JSON mode the value is serialized with `serde_json`; otherwise
/// `human_fn` writes the text form.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Human => human_fn(value, &mut out)?,
    }
    Ok(())
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    write_error(mode, error, &mut out)
}

fn write_error(mode: OutputMode, error: &CliError, out: &mut dyn Write) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut *out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Human => {
            match &error.error_code {
                Some(code) => writeln!(out, "error: {code}: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(suggestion) = &error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}
