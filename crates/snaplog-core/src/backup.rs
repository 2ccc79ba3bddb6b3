//! Scheduled backups mailed out through a [`Notifier`].
//!
//! A full backup carries the current checkpoint plus every pending event; a
//! partial one carries the events appended since the previous backup. Both
//! are gzip-compressed JSON attachments.
//!
//! Backups are best effort: a notifier failure is reported and logged, and
//! the markers stay where they were so the next run tries again.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::codec::gzip;
use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::event::Event;

/// When a backup of one kind becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    pub interval: Duration,
    /// Events appended since the last backup of this kind.
    pub events: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPolicy {
    pub full: Threshold,
    pub partial: Threshold,
    pub recipients: Vec<String>,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            full: Threshold {
                interval: Duration::days(7),
                events: 1000,
            },
            partial: Threshold {
                interval: Duration::days(1),
                events: 100,
            },
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Partial,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Partial => f.write_str("partial"),
        }
    }
}

/// Point at which a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub at: DateTime<Utc>,
    /// Id high-water mark covered by the backup.
    pub high_water: u64,
}

/// Last successful backups, stored in `store_meta`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMarkers {
    #[serde(default)]
    pub last_full: Option<Marker>,
    #[serde(default)]
    pub last_partial: Option<Marker>,
}

impl BackupMarkers {
    /// Most recent backup of either kind.
    #[must_use]
    pub fn last_any(&self) -> Option<Marker> {
        match (self.last_full, self.last_partial) {
            (Some(full), Some(partial)) => Some(if partial.at > full.at { partial } else { full }),
            (full, partial) => full.or(partial),
        }
    }

    /// Markers after a successful backup of `kind`.
    #[must_use]
    pub fn advanced(mut self, kind: BackupKind, marker: Marker) -> Self {
        match kind {
            BackupKind::Full => self.last_full = Some(marker),
            BackupKind::Partial => self.last_partial = Some(marker),
        }
        self
    }
}

/// Which backup, if any, is due at `now` with ids assigned up to
/// `high_water`.
///
/// Full wins over partial. A partial backup is skipped when nothing was
/// appended since the last backup.
#[must_use]
pub fn decide(
    policy: &BackupPolicy,
    markers: &BackupMarkers,
    now: DateTime<Utc>,
    high_water: u64,
) -> Option<BackupKind> {
    let due = |threshold: &Threshold, since: Marker| {
        now - since.at >= threshold.interval
            || high_water.saturating_sub(since.high_water) >= threshold.events
    };

    let Some(full) = markers.last_full else {
        return Some(BackupKind::Full);
    };
    if due(&policy.full, full) {
        return Some(BackupKind::Full);
    }

    let since = markers.last_any().unwrap_or(full);
    (high_water > since.high_water && due(&policy.partial, since)).then_some(BackupKind::Partial)
}

/// Attachment of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Outgoing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

/// Delivery channel for backups.
pub trait Notifier {
    /// Deliver `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed. Callers treat it as non-fatal.
    fn send(&self, message: &Message) -> anyhow::Result<()>;
}

/// Content of a backup attachment.
#[derive(Debug, Serialize)]
struct BackupBody<'a> {
    kind: BackupKind,
    taken_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<&'a Checkpoint>,
    events: &'a [Event],
}

/// Build the backup message for `kind`.
///
/// `checkpoint` is attached for full backups only.
///
/// # Errors
///
/// Returns an encoding error if the attachment cannot be serialized.
pub fn build_message(
    kind: BackupKind,
    policy: &BackupPolicy,
    checkpoint: &Checkpoint,
    events: &[Event],
    now: DateTime<Utc>,
) -> Result<Message> {
    let body = BackupBody {
        kind,
        taken_at: now,
        checkpoint: (kind == BackupKind::Full).then_some(checkpoint),
        events,
    };
    let stamp = now.format("%Y%m%dT%H%M%SZ");
    Ok(Message {
        to: policy.recipients.clone(),
        subject: format!("{kind} backup"),
        body: format!(
            "{kind} backup at {} covering {} events",
            now.to_rfc3339(),
            events.len()
        ),
        attachment: Some(Attachment {
            filename: format!("backup_{kind}_{stamp}.json.gz"),
            bytes: gzip(&serde_json::to_vec(&body)?)?,
        }),
    })
}

/// Outcome of [`crate::engine::Engine::backup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    /// Backup that was due, `None` if nothing was due.
    pub kind: Option<BackupKind>,
    pub events: usize,
    pub sent: bool,
    /// Notifier failure, if any.
    pub error: Option<String>,
}

impl BackupReport {
    #[must_use]
    pub const fn nothing_due() -> Self {
        Self {
            kind: None,
            events: 0,
            sent: false,
            error: None,
        }
    }

    /// Log the outcome.
    pub fn log(&self) {
        match (&self.kind, &self.error) {
            (None, _) => info!("no backup due"),
            (Some(kind), None) => info!(%kind, events = self.events, "backup sent"),
            (Some(kind), Some(error)) => warn!(%kind, error = %error, "backup failed"),
        }
    }
}

/// [`Notifier`] that drops each message into a directory.
///
/// Writes `<stamp>.json` (addressing and body) and the attachment next to it.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
}

#[derive(Serialize)]
struct OutboxEntry<'a> {
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
    attachment: Option<&'a str>,
}

impl OutboxNotifier {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Notifier for OutboxNotifier {
    fn send(&self, message: &Message) -> anyhow::Result<()> {
        use anyhow::Context;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create outbox {}", self.dir.display()))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        if let Some(attachment) = &message.attachment {
            let path = self.dir.join(&attachment.filename);
            fs::write(&path, &attachment.bytes)
                .with_context(|| format!("write attachment {}", path.display()))?;
        }

        let entry = OutboxEntry {
            to: &message.to,
            subject: &message.subject,
            body: &message.body,
            attachment: message.attachment.as_ref().map(|a| a.filename.as_str()),
        };
        let path = self.dir.join(format!("{stamp}.json"));
        fs::write(&path, serde_json::to_vec_pretty(&entry)?)
            .with_context(|| format!("write message {}", path.display()))?;
        Ok(())
    }
}
