//! Two-phase sync between the local store and the remote archive.
//!
//! 1. `start` enumerates the pending artifacts and issues a [`SyncToken`]
//!    naming them.
//! 2. The caller persists those artifacts externally (see [`publish`]).
//! 3. `finish` with the same token purges them locally.
//!
//! Nothing is purged without a verbatim token match. A finish that fails
//! after the match leaves the token issued so it can simply be retried; a
//! replay of the last completed token succeeds without doing anything.

pub mod publish;
pub mod upload;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::PageName;
use crate::checkpoint::CHECKPOINT_PATH;
use crate::error::{CoreError, Result};

/// Archive directory for uploaded files.
pub const FILES_DIR: &str = "files";

/// Default age after which an unfinished token may be abandoned.
pub const DEFAULT_STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Artifacts and tokens
// ---------------------------------------------------------------------------

/// One item named by a sync token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// A pending uploaded file, `files/<name>`.
    File(String),
    /// The hot page of pending events, `events/<page>.json.gz`.
    EventPage(PageName),
    /// Trailing `snap.json` sentinel.
    Snapshot,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(name) => write!(f, "{FILES_DIR}/{name}"),
            Self::EventPage(page) => f.write_str(&page.archive_path()),
            Self::Snapshot => f.write_str(CHECKPOINT_PATH),
        }
    }
}

impl FromStr for Artifact {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s == CHECKPOINT_PATH {
            return Ok(Self::Snapshot);
        }
        if let Some(name) = s.strip_prefix(FILES_DIR).and_then(|r| r.strip_prefix('/')) {
            crate::event::validate::validate_file_name(name)?;
            return Ok(Self::File(name.to_string()));
        }
        PageName::from_archive_path(s).map(Self::EventPage)
    }
}

/// Opaque confirmation token, compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(String);

impl SyncToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the artifact names carried by this token.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is not a recognizable artifact.
    pub fn artifacts(&self) -> Result<Vec<Artifact>> {
        self.0.split_whitespace().map(str::parse).collect()
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SyncToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SyncToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Everything a sync cycle has to archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingArtifacts {
    /// Pending file names, newest first.
    pub files: Vec<String>,
    /// Page spanning every pending event, if there are any.
    pub hot_page: Option<PageName>,
}

impl PendingArtifacts {
    /// Artifacts in token order: files, hot page, sentinel.
    #[must_use]
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.files
            .iter()
            .cloned()
            .map(Artifact::File)
            .chain(self.hot_page.map(Artifact::EventPage))
            .chain(std::iter::once(Artifact::Snapshot))
            .collect()
    }

    #[must_use]
    pub fn token(&self) -> SyncToken {
        let names: Vec<String> = self.artifacts().iter().map(ToString::to_string).collect();
        SyncToken(names.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    TokenIssued {
        token: SyncToken,
        issued_at: DateTime<Utc>,
    },
}

/// What a matched `finish` must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishPlan {
    /// The token was already completed; do nothing.
    AlreadyCompleted,
    /// Purge these artifacts, then call [`SyncCoordinator::complete`].
    Purge(Vec<Artifact>),
}

/// Coordinator state as stored in `store_meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSync {
    #[serde(default)]
    pub issued: Option<IssuedToken>,
    #[serde(default)]
    pub last_completed: Option<SyncToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: SyncToken,
    pub issued_at: DateTime<Utc>,
}

/// `Idle → TokenIssued → Idle` state machine.
///
/// The coordinator only decides; the engine performs purges and persistence
/// and reports back through [`Self::complete`] or [`Self::abandon`].
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    state: SyncState,
    last_completed: Option<SyncToken>,
    stale_after: Duration,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(stale_after: std::time::Duration) -> Self {
        Self::restore(PersistedSync::default(), stale_after)
    }

    /// Rebuild a coordinator from persisted state.
    #[must_use]
    pub fn restore(persisted: PersistedSync, stale_after: std::time::Duration) -> Self {
        let state = match persisted.issued {
            Some(IssuedToken { token, issued_at }) => SyncState::TokenIssued { token, issued_at },
            None => SyncState::Idle,
        };
        Self {
            state,
            last_completed: persisted.last_completed,
            stale_after: Duration::from_std(stale_after).unwrap_or_else(|_| Duration::weeks(52 * 100)),
        }
    }

    #[must_use]
    pub fn persisted(&self) -> PersistedSync {
        PersistedSync {
            issued: match &self.state {
                SyncState::Idle => None,
                SyncState::TokenIssued { token, issued_at } => Some(IssuedToken {
                    token: token.clone(),
                    issued_at: *issued_at,
                }),
            },
            last_completed: self.last_completed.clone(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    #[must_use]
    pub const fn last_completed(&self) -> Option<&SyncToken> {
        self.last_completed.as_ref()
    }

    /// Whether the issued token (if any) is older than the stale window.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match &self.state {
            SyncState::Idle => false,
            SyncState::TokenIssued { issued_at, .. } => now - *issued_at > self.stale_after,
        }
    }

    /// Issue a token for `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] while a fresh token is outstanding.
    pub fn start(&mut self, pending: &PendingArtifacts, now: DateTime<Utc>) -> Result<SyncToken> {
        if let SyncState::TokenIssued { token, issued_at } = &self.state {
            if !self.is_stale(now) {
                return Err(CoreError::Conflict {
                    issued_at: issued_at.to_rfc3339(),
                });
            }
            warn!(
                token = %token,
                issued_at = %issued_at.to_rfc3339(),
                "abandoning stale sync token"
            );
        }

        let token = pending.token();
        info!(token = %token, "sync token issued");
        self.state = SyncState::TokenIssued {
            token: token.clone(),
            issued_at: now,
        };
        Ok(token)
    }

    /// Decide what `finish(supplied)` has to do, without changing state.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Precondition`] when idle and `supplied` is not the
    ///   last completed token
    /// - [`CoreError::TokenMismatch`] when `supplied` differs from the issued
    ///   token; the caller must then [`abandon`](Self::abandon) it
    pub fn plan_finish(&self, supplied: &str) -> Result<FinishPlan> {
        let replay = self
            .last_completed
            .as_ref()
            .is_some_and(|done| done.as_str() == supplied);

        match &self.state {
            SyncState::TokenIssued { token, .. } if token.as_str() == supplied => {
                Ok(FinishPlan::Purge(token.artifacts()?))
            }
            _ if replay => Ok(FinishPlan::AlreadyCompleted),
            SyncState::Idle => Err(CoreError::Precondition(
                "no sync token is outstanding".into(),
            )),
            SyncState::TokenIssued { token, .. } => Err(CoreError::TokenMismatch {
                expected: token.to_string(),
                supplied: supplied.to_string(),
            }),
        }
    }

    /// Drop the issued token without purging. Returns it, if any.
    pub fn abandon(&mut self) -> Option<SyncToken> {
        match std::mem::replace(&mut self.state, SyncState::Idle) {
            SyncState::TokenIssued { token, .. } => {
                warn!(token = %token, "sync token invalidated");
                Some(token)
            }
            SyncState::Idle => None,
        }
    }

    /// Mark the issued token as completed after its purge committed.
    pub fn complete(&mut self) {
        if let SyncState::TokenIssued { token, .. } =
            std::mem::replace(&mut self.state, SyncState::Idle)
        {
            info!(token = %token, "sync completed");
            self.last_completed = Some(token);
        }
    }

    /// State after [`Self::complete`], for persisting before completing.
    #[must_use]
    pub fn persisted_after_complete(&self) -> PersistedSync {
        let mut next = self.clone();
        next.state = SyncState::Idle;
        if let SyncState::TokenIssued { token, .. } = &self.state {
            next.last_completed = Some(token.clone());
        }
        next.persisted()
    }
}
