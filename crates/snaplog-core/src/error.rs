use std::fmt;

use crate::lock::LockError;
use crate::sync::upload::UploadError;

/// Machine-readable error codes for callers that map failures onto a
/// transport (HTTP status, process exit code, JSON error body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validation,
    NotFound,
    MalformedEvent,
    CorruptPageName,
    CorruptPage,
    Conflict,
    TokenMismatch,
    Precondition,
    StaleCheckpoint,
    StorageFailure,
    LockContention,
    IoFailure,
    EncodingFailure,
    UploadFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "E1001",
            Self::NotFound => "E1002",
            Self::MalformedEvent => "E2001",
            Self::CorruptPageName => "E2002",
            Self::CorruptPage => "E2003",
            Self::Conflict => "E3001",
            Self::TokenMismatch => "E3002",
            Self::Precondition => "E3003",
            Self::StaleCheckpoint => "E3004",
            Self::StorageFailure => "E5001",
            Self::LockContention => "E5002",
            Self::IoFailure => "E5003",
            Self::EncodingFailure => "E5004",
            Self::UploadFailed => "E5005",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Validation => "Invalid input",
            Self::NotFound => "Not found",
            Self::MalformedEvent => "Malformed event payload",
            Self::CorruptPageName => "Corrupt page name",
            Self::CorruptPage => "Corrupt archived page",
            Self::Conflict => "Sync already in flight",
            Self::TokenMismatch => "Sync token mismatch",
            Self::Precondition => "Precondition failed",
            Self::StaleCheckpoint => "Stale checkpoint",
            Self::StorageFailure => "Event store failure",
            Self::LockContention => "Lock contention",
            Self::IoFailure => "I/O failure",
            Self::EncodingFailure => "Encoding failure",
            Self::UploadFailed => "Archive upload failed",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::Validation => Some("Actors must be email addresses and payloads non-empty objects."),
            Self::NotFound | Self::EncodingFailure => None,
            Self::MalformedEvent => {
                Some("Every payload category must map to an object of key/value pairs.")
            }
            Self::CorruptPageName | Self::CorruptPage => {
                Some("Inspect the archive; pages are never repaired automatically.")
            }
            Self::Conflict => Some("Wait for the running sync to finish, or let its token go stale."),
            Self::TokenMismatch => Some("Run `snaplog sync start` again and archive the new token."),
            Self::Precondition => Some("Call `sync start` before `sync finish`."),
            Self::StaleCheckpoint => Some("The archive is behind the local store; publish before pulling."),
            Self::StorageFailure => Some("Check disk space and permissions on .snaplog/store.sqlite3."),
            Self::LockContention => Some("Retry after the other snaplog process releases its lock."),
            Self::IoFailure => Some("Check disk space and write permissions."),
            Self::UploadFailed => Some("Retry `snaplog publish`; local data was not purged."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Every failure the core reports to its immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad actor or payload; nothing was written.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// A payload category maps to something other than an object.
    #[error("malformed event {event_id}: category '{category}' is not an object")]
    MalformedEvent { event_id: u64, category: String },

    #[error("corrupt page name '{0}': expected {{ts}}_{{id}}-{{ts}}_{{id}}")]
    CorruptPageName(String),

    #[error("corrupt page '{name}': {reason}")]
    CorruptPage { name: String, reason: String },

    /// Another sync token is in flight.
    #[error("sync token already issued at {issued_at}")]
    Conflict { issued_at: String },

    #[error("sync token mismatch: expected '{expected}', got '{supplied}'")]
    TokenMismatch { expected: String, supplied: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("checkpoint through event {remote} is older than local baseline {local}")]
    StaleCheckpoint { remote: u64, local: u64 },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("event store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl CoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::MalformedEvent { .. } => ErrorCode::MalformedEvent,
            Self::CorruptPageName(_) => ErrorCode::CorruptPageName,
            Self::CorruptPage { .. } => ErrorCode::CorruptPage,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::TokenMismatch { .. } => ErrorCode::TokenMismatch,
            Self::Precondition(_) => ErrorCode::Precondition,
            Self::StaleCheckpoint { .. } => ErrorCode::StaleCheckpoint,
            Self::Lock(err) => err.code(),
            Self::Upload(_) => ErrorCode::UploadFailed,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Io(_) => ErrorCode::IoFailure,
            Self::Encoding(_) => ErrorCode::EncodingFailure,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    pub(crate) fn not_found(what: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            what,
            key: key.to_string(),
        }
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
