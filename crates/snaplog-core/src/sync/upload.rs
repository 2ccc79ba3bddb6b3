//! Remote archive interface and upload retries.
//!
//! The archive is a flat key/value store of paths (`snap.json`,
//! `events/<page>.json.gz`, `files/<name>`). Every stored object carries an
//! opaque version string; writers pass the version they expect to replace so
//! a concurrent writer turns into [`UploadError::Conflict`] instead of a lost
//! update.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// Archive upload failures.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The stored version differs from the expected one.
    #[error("version conflict at '{path}'")]
    Conflict { path: String },

    /// Temporary failure; the same call may succeed later.
    #[error("transient failure at '{path}': {reason}")]
    Transient { path: String, reason: String },

    #[error("invalid archive path '{0}'")]
    InvalidPath(String),

    #[error("archive i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Whether retrying the operation can help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transient { .. })
    }
}

/// Stored bytes plus the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub bytes: Vec<u8>,
    pub version: String,
}

/// Precondition for [`ArchiveUploader::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Overwrite unconditionally.
    Any,
    /// The path must not exist yet.
    Absent,
    /// The path must currently hold this version.
    Version(String),
}

impl Expect {
    /// Expectation that replaces exactly what `current` read.
    #[must_use]
    pub fn replacing(current: Option<&Versioned>) -> Self {
        current.map_or(Self::Absent, |v| Self::Version(v.version.clone()))
    }
}

/// Write side of the remote archive.
pub trait ArchiveUploader {
    /// Read `path`, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be reached.
    fn get(&self, path: &str) -> std::result::Result<Option<Versioned>, UploadError>;

    /// Store `bytes` at `path` if `expect` holds; returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Conflict`] when `expect` does not hold.
    fn put(&self, path: &str, bytes: &[u8], expect: &Expect) -> std::result::Result<String, UploadError>;

    /// Remove `path`. Removing an absent path succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be reached.
    fn delete(&self, path: &str) -> std::result::Result<(), UploadError>;
}

/// Bounded exponential backoff for archive calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first. Zero behaves like one.
    pub attempts: u32,
    /// Delay before the second try; doubles after each failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and local archives.
    #[must_use]
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. `op` receives the 1-based attempt number.
    ///
    /// Only [`CoreError::Upload`] errors with a retryable cause are retried.
    ///
    /// # Errors
    ///
    /// Returns the last error from `op`.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let max_delay = Duration::from_secs(10);
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(what, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(CoreError::Upload(err)) if err.is_retryable() && attempt < attempts => {
                    warn!(what, attempt, error = %err, ?delay, "archive call failed, retrying");
                }
                Err(err) => return Err(err),
            }

            if !delay.is_zero() {
                thread::sleep(delay);
            }
            delay = (delay * 2).min(max_delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::cell::Cell;

    fn conflict() -> CoreError {
        CoreError::Upload(UploadError::Conflict {
            path: "snap.json".into(),
        })
    }

    #[test]
    fn retries_until_success() {
        let calls = Cell::new(0);
        let value = RetryPolicy::immediate(3)
            .run("put", |attempt| {
                calls.set(attempt);
                if attempt < 3 { Err(conflict()) } else { Ok(attempt) }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_attempts() {
        let calls = Cell::new(0);
        let err = RetryPolicy::immediate(2)
            .run("put", |_| -> Result<()> {
                calls.set(calls.get() + 1);
                Err(conflict())
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UploadFailed);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn non_retryable_errors_fail_fast() {
        let calls = Cell::new(0);
        let err = RetryPolicy::immediate(5)
            .run("put", |_| -> Result<()> {
                calls.set(calls.get() + 1);
                Err(CoreError::Upload(UploadError::InvalidPath("../x".into())))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Upload(UploadError::InvalidPath(_))));
        assert_eq!(calls.get(), 1);

        calls.set(0);
        let _ = RetryPolicy::immediate(5).run("fold", |_| -> Result<()> {
            calls.set(calls.get() + 1);
            Err(CoreError::Precondition("no".into()))
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let calls = Cell::new(0);
        let _ = RetryPolicy::immediate(0).run("put", |_| -> Result<()> {
            calls.set(calls.get() + 1);
            Err(conflict())
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn expect_replacing_tracks_current_version() {
        assert_eq!(Expect::replacing(None), Expect::Absent);
        let current = Versioned {
            bytes: Vec::new(),
            version: "v1".into(),
        };
        assert_eq!(Expect::replacing(Some(&current)), Expect::Version("v1".into()));
    }
}
