//! Archived checkpoint (`snap.json`): the root of truth for a cold start.

use serde::{Deserialize, Serialize};

use crate::archive::PageIndex;
use crate::error::{CoreError, Result};
use crate::snap::Snapshot;

/// Archive path of the checkpoint.
pub const CHECKPOINT_PATH: &str = "snap.json";

/// Snapshot of everything archived so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest event id folded into `snap`.
    pub last_applied_event_id: u64,
    pub snap: Snapshot,
    /// Pages holding the events folded into `snap`.
    #[serde(default)]
    pub pages: PageIndex,
}

impl Checkpoint {
    /// Parse and validate `snap.json` bytes.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for bad JSON, or a page error when the page
    /// index is inconsistent with `last_applied_event_id`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let checkpoint: Self = serde_json::from_slice(bytes)?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Serialize as pretty JSON. Equal checkpoints give identical bytes.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Pages must not overlap and must not reach past the applied id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptPage`] describing the inconsistency.
    pub fn validate(&self) -> Result<()> {
        self.pages.validate()?;
        match self.pages.latest() {
            Some(latest) if latest.last_id > self.last_applied_event_id => {
                Err(CoreError::CorruptPage {
                    name: latest.to_string(),
                    reason: format!(
                        "reaches past checkpoint event {}",
                        self.last_applied_event_id
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Source of the archived checkpoint, consulted once at startup.
pub trait CheckpointLoader {
    /// Fetch the latest checkpoint, `None` when nothing was archived yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint exists but cannot be read.
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>>;
}

/// Loader for a store that has never been archived.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

impl CheckpointLoader for NoCheckpoint {
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(None)
    }
}

impl CheckpointLoader for Checkpoint {
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(Some(self.clone()))
    }
}
