//! Remote archive backed by a local directory.
//!
//! Versions are the BLAKE3 hex digest of the stored bytes, so an unchanged
//! object keeps its version across processes. Writes go through a temp file
//! and a rename.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::checkpoint::{CHECKPOINT_PATH, Checkpoint, CheckpointLoader};
use crate::error::Result;
use crate::sync::upload::{ArchiveUploader, Expect, UploadError, Versioned};

#[derive(Debug, Clone)]
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an archive path onto the filesystem, refusing anything that
    /// could escape the root.
    fn resolve(&self, path: &str) -> std::result::Result<PathBuf, UploadError> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(UploadError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn read(&self, path: &str) -> std::result::Result<Option<Versioned>, UploadError> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(bytes) => {
                let version = version_of(&bytes);
                Ok(Some(Versioned { bytes, version }))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn version_of(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

impl ArchiveUploader for DirArchive {
    fn get(&self, path: &str) -> std::result::Result<Option<Versioned>, UploadError> {
        self.read(path)
    }

    fn put(
        &self,
        path: &str,
        bytes: &[u8],
        expect: &Expect,
    ) -> std::result::Result<String, UploadError> {
        let full = self.resolve(path)?;
        let current = self.read(path)?;
        let holds = match expect {
            Expect::Any => true,
            Expect::Absent => current.is_none(),
            Expect::Version(version) => current.as_ref().is_some_and(|c| &c.version == version),
        };
        if !holds {
            return Err(UploadError::Conflict {
                path: path.to_string(),
            });
        }

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = full.with_extension("tmp-upload");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &full)?;

        debug!(path, size = bytes.len(), "archived object");
        Ok(version_of(bytes))
    }

    fn delete(&self, path: &str) -> std::result::Result<(), UploadError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => {
                debug!(path, "removed archived object");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl CheckpointLoader for DirArchive {
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        match self.read(CHECKPOINT_PATH)? {
            Some(stored) => Ok(Some(Checkpoint::from_slice(&stored.bytes)?)),
            None => Ok(None),
        }
    }
}
