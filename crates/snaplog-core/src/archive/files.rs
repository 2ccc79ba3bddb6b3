//! Archived file index (`files.json`).
//!
//! Uploaded files live at `files/<name>`. The index lists them with their
//! metadata so a reader that never saw the pending files can still
//! enumerate what the archive holds. It is updated in the same attempt as
//! `snap.json` and guarded by the version it was read at.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::PendingFile;
use crate::sync::upload::{ArchiveUploader, Versioned};

/// Archive path of the file index.
pub const FILE_INDEX_PATH: &str = "files.json";

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// BLAKE3 hex digest of the file bytes.
    pub digest: String,
    pub size: u64,
    /// Epoch seconds when the file was added.
    pub added_at: i64,
    pub actor: String,
}

impl From<&PendingFile> for FileEntry {
    fn from(file: &PendingFile) -> Self {
        Self {
            name: file.name.clone(),
            digest: file.digest.clone(),
            size: file.size,
            added_at: file.added_at,
            actor: file.actor.clone(),
        }
    }
}

/// Every archived file, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    #[serde(default)]
    files: Vec<FileEntry>,
}

impl FileIndex {
    /// Parse `files.json` bytes.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for bad JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut index: Self = serde_json::from_slice(bytes)?;
        index.files.sort_by(|a, b| a.name.cmp(&b.name));
        index.files.dedup_by(|a, b| a.name == b.name);
        Ok(index)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Read the index and the version it was read at; empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an upload error if the archive cannot be reached, or an
    /// encoding error for a malformed index.
    pub fn fetch<U>(uploader: &U) -> Result<(Self, Option<Versioned>)>
    where
        U: ArchiveUploader + ?Sized,
    {
        let current = uploader.get(FILE_INDEX_PATH)?;
        let index = match &current {
            Some(stored) => Self::from_slice(&stored.bytes)?,
            None => Self::default(),
        };
        Ok((index, current))
    }

    /// Insert `entry`, replacing an entry with the same name.
    pub fn upsert(&mut self, entry: FileEntry) {
        match self.files.binary_search_by(|f| f.name.as_str().cmp(&entry.name)) {
            Ok(at) => self.files[at] = entry,
            Err(at) => self.files.insert(at, entry),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|at| &self.files[at])
    }

    /// Whether `file` is listed with the same content.
    #[must_use]
    pub fn holds(&self, file: &PendingFile) -> bool {
        self.get(&file.name).is_some_and(|entry| entry.digest == file.digest)
    }

    #[must_use]
    pub fn entries(&self) -> &[FileEntry] {
        &self.files
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(name: &str, digest: &str) -> FileEntry {
        FileEntry {
            name: name.into(),
            digest: digest.into(),
            size: 3,
            added_at: 1_700_000_000,
            actor: "ada@example.com".into(),
        }
    }

    #[test]
    fn upsert_keeps_names_sorted_and_unique() {
        let mut index = FileIndex::default();
        index.upsert(entry("b.png", "1"));
        index.upsert(entry("a.png", "2"));
        index.upsert(entry("b.png", "3"));

        let names: Vec<&str> = index.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
        assert_eq!(index.get("b.png").map(|e| e.digest.as_str()), Some("3"));
        assert!(index.get("c.png").is_none());
    }

    #[test]
    fn parses_archived_layout() {
        let raw = json!({"files": [
            {"name": "z.txt", "digest": "ff", "size": 1, "added_at": 5, "actor": "ada@example.com"},
            {"name": "a.txt", "digest": "ee", "size": 2, "added_at": 6, "actor": "ada@example.com"}
        ]});
        let index = FileIndex::from_slice(raw.to_string().as_bytes()).expect("parse");
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].name, "a.txt");

        let again = FileIndex::from_slice(&index.to_vec().expect("ser")).expect("reparse");
        assert_eq!(again, index);
        assert!(FileIndex::from_slice(b"{}").expect("empty").is_empty());
    }

    #[test]
    fn holds_compares_content_digest() {
        let mut index = FileIndex::default();
        index.upsert(entry("a.png", "abc"));
        let mut pending = PendingFile {
            name: "a.png".into(),
            actor: "ada@example.com".into(),
            added_at: 1,
            digest: "abc".into(),
            size: 3,
        };
        assert!(index.holds(&pending));
        pending.digest = "def".into();
        assert!(!index.holds(&pending));
    }
}
