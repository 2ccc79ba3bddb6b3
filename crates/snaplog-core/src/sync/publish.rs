//! One archival cycle against an [`ArchiveUploader`].
//!
//! ```text
//! sync_start ─► upload files ─► files.json (expected version)
//!            ─► plan page vs. remote latest ─► upload page + manifest
//!            ─► upload snap.json (expected version) ─► delete superseded page
//!            ─► sync_finish ─► pull
//! ```
//!
//! The index and checkpoint writes are guarded by the versions read at the
//! start of the attempt; a conflict restarts the attempt from a fresh read.
//! If any upload fails for good the token is abandoned and nothing local is
//! purged. A token left outstanding by an interrupted cycle is finished by
//! the next one once the archive is seen to cover it.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::upload::{ArchiveUploader, Expect, RetryPolicy, Versioned};
use super::{Artifact, FILES_DIR, SyncToken};
use crate::archive::codec::{PageManifest, decode_page, decode_verified, encode_page};
use crate::archive::files::{FILE_INDEX_PATH, FileEntry, FileIndex};
use crate::archive::{FileArchiver, LatestPage, PageBatch, PageName};
use crate::checkpoint::{CHECKPOINT_PATH, Checkpoint};
use crate::engine::{Engine, FinishReport};
use crate::error::{CoreError, Result};
use crate::snap;

/// Summary of a completed [`publish`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub token: SyncToken,
    /// An interrupted cycle's token was finished instead of a new one.
    pub resumed: bool,
    pub files_uploaded: usize,
    /// Page written to the archive, if events were pending.
    pub page: Option<PageName>,
    /// Page folded into `page` and removed from the archive.
    pub superseded: Option<PageName>,
    pub manifest: Option<PageManifest>,
    pub finish: FinishReport,
    /// Checkpoint id after the cycle.
    pub last_applied_event_id: u64,
}

struct Uploaded {
    checkpoint: Checkpoint,
    page: Option<PageName>,
    superseded: Option<PageName>,
    manifest: Option<PageManifest>,
}

impl Uploaded {
    const fn covered(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint,
            page: None,
            superseded: None,
            manifest: None,
        }
    }
}

/// Archive everything pending in `engine` and confirm the sync.
///
/// # Errors
///
/// Returns the first non-retryable failure, or the last retryable one once
/// `retry` is exhausted. The sync token is released on upload failures.
/// [`CoreError::Conflict`] means another cycle holds a token the archive
/// does not cover yet.
#[instrument(skip_all)]
pub fn publish<U>(
    engine: &Engine,
    uploader: &U,
    archiver: &FileArchiver,
    retry: &RetryPolicy,
) -> Result<PublishReport>
where
    U: ArchiveUploader + ?Sized,
{
    let token = match engine.sync_start() {
        Ok(token) => token,
        Err(conflict @ CoreError::Conflict { .. }) => {
            return resume(engine, uploader, retry).and_then(|resumed| resumed.ok_or(conflict));
        }
        Err(err) => return Err(err),
    };
    let artifacts = token.artifacts()?;

    let uploaded = match upload_all(engine, uploader, archiver, retry, &artifacts) {
        Ok(uploaded) => uploaded,
        Err(err) => {
            if let Err(abort_err) = engine.sync_abort(&token) {
                warn!(error = %abort_err, "failed to release sync token");
            }
            return Err(err);
        }
    };

    if let Some(old) = &uploaded.superseded {
        for path in [old.archive_path(), old.manifest_path()] {
            if let Err(err) = retry.run("delete superseded page", |_| Ok(uploader.delete(&path)?)) {
                warn!(page = %old, path, error = %err, "superseded page left in archive");
            }
        }
    }

    let finish = engine.sync_finish(token.as_str())?;
    let last_applied_event_id = uploaded.checkpoint.last_applied_event_id;
    engine.pull(uploaded.checkpoint)?;

    let files_uploaded = artifacts
        .iter()
        .filter(|a| matches!(a, Artifact::File(_)))
        .count();
    info!(
        files = files_uploaded,
        page = ?uploaded.page.map(|p| p.to_string()),
        through = last_applied_event_id,
        "published"
    );
    Ok(PublishReport {
        token,
        resumed: false,
        files_uploaded,
        page: uploaded.page,
        superseded: uploaded.superseded,
        manifest: uploaded.manifest,
        finish,
        last_applied_event_id,
    })
}

/// Finish the outstanding token if the archive already holds everything it
/// names: the checkpoint reaches its page and the index lists its files.
/// `None` when the token is not covered (or there is none).
fn resume<U>(engine: &Engine, uploader: &U, retry: &RetryPolicy) -> Result<Option<PublishReport>>
where
    U: ArchiveUploader + ?Sized,
{
    let status = engine.sync_status()?;
    let Some(token) = status.token else {
        return Ok(None);
    };
    let artifacts = token.artifacts()?;

    let local = engine.baseline().last_applied_event_id;
    let (remote, _) = retry.run("read checkpoint", |_| fetch_checkpoint(uploader, local))?;
    let page_covered = artifacts.iter().all(|artifact| match artifact {
        Artifact::EventPage(page) => remote.last_applied_event_id >= page.last_id,
        Artifact::File(_) | Artifact::Snapshot => true,
    });
    if !page_covered {
        debug!(token = %token, "outstanding token not covered by the archive");
        return Ok(None);
    }

    let pending = engine.pending_files()?;
    if artifacts.iter().any(|a| matches!(a, Artifact::File(_))) {
        let (index, _) = retry.run("read file index", |_| FileIndex::fetch(uploader))?;
        let files_covered = artifacts.iter().all(|artifact| match artifact {
            Artifact::File(name) => pending
                .iter()
                .find(|file| &file.name == name)
                .is_none_or(|file| index.holds(file)),
            Artifact::EventPage(_) | Artifact::Snapshot => true,
        });
        if !files_covered {
            debug!(token = %token, "outstanding token has files missing from the archive");
            return Ok(None);
        }
    }

    info!(token = %token, "finishing sync token already covered by the archive");
    let finish = engine.sync_finish(token.as_str())?;
    let last_applied_event_id = remote.last_applied_event_id;
    engine.pull(remote)?;
    Ok(Some(PublishReport {
        token,
        resumed: true,
        files_uploaded: 0,
        page: None,
        superseded: None,
        manifest: None,
        finish,
        last_applied_event_id,
    }))
}

fn upload_all<U>(
    engine: &Engine,
    uploader: &U,
    archiver: &FileArchiver,
    retry: &RetryPolicy,
    artifacts: &[Artifact],
) -> Result<Uploaded>
where
    U: ArchiveUploader + ?Sized,
{
    let pending_files = engine.pending_files()?;
    let mut hot_page = None;
    let mut entries = Vec::new();
    for artifact in artifacts {
        match artifact {
            Artifact::File(name) => {
                let bytes = engine.file_bytes(name)?;
                let path = format!("{FILES_DIR}/{name}");
                retry.run("upload file", |_| Ok(uploader.put(&path, &bytes, &Expect::Any)?))?;
                if let Some(file) = pending_files.iter().find(|file| &file.name == name) {
                    entries.push(FileEntry::from(file));
                }
            }
            Artifact::EventPage(page) => hot_page = Some(*page),
            Artifact::Snapshot => {}
        }
    }

    let local = engine.baseline().last_applied_event_id;
    let candidate = match hot_page {
        Some(page) => Some((page, PageBatch::new(engine.page_events(&page)?)?)),
        None => None,
    };

    retry.run("publish checkpoint", |attempt| {
        if !entries.is_empty() {
            publish_file_index(uploader, &entries)?;
        }

        let (remote, current) = fetch_checkpoint(uploader, local)?;
        let Some((page, candidate)) = &candidate else {
            return Ok(Uploaded::covered(remote));
        };
        if remote.last_applied_event_id >= page.last_id {
            info!(attempt, "checkpoint already covers the hot page");
            return Ok(Uploaded::covered(remote));
        }

        let latest = match remote.pages.latest() {
            Some(name) => Some(fetch_page(uploader, name)?),
            None => None,
        };
        let plan = archiver.plan_page(candidate.clone(), latest)?;
        let (bytes, manifest) = encode_page(&plan.name, &plan.events)?;
        uploader.put(&plan.name.archive_path(), &bytes, &Expect::Any)?;
        uploader.put(&plan.name.manifest_path(), &manifest.to_vec()?, &Expect::Any)?;

        let mut pages = remote.pages.clone();
        pages.apply(&plan)?;
        let next = Checkpoint {
            last_applied_event_id: page.last_id,
            snap: snap::fold(&remote.snap, candidate.events())?,
            pages,
        };
        uploader.put(CHECKPOINT_PATH, &next.to_vec()?, &Expect::replacing(current.as_ref()))?;

        Ok(Uploaded {
            checkpoint: next,
            page: Some(plan.name),
            superseded: plan.superseded,
            manifest: Some(manifest),
        })
    })
}

/// Merge `entries` into the archived file index.
fn publish_file_index<U>(uploader: &U, entries: &[FileEntry]) -> Result<()>
where
    U: ArchiveUploader + ?Sized,
{
    let (mut index, current) = FileIndex::fetch(uploader)?;
    let before = index.clone();
    for entry in entries {
        index.upsert(entry.clone());
    }
    if index == before {
        return Ok(());
    }
    uploader.put(FILE_INDEX_PATH, &index.to_vec()?, &Expect::replacing(current.as_ref()))?;
    debug!(files = index.len(), "file index updated");
    Ok(())
}

/// Read the archived checkpoint and the version it was read at.
fn fetch_checkpoint<U>(uploader: &U, local: u64) -> Result<(Checkpoint, Option<Versioned>)>
where
    U: ArchiveUploader + ?Sized,
{
    let current = uploader.get(CHECKPOINT_PATH)?;
    let checkpoint = match &current {
        Some(stored) => Checkpoint::from_slice(&stored.bytes)?,
        None => Checkpoint::default(),
    };
    if checkpoint.last_applied_event_id < local {
        return Err(CoreError::StaleCheckpoint {
            remote: checkpoint.last_applied_event_id,
            local,
        });
    }
    Ok((checkpoint, current))
}

fn fetch_page<U>(uploader: &U, name: &PageName) -> Result<LatestPage>
where
    U: ArchiveUploader + ?Sized,
{
    Ok(LatestPage {
        name: *name,
        batch: read_page(uploader, name)?,
    })
}

/// Read and decode archived page `name`.
///
/// When the page's manifest is present the content is checked against it;
/// pages archived without one are only checked against their name.
///
/// # Errors
///
/// Returns [`CoreError::CorruptPage`] if the page is missing, undecodable,
/// or does not match its manifest.
pub fn read_page<U>(uploader: &U, name: &PageName) -> Result<PageBatch>
where
    U: ArchiveUploader + ?Sized,
{
    let stored = uploader
        .get(&name.archive_path())?
        .ok_or_else(|| CoreError::CorruptPage {
            name: name.to_string(),
            reason: "listed in snap.json but missing from the archive".into(),
        })?;

    match uploader.get(&name.manifest_path())? {
        Some(raw) => {
            let manifest = PageManifest::from_slice(&raw.bytes).map_err(|err| CoreError::CorruptPage {
                name: name.to_string(),
                reason: format!("unreadable manifest: {err}"),
            })?;
            if manifest.name != *name {
                return Err(CoreError::CorruptPage {
                    name: name.to_string(),
                    reason: format!("manifest describes page {}", manifest.name),
                });
            }
            decode_verified(&manifest, &stored.bytes)
        }
        None => {
            debug!(page = %name, "page has no manifest");
            decode_page(name, &stored.bytes)
        }
    }
}
