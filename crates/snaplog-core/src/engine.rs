//! The single owned state object of a snaplog store.
//!
//! [`Engine::open`] performs the cold start and returns only when the
//! projected state is complete, so no operation can observe a half-loaded
//! store. Afterwards:
//!
//! - mutations serialize on one `Mutex` guarding the event store and the
//!   sync coordinator
//! - the projected state is published as an `Arc<View>` behind an `RwLock`;
//!   readers clone the `Arc` and see either the state before or after a
//!   mutation, never a mix
//! - event-log reads share the writer's connection and queue behind
//!   mutations

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::archive::PageName;
use crate::backup::{self, BackupMarkers, BackupPolicy, BackupReport, Marker, Notifier};
use crate::checkpoint::{Checkpoint, CheckpointLoader};
use crate::config::{SyncConfig, project_dir};
use crate::error::{CoreError, Result};
use crate::event::{Event, Payload};
use crate::lock::StoreLock;
use crate::snap::derived::DerivedSnaps;
use crate::snap::{self, Snapshot};
use crate::store::{EventStore, PendingFile, schema};
use crate::sync::{
    Artifact, FinishPlan, PendingArtifacts, PersistedSync, SyncCoordinator, SyncState, SyncToken,
};

/// File name of the event store inside the project directory.
pub const STORE_FILE: &str = "store.sqlite3";

/// File name of the ownership lock inside the project directory.
pub const LOCK_FILE: &str = "lock";

/// Runtime knobs for an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub stale_after: Duration,
    pub lock_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for EngineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            lock_timeout: config.lock_timeout(),
        }
    }
}

/// Projected state at one point in time.
#[derive(Debug)]
pub struct View {
    /// Snap over archived and pending events, the newest folded id, and the
    /// archived page index.
    pub state: Checkpoint,
    derived: DerivedSnaps,
}

impl View {
    fn new(state: Checkpoint) -> Self {
        Self {
            state,
            derived: DerivedSnaps::new(),
        }
    }

    #[must_use]
    pub const fn snap(&self) -> &Snapshot {
        &self.state.snap
    }

    #[must_use]
    pub const fn last_applied_event_id(&self) -> u64 {
        self.state.last_applied_event_id
    }
}

/// Result of [`Engine::sync_finish`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinishReport {
    /// The token had already been completed; nothing was purged.
    pub already_completed: bool,
    pub files_purged: usize,
    pub events_purged: usize,
}

/// Result of [`Engine::sync_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub token: Option<SyncToken>,
    pub issued_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub last_completed: Option<SyncToken>,
    pub pending_events: u64,
    pub pending_files: usize,
    /// Highest id covered by the archived checkpoint.
    pub archived_through: u64,
    pub last_applied_event_id: u64,
}

struct Writer {
    store: EventStore,
    sync: SyncCoordinator,
    /// Last checkpoint known to be archived.
    baseline: Checkpoint,
}

pub struct Engine {
    writer: Mutex<Writer>,
    view: RwLock<Arc<View>>,
    _lock: Option<StoreLock>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("last_applied_event_id", &self.view().last_applied_event_id())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the store of the project rooted at `project_root`, taking the
    /// ownership lock first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Lock`] if another process owns the store, or any
    /// cold-start error (see [`Engine::open`]).
    pub fn open_project(
        project_root: &Path,
        loader: &dyn CheckpointLoader,
        settings: EngineSettings,
    ) -> Result<Self> {
        let dir = project_dir(project_root);
        let lock = StoreLock::acquire(&dir.join(LOCK_FILE), settings.lock_timeout)?;
        let store = EventStore::open(&dir.join(STORE_FILE))?;
        Self::cold_start(store, loader, settings, Some(lock))
    }

    /// Cold start: load the checkpoint, purge events it already covers,
    /// raise the id high-water mark past it, fold the remaining events and
    /// restore the sync coordinator.
    ///
    /// # Errors
    ///
    /// Returns checkpoint loading, storage, or fold errors.
    pub fn open(
        store: EventStore,
        loader: &dyn CheckpointLoader,
        settings: EngineSettings,
    ) -> Result<Self> {
        Self::cold_start(store, loader, settings, None)
    }

    #[instrument(skip_all)]
    fn cold_start(
        mut store: EventStore,
        loader: &dyn CheckpointLoader,
        settings: EngineSettings,
        lock: Option<StoreLock>,
    ) -> Result<Self> {
        let baseline = loader.load_checkpoint()?.unwrap_or_default();
        baseline.validate()?;

        let covered = baseline.last_applied_event_id;
        if covered > 0 {
            let purged = store.delete_range(1, covered)?;
            store.raise_high_water(covered)?;
            if purged > 0 {
                info!(purged, covered, "dropped events already in checkpoint");
            }
        }

        let pending = store.events_since(None)?;
        let state = project(&baseline, &pending)?;

        let persisted: PersistedSync = match store.meta(schema::META_SYNC)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => PersistedSync::default(),
        };
        let sync = SyncCoordinator::restore(persisted, settings.stale_after);

        info!(
            archived_through = covered,
            pending = pending.len(),
            last_applied = state.last_applied_event_id,
            "engine ready"
        );
        Ok(Self {
            writer: Mutex::new(Writer {
                store,
                sync,
                baseline,
            }),
            view: RwLock::new(Arc::new(View::new(state))),
            _lock: lock,
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current projected state.
    #[must_use]
    pub fn view(&self) -> Arc<View> {
        Arc::clone(&self.view.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Named derivation of the current snap, computed at most once per
    /// snapshot version.
    pub fn derived_snap<F>(&self, name: &str, derive: F) -> Arc<Value>
    where
        F: FnOnce(&Snapshot) -> Value,
    {
        let view = self.view();
        view.derived.get_or_compute(name, &view.state.snap, derive)
    }

    /// See [`EventStore::events_since`].
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn events_since(&self, after: Option<u64>) -> Result<Vec<Event>> {
        self.writer().store.events_since(after)
    }

    /// See [`EventStore::event_by_id`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown or purged id.
    pub fn event_by_id(&self, id: u64) -> Result<Event> {
        self.writer().store.event_by_id(id)
    }

    /// See [`EventStore::boundary_events`].
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn boundary_events(&self) -> Result<Option<(Event, Event)>> {
        self.writer().store.boundary_events()
    }

    /// Stored events inside `page`'s id range.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn page_events(&self, page: &PageName) -> Result<Vec<Event>> {
        let writer = self.writer();
        events_in(&writer.store, page)
    }

    /// Pending files, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn pending_files(&self) -> Result<Vec<PendingFile>> {
        self.writer().store.pending_files()
    }

    /// Bytes of a pending file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the file is not pending.
    pub fn file_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.writer().store.file_bytes(name)
    }

    /// Last checkpoint known to be archived.
    #[must_use]
    pub fn baseline(&self) -> Checkpoint {
        self.writer().baseline.clone()
    }

    /// Sync coordinator and backlog summary.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn sync_status(&self) -> Result<SyncStatus> {
        let writer = self.writer();
        let (token, issued_at) = match writer.sync.state() {
            SyncState::Idle => (None, None),
            SyncState::TokenIssued { token, issued_at } => (Some(token.clone()), Some(*issued_at)),
        };
        let archived_through = writer.baseline.last_applied_event_id;
        Ok(SyncStatus {
            token,
            issued_at,
            stale: writer.sync.is_stale(Utc::now()),
            last_completed: writer.sync.last_completed().cloned(),
            pending_events: writer.store.count_since(archived_through)?,
            pending_files: writer.store.pending_files()?.len(),
            archived_through,
            last_applied_event_id: self.view().last_applied_event_id(),
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append an event and fold it into the published state.
    ///
    /// The payload shape is checked inside the append transaction, so a
    /// malformed event is never stored.
    ///
    /// # Errors
    ///
    /// Returns validation, malformed-event, or storage errors.
    pub fn add_event(&self, actor: &str, payload: Payload) -> Result<Event> {
        let mut writer = self.writer();
        let event = writer
            .store
            .append_checked(actor, payload, snap::check_event)?;

        let current = self.view();
        let mut state = current.state.clone();
        state.snap.apply_event(&event)?;
        state.last_applied_event_id = event.id;
        self.publish_view(state);
        Ok(event)
    }

    /// Store a file artifact for the next sync.
    ///
    /// # Errors
    ///
    /// Returns validation or storage errors.
    pub fn add_file(&self, name: &str, actor: &str, bytes: &[u8]) -> Result<PendingFile> {
        self.writer().store.add_file(name, actor, bytes)
    }

    /// Issue a sync token for everything pending now.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] while a fresh token is outstanding.
    pub fn sync_start(&self) -> Result<SyncToken> {
        self.sync_start_at(Utc::now())
    }

    /// [`Engine::sync_start`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Engine::sync_start`].
    pub fn sync_start_at(&self, now: DateTime<Utc>) -> Result<SyncToken> {
        let mut writer = self.writer();
        let pending = PendingArtifacts {
            files: writer
                .store
                .pending_files()?
                .into_iter()
                .map(|file| file.name)
                .collect(),
            hot_page: match writer.store.boundary_events()? {
                Some((oldest, newest)) => Some(PageName::for_range(&oldest, &newest)?),
                None => None,
            },
        };

        let mut next = writer.sync.clone();
        let token = next.start(&pending, now)?;
        persist_sync(&mut writer.store, &next.persisted())?;
        writer.sync = next;
        Ok(token)
    }

    /// Confirm that `token`'s artifacts are archived and purge them.
    ///
    /// The purge and the state transition commit in one transaction; if it
    /// fails the token stays issued and the call can be repeated.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Precondition`] when no token is outstanding
    /// - [`CoreError::TokenMismatch`] when `token` differs; the outstanding
    ///   token is invalidated and nothing is purged
    #[instrument(skip(self))]
    pub fn sync_finish(&self, token: &str) -> Result<FinishReport> {
        let mut writer = self.writer();
        let artifacts = match writer.sync.plan_finish(token) {
            Ok(FinishPlan::AlreadyCompleted) => {
                info!("sync token already completed");
                return Ok(FinishReport {
                    already_completed: true,
                    ..FinishReport::default()
                });
            }
            Ok(FinishPlan::Purge(artifacts)) => artifacts,
            Err(err @ CoreError::TokenMismatch { .. }) => {
                let mut next = writer.sync.clone();
                next.abandon();
                persist_sync(&mut writer.store, &next.persisted())?;
                writer.sync = next;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        // What the archive now holds, computed before the events go away.
        let mut baseline = writer.baseline.clone();
        for artifact in &artifacts {
            match artifact {
                Artifact::EventPage(page) if page.last_id > baseline.last_applied_event_id => {
                    let archived = events_in(&writer.store, page)?;
                    baseline.snap = snap::fold(&baseline.snap, &archived)?;
                    baseline.last_applied_event_id = page.last_id;
                }
                _ => {}
            }
        }

        let after = serde_json::to_string(&writer.sync.persisted_after_complete())?;
        let report = writer.store.transact(|tx| {
            let mut report = FinishReport::default();
            for artifact in &artifacts {
                match artifact {
                    Artifact::File(name) => {
                        report.files_purged += usize::from(tx.delete_file(name)?);
                    }
                    Artifact::EventPage(page) => {
                        report.events_purged += tx.delete_range(page.first_id, page.last_id)?;
                    }
                    Artifact::Snapshot => {}
                }
            }
            tx.set_meta(schema::META_SYNC, &after)?;
            Ok(report)
        })?;

        writer.sync.complete();
        writer.baseline = baseline;
        info!(
            files = report.files_purged,
            events = report.events_purged,
            "sync finished"
        );
        Ok(report)
    }

    /// Give up on `token` without purging, e.g. after a failed upload.
    /// Returns `false` if `token` was not the outstanding token.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the new state cannot be persisted.
    pub fn sync_abort(&self, token: &SyncToken) -> Result<bool> {
        let mut writer = self.writer();
        let outstanding =
            matches!(writer.sync.state(), SyncState::TokenIssued { token: t, .. } if t == token);
        if !outstanding {
            return Ok(false);
        }
        let mut next = writer.sync.clone();
        next.abandon();
        persist_sync(&mut writer.store, &next.persisted())?;
        writer.sync = next;
        Ok(true)
    }

    /// Adopt a newer archived checkpoint: purge what it covers and rebuild
    /// the snap as `merge(checkpoint.snap, fold(∅, pending))`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleCheckpoint`] if `checkpoint` is older than
    /// the current baseline.
    #[instrument(skip_all, fields(through = checkpoint.last_applied_event_id))]
    pub fn pull(&self, checkpoint: Checkpoint) -> Result<Arc<View>> {
        let mut writer = self.writer();
        let local = writer.baseline.last_applied_event_id;
        if checkpoint.last_applied_event_id < local {
            return Err(CoreError::StaleCheckpoint {
                remote: checkpoint.last_applied_event_id,
                local,
            });
        }
        checkpoint.validate()?;

        let covered = checkpoint.last_applied_event_id;
        if covered > 0 {
            writer.store.delete_range(1, covered)?;
            writer.store.raise_high_water(covered)?;
        }
        let pending = writer.store.events_since(None)?;
        let state = project(&checkpoint, &pending)?;

        writer.baseline = checkpoint;
        self.publish_view(state);
        Ok(self.view())
    }

    /// Send a backup if one is due. Notifier failures are reported in the
    /// returned report, not as an error.
    ///
    /// # Errors
    ///
    /// Returns storage or encoding errors.
    pub fn backup(
        &self,
        policy: &BackupPolicy,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<BackupReport> {
        let mut writer = self.writer();
        let markers: BackupMarkers = match writer.store.meta(schema::META_BACKUP)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => BackupMarkers::default(),
        };
        let high_water = writer.store.high_water()?;

        let Some(kind) = backup::decide(policy, &markers, now, high_water) else {
            let report = BackupReport::nothing_due();
            report.log();
            return Ok(report);
        };

        let events = match kind {
            backup::BackupKind::Full => writer.store.events_since(None)?,
            backup::BackupKind::Partial => writer
                .store
                .events_since(markers.last_any().map(|m| m.high_water))?,
        };
        // The archived baseline, not the view: pending events ride alongside.
        let message = backup::build_message(kind, policy, &writer.baseline, &events, now)?;

        let report = match notifier.send(&message) {
            Ok(()) => {
                let next = markers.advanced(kind, Marker { at: now, high_water });
                writer
                    .store
                    .set_meta(schema::META_BACKUP, &serde_json::to_string(&next)?)?;
                BackupReport {
                    kind: Some(kind),
                    events: events.len(),
                    sent: true,
                    error: None,
                }
            }
            Err(err) => BackupReport {
                kind: Some(kind),
                events: events.len(),
                sent: false,
                error: Some(format!("{err:#}")),
            },
        };
        report.log();
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn writer(&self) -> MutexGuard<'_, Writer> {
        // SQLite rolls back an interrupted transaction, so the guarded state
        // is still usable after a panic.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_view(&self, state: Checkpoint) {
        let next = Arc::new(View::new(state));
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Fold `pending` onto `baseline`; pages come from the baseline.
fn project(baseline: &Checkpoint, pending: &[Event]) -> Result<Checkpoint> {
    let fresh = snap::fold(&Snapshot::new(), pending)?;
    Ok(Checkpoint {
        last_applied_event_id: pending
            .last()
            .map_or(baseline.last_applied_event_id, |event| {
                event.id.max(baseline.last_applied_event_id)
            }),
        snap: snap::merge(&baseline.snap, &fresh),
        pages: baseline.pages.clone(),
    })
}

fn events_in(store: &EventStore, page: &PageName) -> Result<Vec<Event>> {
    let mut events = store.events_since(page.first_id.checked_sub(1))?;
    events.retain(|event| event.id <= page.last_id);
    Ok(events)
}

fn persist_sync(store: &mut EventStore, state: &PersistedSync) -> Result<()> {
    let raw = serde_json::to_string(state)?;
    store.set_meta(schema::META_SYNC, &raw).inspect_err(|err| {
        warn!(error = %err, "failed to persist sync state");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::NoCheckpoint;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().expect("object payload")
    }

    fn engine() -> Engine {
        Engine::open(
            EventStore::open_in_memory().expect("store"),
            &NoCheckpoint,
            EngineSettings::default(),
        )
        .expect("open")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("time")
    }

    #[test]
    fn add_event_updates_view() {
        let engine = engine();
        let before = engine.view();
        engine
            .add_event("ada@example.com", payload(json!({"post": {"title": "A"}})))
            .expect("add");

        assert!(before.snap().is_empty(), "old view is immutable");
        assert_eq!(engine.view().snap().get("post", "title"), Some(&json!("A")));
        assert_eq!(engine.view().last_applied_event_id(), 1);
    }

    #[test]
    fn malformed_event_is_not_stored() {
        let engine = engine();
        let err = engine
            .add_event("ada@example.com", payload(json!({"post": "A"})))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedEvent);
        assert!(engine.events_since(None).expect("events").is_empty());
        assert_eq!(engine.view().last_applied_event_id(), 0);
    }

    #[test]
    fn derived_snaps_reset_on_mutation() {
        let engine = engine();
        let count = |s: &Snapshot| json!(s.categories().count());
        assert_eq!(*engine.derived_snap("categories", count), json!(0));

        engine
            .add_event("ada@example.com", payload(json!({"post": {"title": "A"}})))
            .expect("add");
        assert_eq!(*engine.derived_snap("categories", count), json!(1));
    }

    #[test]
    fn finish_purges_token_artifacts_only() {
        let engine = engine();
        for title in ["A", "B"] {
            engine
                .add_event("ada@example.com", payload(json!({"post": {"title": title}})))
                .expect("add");
        }
        engine.add_file("a.png", "ada@example.com", b"png").expect("file");

        let token = engine.sync_start_at(at(0)).expect("start");
        engine
            .add_event("ada@example.com", payload(json!({"user": {"name": "X"}})))
            .expect("late event");

        let report = engine.sync_finish(token.as_str()).expect("finish");
        assert_eq!(report.events_purged, 2);
        assert_eq!(report.files_purged, 1);

        let left: Vec<u64> = engine
            .events_since(None)
            .expect("events")
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(left, vec![3]);
        assert_eq!(engine.baseline().last_applied_event_id, 2);
        assert_eq!(
            engine.baseline().snap.get("post", "title"),
            Some(&json!("B"))
        );
        assert_eq!(engine.view().last_applied_event_id(), 3);
    }

    #[test]
    fn mismatch_invalidates_without_purging() {
        let engine = engine();
        engine
            .add_event("ada@example.com", payload(json!({"post": {"title": "A"}})))
            .expect("add");
        let token = engine.sync_start_at(at(0)).expect("start");

        let err = engine.sync_finish("snap.json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenMismatch);
        assert_eq!(engine.events_since(None).expect("events").len(), 1);

        let err = engine.sync_finish(token.as_str()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Precondition);
    }

    #[test]
    fn replayed_finish_is_noop() {
        let engine = engine();
        engine
            .add_event("ada@example.com", payload(json!({"post": {"title": "A"}})))
            .expect("add");
        let token = engine.sync_start_at(at(0)).expect("start");
        engine.sync_finish(token.as_str()).expect("finish");

        let replay = engine.sync_finish(token.as_str()).expect("replay");
        assert!(replay.already_completed);
        assert_eq!(replay.events_purged, 0);
    }

    #[test]
    fn sync_state_survives_reopen() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("store.sqlite3");
        let token = {
            let engine = Engine::open(
                EventStore::open(&path).expect("store"),
                &NoCheckpoint,
                EngineSettings::default(),
            )
            .expect("open");
            engine
                .add_event("ada@example.com", payload(json!({"post": {"title": "A"}})))
                .expect("add");
            engine.sync_start().expect("start")
        };

        let engine = Engine::open(
            EventStore::open(&path).expect("store"),
            &NoCheckpoint,
            EngineSettings::default(),
        )
        .expect("reopen");
        assert_eq!(
            engine.sync_start().unwrap_err().code(),
            ErrorCode::Conflict
        );
        assert_eq!(engine.sync_finish(token.as_str()).expect("finish").events_purged, 1);
    }

    #[test]
    fn abort_releases_the_token() {
        let engine = engine();
        let token = engine.sync_start_at(at(0)).expect("start");
        assert!(!engine.sync_abort(&SyncToken::from("other")).expect("abort other"));
        assert!(engine.sync_abort(&token).expect("abort"));
        engine.sync_start_at(at(1)).expect("start again");
    }

    #[test]
    fn pull_rejects_older_checkpoint() {
        let engine = engine();
        let newer = Checkpoint {
            last_applied_event_id: 5,
            ..Checkpoint::default()
        };
        engine.pull(newer).expect("pull");

        let err = engine.pull(Checkpoint::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StaleCheckpoint);
    }

    #[test]
    fn pull_keeps_pending_events_on_top() {
        let engine = engine();
        engine
            .add_event("ada@example.com", payload(json!({"post": {"title": "local"}})))
            .expect("add");

        let mut snap = Snapshot::new();
        snap.insert("post", "title", json!("remote"));
        snap.insert("user", "name", json!("X"));
        // covers nothing local yet
        let view = engine
            .pull(Checkpoint {
                last_applied_event_id: 0,
                snap,
                pages: crate::archive::PageIndex::new(),
            })
            .expect("pull");
        assert_eq!(view.snap().get("post", "title"), Some(&json!("local")));
        assert_eq!(view.snap().get("user", "name"), Some(&json!("X")));
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn send(&self, _message: &backup::Message) -> anyhow::Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    struct CountingNotifier(std::cell::Cell<usize>);

    impl Notifier for CountingNotifier {
        fn send(&self, _message: &backup::Message) -> anyhow::Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingNotifier(std::cell::RefCell<Vec<backup::Message>>);

    impl Notifier for CapturingNotifier {
        fn send(&self, message: &backup::Message) -> anyhow::Result<()> {
            self.0.borrow_mut().push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn full_backup_attaches_archived_baseline_and_pending_events() {
        let engine = engine();
        for title in ["A", "B"] {
            engine
                .add_event("ada@example.com", payload(json!({"post": {"title": title}})))
                .expect("add");
        }
        let token = engine.sync_start_at(at(0)).expect("start");
        engine.sync_finish(token.as_str()).expect("finish");
        engine
            .add_event("ada@example.com", payload(json!({"user": {"name": "X"}})))
            .expect("pending");

        let notifier = CapturingNotifier::default();
        let report = engine
            .backup(&BackupPolicy::default(), &notifier, at(0))
            .expect("backup");
        assert_eq!(report.kind, Some(backup::BackupKind::Full));
        assert_eq!(report.events, 1);

        let sent = notifier.0.borrow();
        let attachment = sent[0].attachment.as_ref().expect("attachment");
        let body: Value = serde_json::from_slice(
            &crate::archive::codec::gunzip(&attachment.bytes).expect("gunzip"),
        )
        .expect("json");
        assert_eq!(body["checkpoint"]["last_applied_event_id"], 2);
        assert_eq!(body["checkpoint"]["snap"], json!({"post": {"title": "B"}}));
        assert_eq!(body["events"].as_array().expect("events").len(), 1);
        assert_eq!(body["events"][0]["id"], 3);
    }

    #[test]
    fn backup_failure_keeps_markers() {
        let engine = engine();
        let policy = BackupPolicy::default();

        let report = engine.backup(&policy, &FailingNotifier, at(0)).expect("backup");
        assert_eq!(report.kind, Some(backup::BackupKind::Full));
        assert!(!report.sent);
        assert!(report.error.as_deref().is_some_and(|e| e.contains("smtp")));

        let counter = CountingNotifier(std::cell::Cell::new(0));
        let report = engine.backup(&policy, &counter, at(0)).expect("retry");
        assert!(report.sent);
        assert_eq!(counter.0.get(), 1);

        let report = engine.backup(&policy, &counter, at(60)).expect("nothing due");
        assert_eq!(report.kind, None);
        assert_eq!(counter.0.get(), 1);
    }
}
