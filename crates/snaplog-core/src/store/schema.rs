//! SQLite schema for the event store.
//!
//! - `events` holds pending (not yet archived) events keyed by their id
//! - `store_meta` keeps small key/value records: the id high-water mark, the
//!   timestamp clock, persisted sync coordinator state and backup markers
//! - `files` holds uploaded file artifacts waiting to be archived

/// Migration v1: event log and metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY CHECK (id > 0),
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL CHECK (length(trim(actor)) > 0),
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Migration v2: pending file artifacts.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS files (
    name TEXT PRIMARY KEY CHECK (length(trim(name)) > 0),
    actor TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    digest TEXT NOT NULL,
    bytes BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_added
    ON files(added_at DESC);
";

/// Indexes expected by read paths.
pub const REQUIRED_INDEXES: &[&str] = &["idx_files_added"];

/// `store_meta` key: highest id ever assigned or covered by a checkpoint.
pub const META_HIGH_WATER: &str = "high_water_id";

/// `store_meta` key: last assigned timestamp (monotonic clock).
pub const META_CLOCK: &str = "clock";

/// `store_meta` key: persisted sync coordinator state (JSON).
pub const META_SYNC: &str = "sync_state";

/// `store_meta` key: backup markers (JSON).
pub const META_BACKUP: &str = "backup_markers";
