//! snaplog-core library.
//!
//! An append-only event log folded into a materialized snapshot, archived
//! in pages and reconciled with a remote archive through a two-phase sync.
//!
//! # Conventions
//!
//! - **Errors**: library functions return [`Result`] with a [`CoreError`];
//!   `anyhow` is reserved for configuration loading and notifier delivery.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod archive;
pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod lock;
pub mod snap;
pub mod store;
pub mod sync;

pub use checkpoint::{Checkpoint, CheckpointLoader};
pub use engine::{Engine, EngineSettings};
pub use error::{CoreError, ErrorCode, Result};
pub use event::{Event, Payload};
pub use snap::Snapshot;
