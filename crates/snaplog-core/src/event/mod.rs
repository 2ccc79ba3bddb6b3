//! Event data model for the snaplog event log.
//!
//! An [`Event`] is an immutable, partial update to the materialized snapshot:
//! its payload maps `category → key → value`. Events are created by the
//! [`crate::store::EventStore`], which assigns the id and timestamp, and are
//! deleted only after the sync protocol confirms they were archived.
//!
//! # Ordering
//!
//! `id` is the only ordering key. `timestamp` is epoch seconds taken at
//! append time; it never goes backwards but ties are normal and carry no
//! meaning.

pub mod validate;

use serde::{Deserialize, Serialize};

/// Raw event payload: a JSON object of categories.
///
/// Each category is expected to be an object of key/value pairs. That shape
/// is checked when the payload is folded, not when it is parsed, so
/// malformed archived data surfaces as [`crate::CoreError::MalformedEvent`].
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A single stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned identifier, strictly increasing and never reused.
    pub id: u64,
    /// Epoch seconds at append time. Informational only.
    pub timestamp: i64,
    /// Email address of the submitter.
    pub actor: String,
    /// Partial update applied to the snapshot.
    pub payload: Payload,
}

impl Event {
    /// Iterate the `(category, key, value)` triples of this event in payload
    /// order, skipping categories that are not objects.
    pub fn triples(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.payload.iter().flat_map(|(category, entries)| {
            entries
                .as_object()
                .into_iter()
                .flat_map(move |map| map.iter().map(move |(k, v)| (category.as_str(), k.as_str(), v)))
        })
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} @{} {} ({} categories)",
            self.id,
            self.timestamp,
            self.actor,
            self.payload.len()
        )
    }
}
