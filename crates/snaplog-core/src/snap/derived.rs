//! Named derivations of a snapshot, computed lazily and memoized.
//!
//! A cache belongs to exactly one snapshot version. The engine creates a
//! fresh cache whenever it publishes a new snapshot, which is what
//! invalidates every derivation at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

use super::Snapshot;

#[derive(Debug, Default)]
pub struct DerivedSnaps {
    entries: Mutex<HashMap<String, Arc<Value>>>,
}

impl DerivedSnaps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached derivation `name`, computing it with `derive` on a
    /// miss.
    ///
    /// `derive` runs outside the cache lock, so two concurrent misses for the
    /// same name may both compute; the first result stored wins.
    pub fn get_or_compute<F>(&self, name: &str, snap: &Snapshot, derive: F) -> Arc<Value>
    where
        F: FnOnce(&Snapshot) -> Value,
    {
        if let Some(hit) = self.lock().get(name) {
            return Arc::clone(hit);
        }

        let computed = Arc::new(derive(snap));
        debug!(name, "computed derived snapshot");
        Arc::clone(
            self.lock()
                .entry(name.to_string())
                .or_insert(computed),
        )
    }

    /// Number of cached derivations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Value>>> {
        // The map holds plain values; a panic mid-insert cannot corrupt it.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn derivation_runs_once_per_name() {
        let mut snap = Snapshot::new();
        snap.insert("post", "a", json!({"title": "A"}));
        snap.insert("post", "b", json!({"title": "B"}));

        let cache = DerivedSnaps::new();
        let calls = Cell::new(0);
        let count_posts = |s: &Snapshot| {
            calls.set(calls.get() + 1);
            json!(s.category("post").map_or(0, std::collections::BTreeMap::len))
        };

        assert_eq!(*cache.get_or_compute("post_count", &snap, count_posts), json!(2));
        assert_eq!(*cache.get_or_compute("post_count", &snap, count_posts), json!(2));
        assert_eq!(calls.get(), 1);

        cache.get_or_compute("titles", &snap, |_| json!(["A", "B"]));
        assert_eq!(cache.len(), 2);
    }
}
