//! Snapshot projection: folding events into the materialized "snap".
//!
//! A [`Snapshot`] is a two-level map `category → key → value`. Folding an
//! event overwrites `snap[category][key]` for every triple in its payload;
//! merging two snapshots is the same two-level union with the right side
//! winning. Values are replaced wholesale, never merged recursively.
//!
//! Both maps are `BTreeMap`s, so equal snapshots serialize to identical
//! bytes.

pub mod derived;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::error::{CoreError, Result};
use crate::event::Event;

/// Entries of one category.
pub type Category = BTreeMap<String, Value>;

/// Materialized state derived from the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, Category>);

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, category: &str, key: &str) -> Option<&Value> {
        self.0.get(category).and_then(|entries| entries.get(key))
    }

    #[must_use]
    pub fn category(&self, category: &str) -> Option<&Category> {
        self.0.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &Category)> {
        self.0.iter().map(|(name, entries)| (name.as_str(), entries))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set a single entry.
    pub fn insert(&mut self, category: &str, key: &str, value: Value) {
        self.0
            .entry(category.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Apply one event in place.
    ///
    /// The whole payload is checked before anything is written, so a
    /// malformed event leaves the snapshot untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedEvent`] if a category is not an object.
    pub fn apply_event(&mut self, event: &Event) -> Result<()> {
        check_event(event)?;
        for (category, key, value) in event.triples() {
            self.insert(category, key, value.clone());
        }
        Ok(())
    }

    /// Serialize to an untyped JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(name, entries)| {
                    let map = entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<serde_json::Map<_, _>>();
                    (name.clone(), Value::Object(map))
                })
                .collect(),
        )
    }
}

impl FromIterator<(String, Category)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Category)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Check that every payload category of `event` is an object.
///
/// # Errors
///
/// Returns [`CoreError::MalformedEvent`] naming the first bad category.
pub fn check_event(event: &Event) -> Result<()> {
    match event.payload.iter().find(|(_, entries)| !entries.is_object()) {
        Some((category, _)) => Err(CoreError::MalformedEvent {
            event_id: event.id,
            category: category.clone(),
        }),
        None => Ok(()),
    }
}

/// Fold `events` onto a copy of `base` in ascending id order.
///
/// `base` is not modified; the input order of `events` does not matter.
///
/// # Errors
///
/// Returns [`CoreError::MalformedEvent`] for the first event with a
/// non-object category. No partial result is returned.
#[instrument(skip_all, fields(events = events.len()))]
pub fn fold(base: &Snapshot, events: &[Event]) -> Result<Snapshot> {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|event| event.id);

    let mut snap = base.clone();
    for event in ordered {
        snap.apply_event(event)?;
    }
    Ok(snap)
}

/// Two-level union of `a` and `b`; `b` wins on key collisions.
#[must_use]
pub fn merge(a: &Snapshot, b: &Snapshot) -> Snapshot {
    let mut out = a.clone();
    for (category, entries) in &b.0 {
        let target = out.0.entry(category.clone()).or_default();
        for (key, value) in entries {
            target.insert(key.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn event(id: u64, payload: Value) -> Event {
        Event {
            id,
            timestamp: 1_700_000_000,
            actor: "ada@example.com".into(),
            payload: payload.as_object().cloned().expect("object payload"),
        }
    }

    fn snap(value: Value) -> Snapshot {
        serde_json::from_value(value).expect("snapshot")
    }

    #[test]
    fn three_event_scenario() {
        let events = vec![
            event(1, json!({"post": {"title": "A"}})),
            event(2, json!({"post": {"title": "B"}})),
            event(3, json!({"user": {"name": "X"}})),
        ];
        let out = fold(&Snapshot::new(), &events).expect("fold");
        assert_eq!(out, snap(json!({"post": {"title": "B"}, "user": {"name": "X"}})));
    }

    #[test]
    fn fold_orders_by_id_not_input_position() {
        let events = vec![
            event(2, json!({"post": {"title": "B"}})),
            event(1, json!({"post": {"title": "A"}})),
        ];
        let out = fold(&Snapshot::new(), &events).expect("fold");
        assert_eq!(out.get("post", "title"), Some(&json!("B")));
    }

    #[test]
    fn fold_leaves_base_untouched() {
        let base = snap(json!({"post": {"title": "A"}}));
        let out = fold(&base, &[event(5, json!({"post": {"title": "Z"}}))]).expect("fold");
        assert_eq!(base.get("post", "title"), Some(&json!("A")));
        assert_eq!(out.get("post", "title"), Some(&json!("Z")));
    }

    #[test]
    fn fold_of_nothing_is_base() {
        let base = snap(json!({"post": {"title": "A"}}));
        assert_eq!(fold(&base, &[]).expect("fold"), base);
    }

    #[test]
    fn non_object_category_is_rejected_not_coerced() {
        let events = vec![
            event(1, json!({"post": {"title": "A"}})),
            event(2, json!({"user": {"name": "X"}, "post": "oops"})),
        ];
        let err = fold(&Snapshot::new(), &events).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedEvent);
        match err {
            CoreError::MalformedEvent { event_id, category } => {
                assert_eq!(event_id, 2);
                assert_eq!(category, "post");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn apply_event_is_all_or_nothing() {
        let mut state = Snapshot::new();
        let bad = event(1, json!({"a": {"k": 1}, "b": [1]}));
        assert!(state.apply_event(&bad).is_err());
        assert!(state.is_empty());
    }

    #[test]
    fn merge_right_side_wins_per_key() {
        let a = snap(json!({"post": {"title": "A", "body": "x"}, "user": {"name": "X"}}));
        let b = snap(json!({"post": {"title": "B"}, "tag": {"t": 1}}));
        assert_eq!(
            merge(&a, &b),
            snap(json!({
                "post": {"title": "B", "body": "x"},
                "user": {"name": "X"},
                "tag": {"t": 1}
            }))
        );
    }

    #[test]
    fn merge_replaces_nested_values_wholesale() {
        let a = snap(json!({"post": {"meta": {"a": 1, "b": 2}}}));
        let b = snap(json!({"post": {"meta": {"c": 3}}}));
        assert_eq!(merge(&a, &b).get("post", "meta"), Some(&json!({"c": 3})));
    }

    #[test]
    fn serialization_is_canonical() {
        let a = snap(json!({"b": {"y": 1, "x": 2}, "a": {"k": true}}));
        let b = snap(json!({"a": {"k": true}, "b": {"x": 2, "y": 1}}));
        assert_eq!(
            serde_json::to_string(&a).expect("a"),
            serde_json::to_string(&b).expect("b")
        );
        assert_eq!(a.to_value(), json!({"a": {"k": true}, "b": {"x": 2, "y": 1}}));
    }
}
