#![no_main]

use libfuzzer_sys::fuzz_target;
use snaplog_core::Event;
use snaplog_core::snap::{Snapshot, fold, merge};

fuzz_target!(|data: &[u8]| {
    let Ok(events) = serde_json::from_slice::<Vec<Event>>(data) else {
        return;
    };
    let Ok(whole) = fold(&Snapshot::new(), &events) else {
        return;
    };

    let mut sorted = events.clone();
    sorted.sort_by_key(|e| e.id);
    sorted.dedup_by_key(|e| e.id);
    if sorted.len() != events.len() {
        return;
    }
    let mid = sorted.len() / 2;
    let prefix = fold(&Snapshot::new(), &sorted[..mid]).expect("prefix folds");
    let resumed = fold(&prefix, &sorted[mid..]).expect("suffix folds");
    assert_eq!(resumed, whole);

    let fresh = fold(&Snapshot::new(), &sorted[mid..]).expect("suffix folds");
    assert_eq!(merge(&prefix, &fresh), whole);
});
