use proptest::prelude::*;
use snaplog_core::archive::PageName;
use snaplog_core::snap::{Snapshot, fold, merge};

use generators::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    #[test]
    fn fold_splits_at_any_point(events in arb_events(24), split in 0usize..24) {
        let k = split.min(events.len());
        let whole = fold(&Snapshot::new(), &events).unwrap();
        let prefix = fold(&Snapshot::new(), &events[..k]).unwrap();
        let resumed = fold(&prefix, &events[k..]).unwrap();
        prop_assert_eq!(resumed, whole);
    }

    #[test]
    fn fold_is_deterministic(base in arb_snapshot(), events in arb_events(16)) {
        let a = fold(&base, &events).unwrap();
        let b = fold(&base, &events).unwrap();
        prop_assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn fold_ignores_input_order(events in arb_events(16)) {
        let mut reversed = events.clone();
        reversed.reverse();
        prop_assert_eq!(
            fold(&Snapshot::new(), &reversed).unwrap(),
            fold(&Snapshot::new(), &events).unwrap()
        );
    }

    #[test]
    fn merge_with_disjoint_keys_loses_nothing(a in arb_snapshot(), b in arb_snapshot()) {
        // keep only keys of `b` that `a` does not have
        let b: Snapshot = b
            .categories()
            .map(|(category, entries)| {
                let kept = entries
                    .iter()
                    .filter(|(key, _)| a.get(category, key).is_none())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (category.to_string(), kept)
            })
            .collect();

        let merged = merge(&a, &b);
        for (category, entries) in a.categories().chain(b.categories()) {
            for (key, value) in entries {
                prop_assert_eq!(merged.get(category, key), Some(value));
            }
        }
    }

    #[test]
    fn merge_is_idempotent_on_the_left(a in arb_snapshot(), b in arb_snapshot()) {
        let once = merge(&a, &b);
        prop_assert_eq!(merge(&a, &once), once);
    }

    #[test]
    fn merge_then_fold_equals_fold_from_base(base in arb_snapshot(), events in arb_events(16)) {
        let fresh = fold(&Snapshot::new(), &events).unwrap();
        prop_assert_eq!(merge(&base, &fresh), fold(&base, &events).unwrap());
    }

    #[test]
    fn page_name_round_trips(name in arb_page_name()) {
        let text = name.to_string();
        let parsed: PageName = text.parse().unwrap();
        prop_assert_eq!(parsed, name);
        prop_assert_eq!(parsed.to_string(), text);
        prop_assert_eq!(PageName::from_archive_path(&name.archive_path()).unwrap(), name);
    }
}
