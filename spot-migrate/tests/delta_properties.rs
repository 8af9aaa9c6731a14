//! Property-based tests for the snapshot diff.
//!
//! Snapshots are generated from maps keyed by workload identity, so each
//! generated snapshot has unique identities unless a test duplicates one on
//! purpose. The expected delta is computed independently from those maps.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use spot_migrate::delta::DeltaEngine;
use spot_migrate::error::MigrationError;
use spot_migrate::record::{Record, Snapshot};

type Identity = (u8, u8, u8);
type Features = (i64, u32);

fn record(identity: Identity, features: Features) -> Record {
    let (instance, region, az) = identity;
    let (sps, cents) = features;
    Record {
        time: Utc.with_ymd_and_hms(2022, 9, 28, 16, 20, 0).unwrap(),
        instance_type: format!("i{instance}.large"),
        region: format!("region-{region}"),
        az: format!("az{az}"),
        sps,
        interruption_frequency: 3.0,
        spot_price: f64::from(cents) / 10_000.0,
        savings: 70.0,
        ondemand_price: 1.0,
        ceased: false,
    }
}

fn snapshot(entries: &BTreeMap<Identity, Features>) -> Snapshot {
    Snapshot::new(entries.iter().map(|(id, f)| record(*id, *f)).collect())
}

fn identity_of(record: &Record) -> String {
    format!("{}/{}/{}", record.instance_type, record.region, record.az)
}

fn identities() -> impl Strategy<Value = Identity> {
    (0u8..6, 0u8..3, 0u8..3)
}

fn features() -> impl Strategy<Value = Features> {
    (1i64..=3, 1u32..2000)
}

fn entries() -> impl Strategy<Value = BTreeMap<Identity, Features>> {
    prop::collection::btree_map(identities(), features(), 0..40)
}

proptest! {
    /// Diffing a snapshot with itself yields nothing.
    #[test]
    fn test_self_diff_is_empty(entries in entries()) {
        let s = snapshot(&entries);
        let delta = DeltaEngine::default().diff(&s, &s).unwrap();
        prop_assert!(delta.is_empty());
    }

    /// The delta matches a straightforward map comparison.
    ///
    /// Properties tested:
    /// - changed = identities new in C, or present in both with different features
    /// - removed = identities only in P, all flagged ceased
    /// - unchanged identities appear in neither output
    #[test]
    fn test_matches_map_model(previous in entries(), current in entries()) {
        let delta = DeltaEngine::default()
            .diff(&snapshot(&previous), &snapshot(&current))
            .unwrap();

        let expected_changed: BTreeSet<String> = current
            .iter()
            .filter(|(id, f)| previous.get(*id) != Some(*f))
            .map(|(id, f)| identity_of(&record(*id, *f)))
            .collect();
        let expected_removed: BTreeSet<String> = previous
            .iter()
            .filter(|(id, _)| !current.contains_key(*id))
            .map(|(id, f)| identity_of(&record(*id, *f)))
            .collect();

        let changed: BTreeSet<String> = delta.changed.iter().map(identity_of).collect();
        let removed: BTreeSet<String> = delta.removed.iter().map(identity_of).collect();

        prop_assert_eq!(changed.len(), delta.changed.len());
        prop_assert_eq!(changed, expected_changed);
        prop_assert_eq!(removed, expected_removed);
        prop_assert!(delta.removed.iter().all(|r| r.ceased && r.sps == 0 && r.spot_price == 0.0));
        prop_assert!(delta.changed.iter().all(|r| !r.ceased));
    }

    /// Disjoint identities: everything current is changed, everything
    /// previous is removed.
    #[test]
    fn test_disjoint_identities(previous in entries(), current in entries()) {
        let current: BTreeMap<Identity, Features> = current
            .into_iter()
            .map(|((i, r, a), f)| ((i + 100, r, a), f))
            .collect();
        let delta = DeltaEngine::default()
            .diff(&snapshot(&previous), &snapshot(&current))
            .unwrap();
        prop_assert_eq!(delta.changed.len(), current.len());
        prop_assert_eq!(delta.removed.len(), previous.len());
    }

    /// Changing the features of one identity yields exactly that record.
    #[test]
    fn test_feature_only_change(
        entries in prop::collection::btree_map(identities(), features(), 1..40),
        pick in any::<prop::sample::Index>(),
    ) {
        let (id, (sps, cents)) = entries
            .iter()
            .nth(pick.index(entries.len()))
            .map(|(id, f)| (*id, *f))
            .unwrap();
        let mut current = entries.clone();
        current.insert(id, (sps, cents + 1));

        let delta = DeltaEngine::default()
            .diff(&snapshot(&entries), &snapshot(&current))
            .unwrap();
        prop_assert!(delta.removed.is_empty());
        prop_assert_eq!(delta.changed.len(), 1);
        prop_assert_eq!(&delta.changed[0], &record(id, (sps, cents + 1)));
    }

    /// A duplicated identity on either side fails before any output.
    #[test]
    fn test_duplicate_identity_is_rejected(
        entries in prop::collection::btree_map(identities(), features(), 1..40),
        other in entries(),
        pick in any::<prop::sample::Index>(),
        duplicate_current in any::<bool>(),
    ) {
        let (id, (sps, cents)) = entries
            .iter()
            .nth(pick.index(entries.len()))
            .map(|(id, f)| (*id, *f))
            .unwrap();
        let mut records = snapshot(&entries).into_records();
        records.push(record(id, (sps, cents + 7)));
        let duplicated = Snapshot::new(records);

        let engine = DeltaEngine::default();
        let result = if duplicate_current {
            engine.diff(&snapshot(&other), &duplicated)
        } else {
            engine.diff(&duplicated, &snapshot(&other))
        };
        let is_collision = matches!(result, Err(MigrationError::WorkloadCollision { .. }));
        prop_assert!(is_collision);
    }
}

#[test]
fn test_reference_example() {
    let a = (0, 0, 0);
    let b = (1, 0, 0);
    let c = (2, 0, 0);
    let previous = snapshot(&BTreeMap::from([(a, (1, 10)), (b, (2, 20))]));
    let current = snapshot(&BTreeMap::from([(a, (9, 10)), (c, (3, 30))]));

    let delta = DeltaEngine::default().diff(&previous, &current).unwrap();
    assert_eq!(delta.changed, vec![record(a, (9, 10)), record(c, (3, 30))]);
    assert_eq!(delta.removed.len(), 1);
    assert_eq!(identity_of(&delta.removed[0]), "i1.large/region-0/az0");
    assert!(delta.removed[0].ceased);
}
