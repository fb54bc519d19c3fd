use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use smilefit_core::{FeatureSchema, FeatureVector};
use smilefit_store::{MemoryStore, ResultStore, RoundRecord, SqliteStore};
use uuid::Uuid;

/// Round numbers (with resubmissions) plus the order they are appended in.
fn submissions() -> impl Strategy<Value = (Vec<u32>, Vec<usize>)> {
    prop::collection::vec(1u32..=10, 1..24).prop_flat_map(|rounds| {
        let order: Vec<usize> = (0..rounds.len()).collect();
        (Just(rounds), Just(order).prop_shuffle())
    })
}

/// Record `i` is captured `i` seconds after a fixed start.
fn records(rounds: &[u32]) -> Vec<RoundRecord> {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    let features = FeatureVector::zeros(&FeatureSchema::default_au());
    rounds
        .iter()
        .enumerate()
        .map(|(i, &round)| {
            let mut rec = RoundRecord::new("shuffled", "emma", round, 5.0, features.clone());
            rec.created_at = start + Duration::seconds(i as i64);
            rec
        })
        .collect()
}

fn check_sorted(store: &dyn ResultStore, rounds: &[u32], order: &[usize]) -> Result<(), TestCaseError> {
    let recs = records(rounds);
    for &i in order {
        store.append(recs[i].clone()).unwrap();
    }

    let mut expected: Vec<(u32, usize)> = rounds.iter().copied().zip(0..).collect();
    expected.sort();
    let expected: Vec<Uuid> = expected.into_iter().map(|(_, i)| recs[i].id).collect();

    let listed: Vec<Uuid> = store.list("shuffled").unwrap().iter().map(|r| r.id).collect();
    prop_assert_eq!(listed, expected);
    Ok(())
}

#[test]
fn memory_list_is_sorted_regardless_of_append_order() {
    proptest!(|((rounds, order) in submissions())| {
        check_sorted(&MemoryStore::new(), &rounds, &order)?;
    });
}

#[test]
fn sqlite_list_is_sorted_regardless_of_append_order() {
    proptest!(ProptestConfig::with_cases(64), |((rounds, order) in submissions())| {
        check_sorted(&SqliteStore::open_in_memory().unwrap(), &rounds, &order)?;
    });
}
