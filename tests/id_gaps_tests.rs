mod common;

use std::sync::Arc;

use common::{arrival, css_schema, event, origin};
use rowgraph::{EngineConfig, IdGapsLedger, MemoryStore, RowGraphError, StoreAccess};

fn fresh_ledger() -> IdGapsLedger {
    let ledger = IdGapsLedger::new(&EngineConfig::default());
    ledger.add_gap("X", 1, 1, i64::MAX).unwrap();
    ledger
}

#[test]
fn test_allocation_is_increasing_and_unique() {
    let ledger = fresh_ledger();
    let values: Vec<i64> = (0..5).map(|_| ledger.next_id("x").unwrap().unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3, 4, 5]);
    assert_eq!(ledger.gap("X").unwrap().next, 6);
}

#[test]
fn test_returned_values_come_back_in_submission_order() {
    let ledger = fresh_ledger();
    for _ in 0..5 {
        ledger.next_id("X").unwrap();
    }
    ledger.return_unused_values([("X", vec![4, 2])]);
    ledger.return_unused_values([("x", vec![5])]);
    assert_eq!(ledger.returned("X"), vec![4, 2, 5]);
    assert_eq!(ledger.next_id("X").unwrap(), Some(4));
    assert_eq!(ledger.next_id("X").unwrap(), Some(2));
    assert_eq!(ledger.next_id("X").unwrap(), Some(5));
    assert_eq!(ledger.next_id("X").unwrap(), Some(6));
}

#[test]
fn test_exhausted_gap_yields_none() {
    let ledger = IdGapsLedger::new(&EngineConfig::default());
    ledger.add_gap("ARID", 1, 10, 11).unwrap();
    assert_eq!(ledger.next_id("ARID").unwrap(), Some(10));
    assert_eq!(ledger.next_id("ARID").unwrap(), Some(11));
    assert_eq!(ledger.next_id("ARID").unwrap(), None);
    assert!(ledger.gap("ARID").unwrap().is_exhausted());
    assert_eq!(ledger.next_id("UNKNOWN").unwrap(), None);
    assert_eq!(ledger.next_id("  ").unwrap(), None);
}

#[test]
fn test_gap_at_i64_max_does_not_overflow() {
    let ledger = IdGapsLedger::new(&EngineConfig::default());
    ledger.add_gap("X", 1, i64::MAX, i64::MAX).unwrap();
    assert_eq!(ledger.next_id("X").unwrap(), Some(i64::MAX));
    assert_eq!(ledger.next_id("X").unwrap(), None);
}

#[test]
fn test_invalid_gap_is_rejected() {
    let ledger = IdGapsLedger::new(&EngineConfig::default());
    assert!(matches!(
        ledger.add_gap("X", 1, 10, 9),
        Err(RowGraphError::InvalidInput(_))
    ));
    assert!(ledger.add_gap("", 1, 1, 2).is_err());
}

#[test]
fn test_save_and_restore_roll_back_allocations() {
    let ledger = fresh_ledger();
    assert!(!ledger.restore_state());
    ledger.next_id("X").unwrap();
    ledger.save_state();
    ledger.next_id("X").unwrap();
    ledger.next_id("X").unwrap();
    ledger.return_unused_values([("X", vec![99])]);
    assert!(ledger.restore_state());
    assert_eq!(ledger.gap("X").unwrap().next, 2);
    assert!(ledger.returned("X").is_empty());
    assert_eq!(ledger.next_id("X").unwrap(), Some(2));
}

#[test]
fn test_generate_starts_after_store_maximum() {
    let schema = css_schema();
    let store = MemoryStore::new("gaps");
    store.insert_all([
        event(&schema, 41, "a"),
        event(&schema, 7, "b"),
        origin(&schema, 3, 41, 0.0, 0.0, 0.0),
        arrival(&schema, -5, "ANMO", 0.0, "P"),
    ]);
    let ledger = IdGapsLedger::generate(&schema, &store).unwrap();
    assert_eq!(ledger.gaps().len(), 3);
    assert_eq!(ledger.next_id("EVID").unwrap(), Some(42));
    assert_eq!(ledger.next_id("ORID").unwrap(), Some(4));
    assert_eq!(ledger.next_id("ARID").unwrap(), Some(1));
    assert_eq!(ledger.gap("EVID").unwrap().last, i64::MAX);
    assert!(ledger.to_string().contains("EVID"));
}

#[test]
fn test_sequence_backed_mode_bypasses_gaps() {
    let store = Arc::new(MemoryStore::new("seq"));
    store.create_sequence("evid_seq", 500);
    let shared: Arc<dyn StoreAccess> = store.clone();
    let ledger =
        IdGapsLedger::sequence_backed(&EngineConfig::default(), [("evid", "evid_seq")], shared);
    assert!(ledger.is_sequence_backed());
    assert_eq!(ledger.next_id("EVID").unwrap(), Some(500));
    assert_eq!(ledger.next_id("EVID").unwrap(), Some(501));
    ledger.return_unused_values([("EVID", vec![500])]);
    assert_eq!(ledger.next_id("EVID").unwrap(), Some(502));
    assert_eq!(ledger.next_id("ORID").unwrap(), None);
    assert!(ledger.gaps().is_empty());
}

#[test]
fn test_ledger_is_shareable_across_threads() {
    let ledger = Arc::new(fresh_ledger());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                (0..250)
                    .map(|_| ledger.next_id("X").unwrap().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut all: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 1000);
    assert_eq!(all.last(), Some(&1000));
}
