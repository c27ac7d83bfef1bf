use std::sync::Arc;

use rowgraph::{EngineConfig, RemapEntry, RemapLedger};

fn ledger() -> RemapLedger {
    RemapLedger::new(&EngineConfig::default())
}

#[test]
fn test_add_then_get_returns_current() {
    let remap = ledger();
    remap.add_current_id("idc", "arid", 5, 105).unwrap();
    assert_eq!(remap.get_current_id("IDC", "ARID", 5), Some(105));
    assert_eq!(remap.get_current_id("idc", "arid", 6), None);
    assert_eq!(remap.get_current_id("other", "arid", 5), None);
}

#[test]
fn test_last_write_wins() {
    let remap = ledger();
    remap.add_current_id("idc", "arid", 5, 105).unwrap();
    remap.add_current_id("idc", "arid", 5, 205).unwrap();
    assert_eq!(remap.get_current_id("idc", "arid", 5), Some(205));
    assert_eq!(remap.len(), 1);
}

#[test]
fn test_remove_entry_requires_exact_match() {
    let remap = ledger();
    remap.add_current_id("idc", "arid", 5, 105).unwrap();
    assert!(!remap.remove_entry("idc", "arid", 5, 999));
    assert!(!remap.remove_entry("idc", "orid", 5, 105));
    assert_eq!(remap.get_current_id("idc", "arid", 5), Some(105));
    assert!(remap.remove_entry("idc", "arid", 5, 105));
    assert!(remap.is_empty());
}

#[test]
fn test_drop_entries_and_clear() {
    let remap = ledger();
    remap.add_current_id("a", "arid", 1, 2).unwrap();
    remap.add_current_id("a", "orid", 1, 3).unwrap();
    remap.add_current_id("b", "arid", 1, 4).unwrap();
    assert!(remap.drop_entries("a", "arid"));
    assert!(!remap.drop_entries("a", "arid"));
    assert_eq!(remap.len(), 2);
    remap.clear();
    assert!(remap.is_empty());
}

#[test]
fn test_entries_are_ordered_and_display_padded() {
    let remap = ledger();
    remap.add_current_id("b", "orid", 2, 20).unwrap();
    remap.add_current_id("a", "arid", 1, 10).unwrap();
    assert_eq!(
        remap.entries(),
        vec![
            RemapEntry {
                source: "A".into(),
                id_name: "ARID".into(),
                original: 1,
                current: 10,
            },
            RemapEntry {
                source: "B".into(),
                id_name: "ORID".into(),
                original: 2,
                current: 20,
            },
        ]
    );
    let text = remap.to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("SOURCE"));
    assert_eq!(lines[1].len(), lines[0].len());
}

#[test]
fn test_blank_keys_are_rejected() {
    let remap = ledger();
    assert!(remap.add_current_id("", "arid", 1, 2).is_err());
    assert!(remap.add_current_id("a", " ", 1, 2).is_err());
}

#[test]
fn test_case_is_kept_when_folding_is_off() {
    let config = EngineConfig {
        fold_case: false,
        ..EngineConfig::default()
    };
    let remap = RemapLedger::new(&config);
    remap.add_current_id("idc", "arid", 1, 2).unwrap();
    assert_eq!(remap.get_current_id("IDC", "ARID", 1), None);
    assert_eq!(remap.get_current_id("idc", "arid", 1), Some(2));
}

#[test]
fn test_concurrent_writers() {
    let remap = Arc::new(ledger());
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let remap = Arc::clone(&remap);
            std::thread::spawn(move || {
                for i in 0..100 {
                    remap.add_current_id("src", "arid", t * 100 + i, i).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(remap.len(), 400);
}
