mod common;

use common::{arrival, css_schema, event, loaded_store, origin};
use rowgraph::{
    Column, ColumnValue, EngineConfig, IdGapsLedger, MemoryStore, MergeStatistics, Merger,
    RemapLedger, RollbackSummary, Row, RowGraph, RowGraphError, Schema, ValueType,
};

fn source_graph(schema: &Schema) -> RowGraph {
    let store = loaded_store(schema);
    let mut graph = RowGraph::new();
    graph
        .assemble(schema, &store, vec![event(schema, 1, "quake")])
        .unwrap();
    graph
}

fn target_store(schema: &Schema) -> MemoryStore {
    let target = MemoryStore::new("target");
    target.insert_all([
        event(schema, 40, "old"),
        origin(schema, 900, 40, 35.1, -106.1, 1001.0),
        arrival(schema, 500, "ANMO", 1010.0, "P"),
    ]);
    target
}

fn ids_of(graph: &RowGraph, table_type: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = graph
        .rows_of_type(table_type)
        .iter()
        .filter_map(|r| r.owned_id_value())
        .collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_merge_matches_allocates_and_rewrites() {
    common::init_tracing();
    let schema = css_schema();
    let mut graph = source_graph(&schema);
    let target = target_store(&schema);
    let gaps = IdGapsLedger::generate(&schema, &target).unwrap();
    let remap = RemapLedger::new(schema.config());

    let mut merger = Merger::new(&schema, &target, &gaps, &remap, "idc");
    let stats = merger.merge(&mut graph).unwrap();
    assert_eq!(
        stats,
        MergeStatistics {
            matched: 2,
            fixed: 0,
            allocated: 4,
            rewritten: 16,
            unresolved: 0,
        }
    );
    assert_eq!(ids_of(&graph, "event"), vec![41]);
    assert_eq!(ids_of(&graph, "origin"), vec![900, 901]);
    assert_eq!(ids_of(&graph, "arrival"), vec![500, 501, 502]);
    assert_eq!(remap.get_current_id("IDC", "ARID", 100), Some(500));
    assert_eq!(remap.get_current_id("IDC", "ORID", 11), Some(900));
    assert_eq!(remap.get_current_id("IDC", "EVID", 1), Some(41));

    for row in graph.rows_of_type("assoc") {
        let arid = row.value_of("arid").and_then(ColumnValue::as_i64).unwrap();
        let orid = row.value_of("orid").and_then(ColumnValue::as_i64).unwrap();
        assert!(arid >= 500);
        assert!(orid >= 900);
    }
    for row in graph.rows_of_type("origin") {
        assert_eq!(row.value_of("evid"), Some(&ColumnValue::Integer(41)));
    }
    assert_eq!(graph.len(), 10);
    assert_eq!(graph.edge_count(), 10);
}

#[test]
fn test_rollback_returns_allocated_ids() {
    let schema = css_schema();
    let mut graph = source_graph(&schema);
    let target = target_store(&schema);
    let gaps = IdGapsLedger::generate(&schema, &target).unwrap();
    let remap = RemapLedger::new(schema.config());

    let mut merger = Merger::new(&schema, &target, &gaps, &remap, "idc");
    merger.merge(&mut graph).unwrap();
    assert_eq!(merger.allocated().get("ARID"), Some(&vec![501, 502]));
    assert_eq!(merger.undo_log().len(), 16);
    assert_eq!(
        merger.rollback(&mut graph).unwrap(),
        RollbackSummary {
            returned: 4,
            restored: 10,
        }
    );
    assert!(merger.allocated().is_empty());
    assert_eq!(merger.undo_log().len(), 6);

    assert_eq!(gaps.returned("EVID"), vec![41]);
    assert_eq!(gaps.next_id("ORID").unwrap(), Some(901));
    assert_eq!(remap.get_current_id("IDC", "EVID", 1), None);
    assert_eq!(remap.get_current_id("IDC", "ARID", 100), Some(500));
    assert_eq!(remap.len(), 2);
}

#[test]
fn test_rollback_restores_rewritten_foreign_keys() {
    let schema = css_schema();
    let mut graph = source_graph(&schema);
    let target = target_store(&schema);
    let gaps = IdGapsLedger::generate(&schema, &target).unwrap();
    let remap = RemapLedger::new(schema.config());

    let mut merger = Merger::new(&schema, &target, &gaps, &remap, "idc");
    merger.merge(&mut graph).unwrap();
    merger.rollback(&mut graph).unwrap();

    assert_eq!(ids_of(&graph, "event"), vec![1]);
    assert_eq!(ids_of(&graph, "origin"), vec![10, 900]);
    assert_eq!(ids_of(&graph, "arrival"), vec![101, 102, 500]);
    for row in graph.rows_of_type("origin") {
        assert_eq!(row.value_of("evid"), Some(&ColumnValue::Integer(1)));
    }
    let mut pairs: Vec<(i64, i64)> = graph
        .rows_of_type("assoc")
        .iter()
        .map(|row| {
            (
                row.value_of("arid").and_then(ColumnValue::as_i64).unwrap(),
                row.value_of("orid").and_then(ColumnValue::as_i64).unwrap(),
            )
        })
        .collect();
    pairs.sort_unstable();
    assert_eq!(pairs, vec![(101, 10), (102, 900), (500, 10), (500, 900)]);

    let again = merger.rollback(&mut graph).unwrap();
    assert_eq!(again, RollbackSummary::default());
}

#[test]
fn test_ambiguous_target_match_is_fatal() {
    let schema = css_schema();
    let mut graph = RowGraph::new();
    graph.add(arrival(&schema, 1, "ANMO", 1010.0, "P"));
    let target = MemoryStore::new("target");
    target.insert(arrival(&schema, 7, "ANMO", 1010.0, "P"));
    target.insert(arrival(&schema, 8, "ANMO", 1010.0, "S"));
    let gaps = IdGapsLedger::generate(&schema, &target).unwrap();
    let remap = RemapLedger::new(schema.config());
    let err = Merger::new(&schema, &target, &gaps, &remap, "idc")
        .merge(&mut graph)
        .unwrap_err();
    assert!(matches!(err, RowGraphError::InvalidInput(_)));
}

#[test]
fn test_fixed_owned_id_is_kept_and_missing_gap_is_unresolved() {
    let mut schema = Schema::new("fixed", EngineConfig::default());
    schema
        .define_table(
            "event",
            "event",
            vec![
                Column::new("evid", ValueType::Integer)
                    .foreign_key("OWNEDID!")
                    .fixed(),
            ],
        )
        .unwrap();
    schema
        .define_table(
            "origin",
            "origin",
            vec![
                Column::new("orid", ValueType::Integer).foreign_key("OWNEDID!"),
                Column::new("evid", ValueType::Integer).foreign_key("evid"),
            ],
        )
        .unwrap();
    let mut graph = RowGraph::new();
    graph.add(Row::new(schema.table("event").unwrap(), vec![3.into()]).unwrap());
    graph.add(Row::new(schema.table("origin").unwrap(), vec![4.into(), 3.into()]).unwrap());

    let target = MemoryStore::new("target");
    let gaps = IdGapsLedger::new(schema.config());
    let remap = RemapLedger::new(schema.config());
    let stats = Merger::new(&schema, &target, &gaps, &remap, "idc")
        .merge(&mut graph)
        .unwrap();
    assert_eq!(stats.fixed, 1);
    assert_eq!(stats.unresolved, 1);
    assert_eq!(stats.rewritten, 0);
    assert_eq!(remap.get_current_id("idc", "evid", 3), Some(3));
    assert_eq!(remap.get_current_id("idc", "orid", 4), None);
}
