mod common;

use common::{css_schema, event, loaded_store};
use rowgraph::{
    EngineConfig, GraphDocument, IdGapsLedger, RemapLedger, RowGraph, RowGraphError, RowId,
    SchemaDocument,
    interchange::{GapLedgerDocument, RelationshipDocument, RemapDocument},
};

fn assembled(schema: &rowgraph::Schema) -> RowGraph {
    let store = loaded_store(schema);
    let mut graph = RowGraph::new();
    graph
        .assemble(schema, &store, vec![event(schema, 1, "quake")])
        .unwrap();
    graph
}

#[test]
fn test_graph_document_round_trip() {
    let schema = css_schema();
    let graph = assembled(&schema);
    let json = GraphDocument::from_graph(&graph).to_json().unwrap();
    assert!(json.contains("\"row_id\""));

    let rebuilt = GraphDocument::from_json(&json)
        .unwrap()
        .into_graph(&schema)
        .unwrap();
    assert_eq!(rebuilt.len(), graph.len());
    assert_eq!(rebuilt.edge_count(), graph.edge_count());
    for row in graph.rows() {
        let id = row.id();
        assert!(rebuilt.contains(id));
        assert_eq!(rebuilt.children(id).len(), graph.children(id).len());
    }
}

#[test]
fn test_graph_document_rejects_unknown_reference() {
    let schema = css_schema();
    let graph = assembled(&schema);
    let mut doc = GraphDocument::from_graph(&graph);
    doc.rows.retain(|r| r.table_type != "ORIGIN");
    let err = doc.into_graph(&schema).unwrap_err();
    assert!(matches!(err, RowGraphError::ReassemblyError(_)));
}

#[test]
fn test_graph_document_rejects_foreign_schema_and_bad_ids() {
    let schema = css_schema();
    let mut doc = GraphDocument::from_graph(&assembled(&schema));
    doc.rows[0].schema = "elsewhere".into();
    assert!(matches!(
        doc.into_graph(&schema),
        Err(RowGraphError::InterchangeError(_))
    ));
    assert!(GraphDocument::from_json("{\"rows\": [{\"row_id\": \"zz\"}]}").is_err());
    assert!(RowId::from_hex("abc").is_err());
}

#[test]
fn test_schema_document_round_trip() {
    let schema = css_schema();
    let json = SchemaDocument::from_schema(&schema).to_json().unwrap();
    let rebuilt = SchemaDocument::from_json(&json)
        .unwrap()
        .into_schema(EngineConfig::default())
        .unwrap();
    assert_eq!(rebuilt.name(), "CSS");
    assert_eq!(rebuilt.tables().len(), 4);
    assert_eq!(rebuilt.relationships().len(), 3);
    let origin = rebuilt.table("origin").unwrap();
    assert_eq!(origin.owned_id(), Some("ORID"));
    assert_eq!(origin.unique_keys().len(), 3);
    assert_eq!(origin.column(2).unwrap().tolerance_value(), 0.001);
    assert!(rebuilt.relationship("origin_assoc").unwrap().is_lumpable());
    assert_eq!(rebuilt.owner_of("evid").unwrap().table_type(), "EVENT");
}

#[test]
fn test_schema_document_from_hand_written_json() {
    let json = r#"{
        "name": "demo",
        "tables": [
            {"table_type": "event", "columns": [
                {"name": "evid", "value_type": "integer", "foreign_key": "OWNEDID!"},
                {"name": "lddate", "value_type": "date"}
            ]},
            {"table_type": "origin", "name": "origin_2024", "columns": [
                {"name": "orid", "value_type": "int", "foreign_key": "ownedid!"},
                {"name": "evid", "value_type": "integer", "foreign_key": "evid", "na": "-1"}
            ]}
        ],
        "relationships": [
            {"id": "eo", "source_type": "event", "target_type": "origin",
             "where_clause": "WHERE evid = #evid#"}
        ]
    }"#;
    let schema = SchemaDocument::from_json(json)
        .unwrap()
        .into_schema(EngineConfig::default())
        .unwrap();
    let origin = schema.table("ORIGIN").unwrap();
    assert_eq!(origin.name(), "ORIGIN_2024");
    assert!(origin.column(1).unwrap().na_allowed());
    assert_eq!(
        schema.relationship("eo").unwrap().multiplicity(),
        rowgraph::Multiplicity::Any
    );

    let bad = json.replace("\"date\"", "\"blob\"");
    let err = SchemaDocument::from_json(&bad)
        .unwrap()
        .into_schema(EngineConfig::default())
        .unwrap_err();
    assert!(matches!(err, RowGraphError::SchemaError(_)));
}

#[test]
fn test_relationship_document_keeps_preconditions() {
    let schema = css_schema();
    let doc = RelationshipDocument {
        id: "p_only".into(),
        source_type: "assoc".into(),
        target_type: "arrival".into(),
        where_clause: "WHERE '#phase#'='P' AND arid = #arid#".into(),
        constraint: "0..1".into(),
    };
    let rel = doc.clone().into_relationship(&schema).unwrap();
    assert_eq!(rel.preconditions().len(), 1);
    let back = RelationshipDocument::from_relationship(&rel);
    assert_eq!(back.where_clause, doc.where_clause);
    assert_eq!(back.constraint, "0..1");
    assert_eq!(back.source_type, "ASSOC");
}

#[test]
fn test_gap_ledger_document_round_trip() {
    let config = EngineConfig::default();
    let ledger = IdGapsLedger::new(&config);
    ledger.add_gap("arid", 1, 10, 20).unwrap();
    ledger.add_gap("orid", 2, 1, 5).unwrap();
    ledger.next_id("ARID").unwrap();
    ledger.return_unused_values([("ORID", vec![3, 1])]);

    let json = GapLedgerDocument::from_ledger(&ledger).to_json().unwrap();
    let restored = GapLedgerDocument::from_json(&json)
        .unwrap()
        .into_ledger(&config)
        .unwrap();
    assert_eq!(restored.gap("ARID").unwrap().next, 11);
    assert_eq!(restored.gap("ORID").unwrap().gap_id, 2);
    assert_eq!(restored.next_id("ORID").unwrap(), Some(3));
    assert_eq!(restored.next_id("ORID").unwrap(), Some(1));
    assert_eq!(restored.next_id("ORID").unwrap(), Some(1));
}

#[test]
fn test_remap_document_round_trip() {
    let config = EngineConfig::default();
    let ledger = RemapLedger::new(&config);
    ledger.add_current_id("idc", "arid", 5, 105).unwrap();
    ledger.add_current_id("self", "orid", 1, 2).unwrap();
    let json = RemapDocument::from_ledger(&ledger).to_json().unwrap();
    let restored = RemapDocument::from_json(&json)
        .unwrap()
        .into_ledger(&config)
        .unwrap();
    assert_eq!(restored.entries(), ledger.entries());
    assert_eq!(restored.get_current_id("IDC", "ARID", 5), Some(105));
}
