use rowgraph::{
    Column, EngineConfig, MemoryStore, RankTable, Row, RowGraphError, Schema, ValueType,
};

fn ranked_schema() -> Schema {
    let mut schema = Schema::new("rank", EngineConfig::default());
    schema
        .define_table(
            "authrank",
            "authrank",
            vec![
                Column::new("auth", ValueType::Text).primary_key(),
                Column::new("rank", ValueType::Integer),
            ],
        )
        .unwrap();
    schema
        .define_table(
            "origin",
            "origin",
            vec![
                Column::new("orid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("OWNEDID!"),
                Column::new("auth", ValueType::Text),
            ],
        )
        .unwrap();
    schema
}

fn rank_row(schema: &Schema, auth: &str, rank: i64) -> Row {
    Row::new(schema.table("authrank").unwrap(), vec![auth.into(), rank.into()]).unwrap()
}

fn origin(schema: &Schema, orid: i64, auth: &str) -> Row {
    Row::new(schema.table("origin").unwrap(), vec![orid.into(), auth.into()]).unwrap()
}

#[test]
fn test_rank_table_loads_in_priority_order() {
    let schema = ranked_schema();
    let store = MemoryStore::new("ranks");
    store.insert_all([
        rank_row(&schema, "idc", 20),
        rank_row(&schema, "neic", 5),
        rank_row(&schema, "isc", 10),
    ]);
    let ranks = RankTable::load(&store, &schema.table("authrank").unwrap(), "auth", "rank").unwrap();
    assert_eq!(ranks.name(), "AUTHRANK");
    assert_eq!(ranks.priority_list(), ["NEIC", "ISC", "IDC"]);
    assert_eq!(ranks.rank("isc"), 10);
    assert_eq!(ranks.rank("unknown"), i64::MAX);
}

#[test]
fn test_rank_table_picks_best_candidate() {
    let schema = ranked_schema();
    let ranks = RankTable::from_ranks("authrank", [("IDC", 20), ("NEIC", 5)]).unwrap();
    let rows = vec![
        origin(&schema, 1, "local"),
        origin(&schema, 2, "IDC"),
        origin(&schema, 3, "neic"),
        origin(&schema, 4, "NEIC"),
    ];
    let best = ranks.best(&rows, "auth").unwrap();
    assert_eq!(best.owned_id_value(), Some(3));

    let unranked = vec![origin(&schema, 8, "a"), origin(&schema, 9, "b")];
    assert_eq!(ranks.best(&unranked, "auth").unwrap().owned_id_value(), Some(8));
    assert!(ranks.best(&Vec::new(), "auth").is_none());
}

#[test]
fn test_rank_table_rejects_duplicate_items() {
    let err = RankTable::from_ranks("authrank", [("IDC", 1), ("idc", 2)]).unwrap_err();
    assert!(matches!(err, RowGraphError::InvalidInput(_)));
}
