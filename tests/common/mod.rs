#![allow(dead_code)]

use std::sync::Arc;

use rowgraph::{
    Column, ColumnValue, EngineConfig, MemoryStore, Row, Schema, Table, ValueType,
};

pub const LDDATE: i64 = 1_700_000_000;

/// EVENT owns EVID, ORIGIN owns ORID and refers to EVID, ARRIVAL owns ARID,
/// ASSOC joins ARRIVAL to ORIGIN.
pub fn css_schema() -> Schema {
    css_schema_with(EngineConfig::default())
}

pub fn css_schema_with(config: EngineConfig) -> Schema {
    let mut schema = Schema::new("css", config);
    schema
        .define_table(
            "event",
            "event",
            vec![
                Column::new("evid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("OWNEDID!"),
                Column::new("evname", ValueType::Text),
                Column::new("lddate", ValueType::Date),
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
                Column::new("evid", ValueType::Integer).foreign_key("evid"),
                Column::new("lat", ValueType::Float)
                    .unique_key()
                    .tolerance(0.001),
                Column::new("lon", ValueType::Float)
                    .unique_key()
                    .tolerance(0.001),
                Column::new("time", ValueType::Float).unique_key(),
                Column::new("lddate", ValueType::Date),
            ],
        )
        .unwrap();
    schema
        .define_table(
            "arrival",
            "arrival",
            vec![
                Column::new("arid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("OWNEDID!"),
                Column::new("sta", ValueType::Text).unique_key(),
                Column::new("time", ValueType::Float).unique_key(),
                Column::new("iphase", ValueType::Text),
                Column::new("lddate", ValueType::Date),
            ],
        )
        .unwrap();
    schema
        .define_table(
            "assoc",
            "assoc",
            vec![
                Column::new("arid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("arid"),
                Column::new("orid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("orid"),
                Column::new("phase", ValueType::Text),
                Column::new("lddate", ValueType::Date),
            ],
        )
        .unwrap();
    schema
        .define_relationship("event_origin", "event", "origin", "WHERE evid = #evid#", "0..N")
        .unwrap();
    schema
        .define_relationship("origin_assoc", "origin", "assoc", "WHERE orid = #orid#", "0..N")
        .unwrap();
    schema
        .define_relationship("assoc_arrival", "assoc", "arrival", "WHERE arid = #arid#", "1")
        .unwrap();
    schema
}

pub fn table(schema: &Schema, table_type: &str) -> Arc<Table> {
    schema.table(table_type).unwrap()
}

pub fn event(schema: &Schema, evid: i64, name: &str) -> Row {
    Row::new(
        table(schema, "event"),
        vec![evid.into(), name.into(), ColumnValue::Date(LDDATE)],
    )
    .unwrap()
}

pub fn origin(schema: &Schema, orid: i64, evid: i64, lat: f64, lon: f64, time: f64) -> Row {
    Row::new(
        table(schema, "origin"),
        vec![
            orid.into(),
            evid.into(),
            lat.into(),
            lon.into(),
            time.into(),
            ColumnValue::Date(LDDATE),
        ],
    )
    .unwrap()
}

pub fn arrival(schema: &Schema, arid: i64, sta: &str, time: f64, iphase: &str) -> Row {
    Row::new(
        table(schema, "arrival"),
        vec![
            arid.into(),
            sta.into(),
            time.into(),
            iphase.into(),
            ColumnValue::Date(LDDATE),
        ],
    )
    .unwrap()
}

pub fn assoc(schema: &Schema, arid: i64, orid: i64, phase: &str) -> Row {
    Row::new(
        table(schema, "assoc"),
        vec![arid.into(), orid.into(), phase.into(), ColumnValue::Date(LDDATE)],
    )
    .unwrap()
}

/// One event with two origins; each origin associates two arrivals, and
/// arrival 100 is shared by both origins.
pub fn loaded_store(schema: &Schema) -> MemoryStore {
    let store = MemoryStore::new("css");
    store.insert_all([
        event(schema, 1, "quake"),
        origin(schema, 10, 1, 35.0, -106.0, 1000.0),
        origin(schema, 11, 1, 35.1, -106.1, 1001.0),
        assoc(schema, 100, 10, "P"),
        assoc(schema, 101, 10, "S"),
        assoc(schema, 100, 11, "P"),
        assoc(schema, 102, 11, "S"),
        arrival(schema, 100, "ANMO", 1010.0, "P"),
        arrival(schema, 101, "ANMO", 1020.0, "S"),
        arrival(schema, 102, "TUC", 1030.0, "S"),
    ]);
    store
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}
