use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rowgraph::{
    Column, ColumnValue, EngineConfig, MemoryStore, Row, RowGraph, Schema, ValueType,
};

const SEED: u64 = 0x5EED;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);
const LDDATE: i64 = 1_700_000_000;

fn bench_scales() -> &'static [usize] {
    #[cfg(feature = "bench-ci")]
    {
        &[50, 200]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[200, 1_000]
    }
}

fn schema(lump_chunk_size: usize) -> Schema {
    let config = EngineConfig {
        lump_chunk_size,
        ..EngineConfig::default()
    };
    let mut schema = Schema::new("bench", config);
    schema
        .define_table(
            "origin",
            "origin",
            vec![
                Column::new("orid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("OWNEDID!"),
                Column::new("time", ValueType::Float).unique_key(),
                Column::new("lddate", ValueType::Date),
            ],
        )
        .expect("origin");
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
                Column::new("lddate", ValueType::Date),
            ],
        )
        .expect("assoc");
    schema
        .define_table(
            "arrival",
            "arrival",
            vec![
                Column::new("arid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("OWNEDID!"),
                Column::new("sta", ValueType::Text).unique_key(),
                Column::new("lddate", ValueType::Date),
            ],
        )
        .expect("arrival");
    schema
        .define_relationship("origin_assoc", "origin", "assoc", "WHERE orid = #orid#", "0..N")
        .expect("origin_assoc");
    schema
        .define_relationship("assoc_arrival", "assoc", "arrival", "WHERE arid = #arid#", "1")
        .expect("assoc_arrival");
    schema
}

/// `origins` origins, each associated with a handful of arrivals drawn from a
/// shared pool.
fn populate(schema: &Schema, origins: usize) -> (MemoryStore, Vec<Row>) {
    let mut rng = StdRng::seed_from_u64(SEED + origins as u64);
    let store = MemoryStore::new(&format!("bench-{origins}"));
    let origin_table = schema.table("origin").expect("origin");
    let assoc_table = schema.table("assoc").expect("assoc");
    let arrival_table = schema.table("arrival").expect("arrival");
    let arrivals = (origins * 2) as i64;
    for arid in 0..arrivals {
        store.insert(
            Row::new(
                arrival_table.clone(),
                vec![
                    arid.into(),
                    format!("STA{arid}").as_str().into(),
                    ColumnValue::Date(LDDATE),
                ],
            )
            .expect("arrival row"),
        );
    }
    let mut seeds = Vec::with_capacity(origins);
    for orid in 0..origins as i64 {
        let row = Row::new(
            origin_table.clone(),
            vec![orid.into(), (orid as f64).into(), ColumnValue::Date(LDDATE)],
        )
        .expect("origin row");
        store.insert(row.clone());
        seeds.push(row);
        let mut picked = std::collections::BTreeSet::new();
        for _ in 0..rng.gen_range(1..=6) {
            picked.insert(rng.gen_range(0..arrivals));
        }
        for arid in picked {
            store.insert(
                Row::new(
                    assoc_table.clone(),
                    vec![arid.into(), orid.into(), ColumnValue::Date(LDDATE)],
                )
                .expect("assoc row"),
            );
        }
    }
    (store, seeds)
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &origins in bench_scales() {
        for (label, chunk) in [("lumped", 1_000), ("per_row", 1)] {
            let schema = schema(chunk);
            let (store, seeds) = populate(&schema, origins);
            group.bench_with_input(BenchmarkId::new(label, origins), &origins, |b, _| {
                b.iter(|| {
                    let mut graph = RowGraph::new();
                    graph
                        .assemble(&schema, &store, seeds.clone())
                        .expect("assemble");
                    graph
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_assembly);
criterion_main!(benches);
