use std::{fs, process};

use rowgraph::{
    CommandLineConfig, EngineConfig, GraphDocument, RemapLedger, RowGraph, RowGraphError, Schema,
    SchemaDocument, SqliteStore,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", CommandLineConfig::help());
        return;
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let config = match CommandLineConfig::from_args(&arg_refs) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    let (schema, store) = match open(&config) {
        Ok(opened) => opened,
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    };

    match run_command(&schema, &store, &config) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("command failed: {err}");
            process::exit(1);
        }
    }
}

fn open(config: &CommandLineConfig) -> Result<(Schema, SqliteStore), String> {
    let engine = match &config.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
            EngineConfig::from_json_str(&text).map_err(|e| e.to_string())?
        }
        None => EngineConfig::default(),
    };
    let schema_path = config
        .schema
        .as_deref()
        .ok_or_else(|| "error: --schema is required".to_string())?;
    let text = fs::read_to_string(schema_path).map_err(|e| format!("{schema_path}: {e}"))?;
    let schema = SchemaDocument::from_json(&text)
        .and_then(|doc| doc.into_schema(engine))
        .map_err(|e| e.to_string())?;
    let store = if config.database == "memory" {
        SqliteStore::open_in_memory()
    } else {
        SqliteStore::open(&config.database)
    }
    .map_err(|e| e.to_string())?;
    for seed in &config.seeds {
        CommandLineConfig::parse_seed(seed).map_err(|e| format!("error: {e}"))?;
    }
    Ok((schema, store))
}

fn assemble(
    schema: &Schema,
    store: &SqliteStore,
    config: &CommandLineConfig,
) -> Result<RowGraph, RowGraphError> {
    let mut graph = RowGraph::new();
    for seed in &config.seeds {
        let (table_type, clause) =
            CommandLineConfig::parse_seed(seed).map_err(RowGraphError::invalid_input)?;
        let clause = if clause.is_empty() || clause.to_ascii_lowercase().starts_with("where") {
            clause
        } else {
            format!("WHERE {clause}")
        };
        graph.assemble_from_query(schema, store, &table_type, &clause)?;
    }
    Ok(graph)
}

/// Returns false when the command ran but found the graph invalid.
fn run_command(
    schema: &Schema,
    store: &SqliteStore,
    config: &CommandLineConfig,
) -> Result<bool, RowGraphError> {
    let mut graph = assemble(schema, store, config)?;
    match config.command.as_str() {
        "status" => {
            print_inventory(&graph);
            Ok(true)
        }
        "check" => {
            let remap = RemapLedger::new(schema.config());
            let report = graph.check_constraints(schema, &remap)?;
            println!(
                "valid={} rows={} violations={}",
                report.is_valid(),
                graph.len(),
                report.counts_summary()
            );
            if !remap.is_empty() {
                print!("{remap}");
            }
            Ok(report.is_valid())
        }
        "export" => {
            println!("{}", GraphDocument::from_graph(&graph).to_json()?);
            Ok(true)
        }
        other => {
            println!("unknown command {other}, defaulting to status");
            print_inventory(&graph);
            Ok(true)
        }
    }
}

fn print_inventory(graph: &RowGraph) {
    println!("rows={} edges={}", graph.len(), graph.edge_count());
    for (table_type, count) in graph.table_inventory() {
        println!("{table_type}={count}");
    }
}
