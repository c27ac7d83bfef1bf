//! Row graphs assembled from relational stores, with duplicate resolution,
//! foreign-key repair and identifier remapping for merges.
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod config;
pub mod constraints;
pub mod errors;
pub mod expr;
pub mod graph;
pub mod id_gaps;
pub mod interchange;
pub mod merge;
pub mod pool;
pub mod rank;
pub mod relationship;
pub mod remap;
pub mod row;
pub mod schema;
pub mod store;
pub mod value;

pub use crate::config::{CommandLineConfig, EngineConfig};
pub use crate::constraints::{AllowedErrors, ConstraintReport, ConstraintResolver, Violations};
pub use crate::errors::RowGraphError;
pub use crate::graph::{AssemblyReport, GraphWalk, LinkedRow, RowGraph, Vertex};
pub use crate::id_gaps::{Gap, IdGapsLedger};
pub use crate::interchange::{GraphDocument, SchemaDocument};
pub use crate::merge::{MergeStatistics, Merger, RollbackSummary, UndoEntry};
pub use crate::rank::RankTable;
pub use crate::relationship::{Multiplicity, Relationship};
pub use crate::remap::{RemapEntry, RemapLedger};
pub use crate::row::{Row, RowId};
pub use crate::schema::{Column, NaPolicy, Schema, Table};
#[cfg(feature = "sqlite-store")]
pub use crate::store::SqliteStore;
pub use crate::store::{MemoryStore, StoreAccess};
pub use crate::value::{ColumnValue, ValueType};
