//! Data-store access used by relationships, ledgers and the merge driver.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::{errors::RowGraphError, expr::Expr, row::Row, schema::Table};

#[cfg(feature = "sqlite-store")]
mod sqlite;

#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;

/// A source of rows addressed by table and where clause.
pub trait StoreAccess: Send + Sync {
    /// Identifies the underlying connection; bound where-clause buffers are pooled per key.
    fn connection_key(&self) -> String;
    fn select(&self, table: &Arc<Table>, where_clause: &str) -> Result<Vec<Row>, RowGraphError>;
    fn table_exists(&self, table_name: &str) -> Result<bool, RowGraphError>;
    /// Largest value of `id_name` in `table`, or `None` when the table is empty.
    fn max_id(&self, id_name: &str, table: &Table) -> Result<Option<i64>, RowGraphError>;
    fn next_sequence_value(&self, sequence: &str) -> Result<i64, RowGraphError>;
    fn execute_update(&self, statement: &str) -> Result<usize, RowGraphError>;
    fn commit(&self) -> Result<(), RowGraphError>;
}

/// In-memory store that evaluates where clauses with [`Expr`].
#[derive(Default)]
pub struct MemoryStore {
    key: String,
    tables: RwLock<AHashMap<String, Vec<Row>>>,
    sequences: Mutex<AHashMap<String, i64>>,
    failing: RwLock<BTreeSet<String>>,
    selects: AtomicUsize,
}

impl MemoryStore {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn insert(&self, row: Row) {
        self.tables
            .write()
            .entry(row.table().name().to_string())
            .or_default()
            .push(row);
    }

    pub fn insert_all(&self, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.write();
        for row in rows {
            tables
                .entry(row.table().name().to_string())
                .or_default()
                .push(row);
        }
    }

    /// Removes every stored row with the same id as `row`.
    pub fn remove(&self, row: &Row) -> usize {
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(row.table().name()) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|r| r.id() != row.id());
        before - rows.len()
    }

    pub fn rows(&self, table_name: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn create_sequence(&self, name: &str, next: i64) {
        self.sequences.lock().insert(name.to_string(), next);
    }

    /// Makes every select against `table_name` fail.
    pub fn fail_table(&self, table_name: &str) {
        self.failing.write().insert(table_name.to_string());
    }

    /// Number of selects issued so far.
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::Relaxed)
    }
}

impl StoreAccess for MemoryStore {
    fn connection_key(&self) -> String {
        format!("memory:{}", self.key)
    }

    fn select(&self, table: &Arc<Table>, where_clause: &str) -> Result<Vec<Row>, RowGraphError> {
        self.selects.fetch_add(1, Ordering::Relaxed);
        if self.failing.read().contains(table.name()) {
            return Err(RowGraphError::store(format!(
                "select from {} failed",
                table.name()
            )));
        }
        let condition = Expr::parse(where_clause, None, table)?;
        let tables = self.tables.read();
        let Some(rows) = tables.get(table.name()) else {
            return Ok(Vec::new());
        };
        let mut matched = Vec::new();
        for row in rows {
            if condition.matches(None, row)? {
                matched.push(row.clone());
            }
        }
        Ok(matched)
    }

    fn table_exists(&self, table_name: &str) -> Result<bool, RowGraphError> {
        Ok(self.tables.read().contains_key(table_name))
    }

    fn max_id(&self, id_name: &str, table: &Table) -> Result<Option<i64>, RowGraphError> {
        let index = table.column_index(id_name).ok_or_else(|| {
            RowGraphError::not_found(format!("{id_name} is not a column of {}", table.name()))
        })?;
        Ok(self
            .tables
            .read()
            .get(table.name())
            .and_then(|rows| rows.iter().filter_map(|r| r.values()[index].as_i64()).max()))
    }

    fn next_sequence_value(&self, sequence: &str) -> Result<i64, RowGraphError> {
        let mut sequences = self.sequences.lock();
        let next = sequences
            .get_mut(sequence)
            .ok_or_else(|| RowGraphError::not_found(format!("sequence {sequence}")))?;
        let value = *next;
        *next += 1;
        Ok(value)
    }

    /// Supports `DELETE FROM <table> [WHERE ...]`.
    fn execute_update(&self, statement: &str) -> Result<usize, RowGraphError> {
        let trimmed = statement.trim();
        let lower = trimmed.to_ascii_lowercase();
        let Some(rest) = lower.strip_prefix("delete from ") else {
            return Err(RowGraphError::store(format!(
                "unsupported statement {trimmed}"
            )));
        };
        let name_len = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        let offset = trimmed.len() - rest.len();
        let name = &trimmed[offset..offset + name_len];
        let clause = &trimmed[offset + name_len..];
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(name) else {
            return Ok(0);
        };
        let Some(table) = rows.first().map(|r| Arc::clone(r.table())) else {
            return Ok(0);
        };
        let condition = Expr::parse(clause, None, &table)?;
        let mut keep = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            keep.push(!condition.matches(None, row)?);
        }
        let before = rows.len();
        let mut flags = keep.into_iter();
        rows.retain(|_| flags.next().unwrap_or(true));
        Ok(before - rows.len())
    }

    fn commit(&self) -> Result<(), RowGraphError> {
        Ok(())
    }
}
