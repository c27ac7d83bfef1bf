use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use rusqlite::{
    Connection, OptionalExtension, params, params_from_iter,
    types::{ToSqlOutput, Value, ValueRef},
};
use tracing::debug;

use crate::{
    errors::RowGraphError,
    row::Row,
    schema::Table,
    store::StoreAccess,
    value::{ColumnValue, ValueType},
};

static NEXT_MEMORY_DB: AtomicUsize = AtomicUsize::new(0);

/// SQLite-backed store. Tables are addressed by [`Table::name`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    key: String,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RowGraphError> {
        let key = format!("sqlite:{}", path.as_ref().display());
        let conn = Connection::open(path).map_err(|e| RowGraphError::store(e.to_string()))?;
        Self::from_connection(conn, key)
    }

    pub fn open_in_memory() -> Result<Self, RowGraphError> {
        let conn =
            Connection::open_in_memory().map_err(|e| RowGraphError::store(e.to_string()))?;
        let key = format!(
            "sqlite:memory:{}",
            NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed)
        );
        Self::from_connection(conn, key)
    }

    fn from_connection(conn: Connection, key: String) -> Result<Self, RowGraphError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rowgraph_sequences (
                name  TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RowGraphError::schema(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    /// Creates the backing table for `table` if it does not exist.
    pub fn create_table(&self, table: &Table) -> Result<(), RowGraphError> {
        let mut columns: Vec<String> = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", c.name(), c.value_type().sql_type()))
            .collect();
        if !table.primary_keys().is_empty() {
            let keys: Vec<&str> = table
                .primary_keys()
                .iter()
                .map(|&i| table.columns()[i].name())
                .collect();
            columns.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table.name(),
            columns.join(", ")
        );
        self.conn
            .lock()
            .execute_batch(&sql)
            .map_err(|e| RowGraphError::schema(e.to_string()))
    }

    pub fn insert_row(&self, row: &Row) -> Result<(), RowGraphError> {
        let table = row.table();
        let names: Vec<&str> = table.columns().iter().map(|c| c.name()).collect();
        let slots: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            table.name(),
            names.join(", "),
            slots.join(", ")
        );
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| RowGraphError::store(e.to_string()))?;
        stmt.execute(params_from_iter(row.values()))
            .map_err(|e| RowGraphError::store(e.to_string()))?;
        Ok(())
    }

    pub fn create_sequence(&self, name: &str, next: i64) -> Result<(), RowGraphError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO rowgraph_sequences(name, value) VALUES(?1, ?2)",
                params![name, next],
            )
            .map_err(|e| RowGraphError::store(e.to_string()))?;
        Ok(())
    }

    pub fn begin(&self) -> Result<(), RowGraphError> {
        self.conn
            .lock()
            .execute_batch("BEGIN")
            .map_err(|e| RowGraphError::store(e.to_string()))
    }
}

impl StoreAccess for SqliteStore {
    fn connection_key(&self) -> String {
        self.key.clone()
    }

    fn select(&self, table: &Arc<Table>, where_clause: &str) -> Result<Vec<Row>, RowGraphError> {
        let names: Vec<&str> = table.columns().iter().map(|c| c.name()).collect();
        let sql = format!(
            "SELECT {} FROM {} {}",
            names.join(", "),
            table.name(),
            where_clause
        );
        debug!(sql = %sql, "select");
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| RowGraphError::store(e.to_string()))?;
        let types: Vec<ValueType> = table.columns().iter().map(|c| c.value_type()).collect();
        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(types.len());
                for (i, ty) in types.iter().enumerate() {
                    values.push(to_column_value(row.get_ref(i)?, *ty));
                }
                Ok(values.into_iter().collect::<Result<Vec<_>, _>>())
            })
            .map_err(|e| RowGraphError::store(e.to_string()))?;
        let mut result = Vec::new();
        for values in rows {
            let values = values.map_err(|e| RowGraphError::store(e.to_string()))??;
            result.push(Row::new(Arc::clone(table), values)?);
        }
        Ok(result)
    }

    fn table_exists(&self, table_name: &str) -> Result<bool, RowGraphError> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 COLLATE NOCASE",
                params![table_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RowGraphError::store(e.to_string()))?;
        Ok(found.is_some())
    }

    fn max_id(&self, id_name: &str, table: &Table) -> Result<Option<i64>, RowGraphError> {
        let sql = format!("SELECT MAX({id_name}) FROM {}", table.name());
        self.conn
            .lock()
            .query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
            .map_err(|e| RowGraphError::store(e.to_string()))
    }

    fn next_sequence_value(&self, sequence: &str) -> Result<i64, RowGraphError> {
        let conn = self.conn.lock();
        let value: i64 = conn
            .query_row(
                "SELECT value FROM rowgraph_sequences WHERE name=?1",
                params![sequence],
                |row| row.get(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    RowGraphError::not_found(format!("sequence {sequence}"))
                }
                other => RowGraphError::store(other.to_string()),
            })?;
        conn.execute(
            "UPDATE rowgraph_sequences SET value = value + 1 WHERE name=?1",
            params![sequence],
        )
        .map_err(|e| RowGraphError::store(e.to_string()))?;
        Ok(value)
    }

    fn execute_update(&self, statement: &str) -> Result<usize, RowGraphError> {
        self.conn
            .lock()
            .execute(statement, [])
            .map_err(|e| RowGraphError::store(e.to_string()))
    }

    fn commit(&self) -> Result<(), RowGraphError> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .map_err(|e| RowGraphError::store(e.to_string()))?;
        }
        Ok(())
    }
}

impl rusqlite::ToSql for ColumnValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ColumnValue::Null => ToSqlOutput::Owned(Value::Null),
            ColumnValue::Integer(v) | ColumnValue::Date(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            ColumnValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            ColumnValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Stored text that does not parse as the column type is a store error.
fn to_column_value(value: ValueRef<'_>, ty: ValueType) -> Result<ColumnValue, RowGraphError> {
    Ok(match (value, ty) {
        (ValueRef::Null, _) => ColumnValue::Null,
        (ValueRef::Integer(v), ValueType::Float) => ColumnValue::Float(v as f64),
        (ValueRef::Integer(v), ValueType::Date) => ColumnValue::Date(v),
        (ValueRef::Integer(v), ValueType::Text) => ColumnValue::Text(v.to_string()),
        (ValueRef::Integer(v), ValueType::Integer) => ColumnValue::Integer(v),
        (ValueRef::Real(v), ValueType::Integer) => ColumnValue::Integer(v as i64),
        (ValueRef::Real(v), ValueType::Date) => ColumnValue::Date(v as i64),
        (ValueRef::Real(v), ValueType::Text) => ColumnValue::Text(v.to_string()),
        (ValueRef::Real(v), ValueType::Float) => ColumnValue::Float(v),
        (ValueRef::Text(bytes), ValueType::Text) | (ValueRef::Blob(bytes), ValueType::Text) => {
            ColumnValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        (ValueRef::Text(bytes), other) | (ValueRef::Blob(bytes), other) => {
            let raw = String::from_utf8_lossy(bytes);
            ColumnValue::parse_as(other, &raw).map_err(|e| {
                RowGraphError::store(format!("stored value {raw:?} is not {}: {e}", other.as_str()))
            })?
        }
    })
}
