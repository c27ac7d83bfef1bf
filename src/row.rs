use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{errors::RowGraphError, schema::Table, value::ColumnValue};

/// Opaque row identity: a SHA-256 digest of the schema name, table type and
/// column values at the time the id was computed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RowId([u8; 32]);

impl RowId {
    pub fn compute(table: &Table, values: &[ColumnValue]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(table.schema_name().as_bytes());
        hasher.update(b" ");
        hasher.update(table.table_type().as_bytes());
        for value in values {
            hasher.update(b" ");
            hasher.update(value.to_string().as_bytes());
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        RowId(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, RowGraphError> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| RowGraphError::invalid_input(format!("bad row id {text}: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RowGraphError::invalid_input(format!("row id {text} has wrong length")))?;
        Ok(RowId(array))
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", &self.to_hex()[..12])
    }
}

impl TryFrom<String> for RowId {
    type Error = RowGraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RowId::from_hex(&value)
    }
}

impl From<RowId> for String {
    fn from(value: RowId) -> Self {
        value.to_hex()
    }
}

/// One record of a table. The id is fixed at construction; edits made through
/// [`Row::set_value`] keep it until [`Row::refresh_id`] is called.
#[derive(Clone, Debug)]
pub struct Row {
    table: Arc<Table>,
    values: Vec<ColumnValue>,
    id: RowId,
}

impl Row {
    pub fn new(table: Arc<Table>, values: Vec<ColumnValue>) -> Result<Self, RowGraphError> {
        if values.len() != table.columns().len() {
            return Err(RowGraphError::invalid_input(format!(
                "table {} expects {} values, got {}",
                table.table_type(),
                table.columns().len(),
                values.len()
            )));
        }
        let values = values
            .into_iter()
            .zip(table.columns())
            .map(|(value, column)| value.coerce(column.value_type()))
            .collect::<Result<Vec<_>, _>>()?;
        let id = RowId::compute(&table, &values);
        Ok(Self { table, values, id })
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&ColumnValue> {
        self.values.get(index)
    }

    pub fn value_of(&self, column: &str) -> Option<&ColumnValue> {
        self.table
            .column_index(column)
            .and_then(|i| self.values.get(i))
    }

    pub fn owned_id_value(&self) -> Option<i64> {
        self.table
            .owned_id_index()
            .and_then(|i| self.values[i].as_i64())
    }

    pub fn set_value(&mut self, index: usize, value: ColumnValue) -> Result<(), RowGraphError> {
        let column = self.table.column(index).ok_or_else(|| {
            RowGraphError::invalid_input(format!(
                "column {index} out of range for {}",
                self.table.table_type()
            ))
        })?;
        self.values[index] = value.coerce(column.value_type())?;
        Ok(())
    }

    /// Recomputes the id from the current values and returns it.
    pub fn refresh_id(&mut self) -> RowId {
        self.id = RowId::compute(&self.table, &self.values);
        self.id
    }

    /// Carries an id from an external representation until the next refresh.
    pub(crate) fn assign_id(&mut self, id: RowId) {
        self.id = id;
    }

    pub fn computed_id(&self) -> RowId {
        RowId::compute(&self.table, &self.values)
    }

    /// Value equality over the given column indices, with column tolerances.
    pub fn equal_on(&self, other: &Row, indices: &[usize]) -> bool {
        if self.table != other.table {
            return false;
        }
        indices.iter().all(|&i| {
            let column = &self.table.columns()[i];
            column.values_equal(&self.values[i], &other.values[i])
        })
    }

    pub fn equal_values(&self, other: &Row) -> bool {
        let all: Vec<usize> = (0..self.values.len()).collect();
        self.equal_on(other, &all)
    }

    pub fn equal_all_but_load_date(&self, other: &Row) -> bool {
        self.equal_on(other, &self.table.all_but_load_date())
    }

    /// False when the table declares no unique keys.
    pub fn equal_unique_keys(&self, other: &Row) -> bool {
        !self.table.unique_keys().is_empty() && self.equal_on(other, self.table.unique_keys())
    }

    pub fn equal_primary_keys(&self, other: &Row) -> bool {
        !self.table.primary_keys().is_empty() && self.equal_on(other, self.table.primary_keys())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.table.table_type())?;
        for (i, (column, value)) in self.table.columns().iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", column.name(), value)?;
        }
        write!(f, ")")
    }
}
