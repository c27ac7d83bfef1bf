//! Table and column metadata consumed by the graph engine.
//!
//! Names are folded according to [`EngineConfig::fold_case`] when a [`Table`]
//! is built, so every later lookup goes through [`Table::column_index`] or
//! [`Schema::table`] and never compares raw strings.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use ahash::AHashSet;

use crate::{
    config::{EngineConfig, fold_name},
    errors::RowGraphError,
    relationship::Relationship,
    value::{ColumnValue, ValueType},
};

pub const OWNED_ID_MARKER: &str = "OWNEDID!";
pub const VALUE_OF_PREFIX: &str = "VALUEOF:";
pub const LOAD_DATE_COLUMN: &str = "LDDATE";

/// Whether a column may hold a not-applicable sentinel, and which one.
#[derive(Clone, Debug, PartialEq)]
pub enum NaPolicy {
    NotAllowed,
    /// `Allowed(ColumnValue::Null)` means the sentinel is a null value.
    Allowed(ColumnValue),
}

impl NaPolicy {
    /// `NA` and `NOT ALLOWED` disable the sentinel; anything else is parsed as
    /// the sentinel value itself.
    pub fn parse(value_type: ValueType, raw: &str) -> Result<Self, RowGraphError> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("NA") || trimmed.eq_ignore_ascii_case("NOT ALLOWED") {
            return Ok(NaPolicy::NotAllowed);
        }
        Ok(NaPolicy::Allowed(ColumnValue::parse_as(value_type, trimmed)?))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    name: String,
    value_type: ValueType,
    na: NaPolicy,
    tolerance: f64,
    foreign_key: Option<String>,
    owned_id: bool,
    fixed_fk: bool,
    primary_key: bool,
    unique_key: bool,
}

impl Column {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.trim().to_string(),
            value_type,
            na: NaPolicy::NotAllowed,
            tolerance: 0.0,
            foreign_key: None,
            owned_id: false,
            fixed_fk: false,
            primary_key: false,
            unique_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique_key(mut self) -> Self {
        self.unique_key = true;
        self
    }

    /// Declares the identifier this column refers to. `OWNEDID!` makes the
    /// column the owned identifier of its table.
    pub fn foreign_key(mut self, target: &str) -> Self {
        let target = target.trim();
        if target.eq_ignore_ascii_case(OWNED_ID_MARKER) {
            self.owned_id = true;
            self.foreign_key = Some(self.name.clone());
        } else if !target.is_empty() {
            self.foreign_key = Some(target.to_string());
        }
        self
    }

    pub fn na(mut self, policy: NaPolicy) -> Self {
        self.na = policy;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    /// Exempts the column from foreign-key rewriting.
    pub fn fixed(mut self) -> Self {
        self.fixed_fk = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn na_policy(&self) -> &NaPolicy {
        &self.na
    }

    pub fn na_allowed(&self) -> bool {
        matches!(self.na, NaPolicy::Allowed(_))
    }

    pub fn na_value(&self) -> Option<&ColumnValue> {
        match &self.na {
            NaPolicy::Allowed(value) => Some(value),
            NaPolicy::NotAllowed => None,
        }
    }

    pub fn is_na(&self, value: &ColumnValue) -> bool {
        match &self.na {
            NaPolicy::Allowed(na) => na.tolerant_eq(value, self.tolerance),
            NaPolicy::NotAllowed => false,
        }
    }

    pub fn tolerance_value(&self) -> f64 {
        self.tolerance
    }

    pub fn foreign_key_target(&self) -> Option<&str> {
        self.foreign_key.as_deref()
    }

    /// Column holding the identifier name for a `VALUEOF:` foreign key.
    pub fn dynamic_foreign_key(&self) -> Option<&str> {
        self.foreign_key
            .as_deref()
            .and_then(|fk| fk.strip_prefix(VALUE_OF_PREFIX))
    }

    pub fn is_owned_id(&self) -> bool {
        self.owned_id
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_fk
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_unique_key(&self) -> bool {
        self.unique_key
    }

    pub fn values_equal(&self, a: &ColumnValue, b: &ColumnValue) -> bool {
        a.tolerant_eq(b, self.tolerance)
    }

    fn fold(&mut self, fold_case: bool) {
        self.name = fold_name(&self.name, fold_case);
        if let Some(fk) = self.foreign_key.take() {
            let folded = match fk
                .get(..VALUE_OF_PREFIX.len())
                .filter(|p| p.eq_ignore_ascii_case(VALUE_OF_PREFIX))
            {
                Some(_) => format!(
                    "{VALUE_OF_PREFIX}{}",
                    fold_name(&fk[VALUE_OF_PREFIX.len()..], fold_case)
                ),
                None => fold_name(&fk, fold_case),
            };
            self.foreign_key = Some(folded);
        }
        if self.owned_id {
            self.foreign_key = Some(self.name.clone());
        }
    }
}

#[derive(Debug)]
pub struct Table {
    schema: String,
    table_type: String,
    name: String,
    fold_case: bool,
    columns: Vec<Column>,
    primary_keys: Vec<usize>,
    unique_keys: Vec<usize>,
    foreign_keys: Vec<usize>,
    owned_id: Option<usize>,
    load_date: Option<usize>,
}

impl Table {
    pub fn new(
        schema: &str,
        table_type: &str,
        name: &str,
        columns: Vec<Column>,
        config: &EngineConfig,
    ) -> Result<Self, RowGraphError> {
        let fold_case = config.fold_case;
        let table_type = fold_name(table_type, fold_case);
        let name = fold_name(name, fold_case);
        if table_type.is_empty() || name.is_empty() {
            return Err(RowGraphError::schema("table type and name must be set"));
        }
        if columns.is_empty() {
            return Err(RowGraphError::schema(format!(
                "table {table_type} has no columns"
            )));
        }
        let mut columns = columns;
        let mut seen = AHashSet::new();
        for column in columns.iter_mut() {
            column.fold(fold_case);
            if column.name.is_empty() {
                return Err(RowGraphError::schema(format!(
                    "table {table_type} has an unnamed column"
                )));
            }
            if !seen.insert(column.name.clone()) {
                return Err(RowGraphError::schema(format!(
                    "table {table_type} declares column {} twice",
                    column.name
                )));
            }
        }

        let primary_keys = indices(&columns, Column::is_primary_key);
        let mut unique_keys = indices(&columns, Column::is_unique_key);
        let foreign_keys = indices(&columns, |c| c.foreign_key.is_some());
        let owned = indices(&columns, Column::is_owned_id);
        if owned.len() > 1 {
            return Err(RowGraphError::schema(format!(
                "table {table_type} owns more than one identifier"
            )));
        }
        if !unique_keys.is_empty() && unique_keys == primary_keys {
            unique_keys.clear();
        }
        if primary_keys.len() > 1 && !unique_keys.is_empty() {
            return Err(RowGraphError::schema(format!(
                "table {table_type} has a compound primary key and distinct unique keys"
            )));
        }
        let load_date = columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(LOAD_DATE_COLUMN));

        Ok(Self {
            schema: fold_name(schema, fold_case),
            table_type,
            name,
            fold_case,
            columns,
            primary_keys,
            unique_keys,
            foreign_keys,
            owned_id: owned.first().copied(),
            load_date,
        })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    pub fn table_type(&self) -> &str {
        &self.table_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fold_case(&self) -> bool {
        self.fold_case
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = fold_name(name, self.fold_case);
        self.columns.iter().position(|c| c.name == wanted)
    }

    pub fn primary_keys(&self) -> &[usize] {
        &self.primary_keys
    }

    pub fn unique_keys(&self) -> &[usize] {
        &self.unique_keys
    }

    pub fn foreign_keys(&self) -> &[usize] {
        &self.foreign_keys
    }

    pub fn owned_id_index(&self) -> Option<usize> {
        self.owned_id
    }

    pub fn owned_id(&self) -> Option<&str> {
        self.owned_id.map(|i| self.columns[i].name.as_str())
    }

    pub fn is_id_owner(&self) -> bool {
        self.owned_id.is_some()
    }

    pub fn load_date_index(&self) -> Option<usize> {
        self.load_date
    }

    pub fn fold(&self, name: &str) -> String {
        fold_name(name, self.fold_case)
    }

    /// Column indices excluding the load-date column.
    pub fn all_but_load_date(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|i| Some(*i) != self.load_date)
            .collect()
    }

    /// Column indices excluding the owned identifier and load date.
    pub fn data_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|i| Some(*i) != self.load_date && Some(*i) != self.owned_id)
            .collect()
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.table_type == other.table_type
    }
}

impl Eq for Table {}

impl Hash for Table {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.hash(state);
        self.table_type.hash(state);
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.table_type {
            write!(f, "{}", self.table_type)
        } else {
            write!(f, "{} ({})", self.table_type, self.name)
        }
    }
}

fn indices(columns: &[Column], pred: impl Fn(&Column) -> bool) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .filter(|(_, c)| pred(c))
        .map(|(i, _)| i)
        .collect()
}

/// A named set of tables plus the relationships declared between them.
#[derive(Debug)]
pub struct Schema {
    name: String,
    config: EngineConfig,
    tables: Vec<Arc<Table>>,
    relationships: Vec<Arc<Relationship>>,
}

impl Schema {
    pub fn new(name: &str, config: EngineConfig) -> Self {
        Self {
            name: config.fold(name),
            config,
            tables: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds a table in this schema and registers it.
    pub fn define_table(
        &mut self,
        table_type: &str,
        name: &str,
        columns: Vec<Column>,
    ) -> Result<Arc<Table>, RowGraphError> {
        let table = Table::new(&self.name, table_type, name, columns, &self.config)?;
        self.add_table(table)
    }

    pub fn add_table(&mut self, table: Table) -> Result<Arc<Table>, RowGraphError> {
        if table.schema_name() != self.name {
            return Err(RowGraphError::schema(format!(
                "table {} belongs to schema {}, not {}",
                table.table_type(),
                table.schema_name(),
                self.name
            )));
        }
        if self.table(table.table_type()).is_some() {
            return Err(RowGraphError::schema(format!(
                "table type {} already defined",
                table.table_type()
            )));
        }
        if let Some(id) = table.owned_id() {
            if let Some(owner) = self.owner_of(id) {
                return Err(RowGraphError::schema(format!(
                    "identifier {id} is already owned by {}",
                    owner.table_type()
                )));
            }
        }
        let table = Arc::new(table);
        self.tables.push(Arc::clone(&table));
        Ok(table)
    }

    /// Builds and registers a relationship between two tables of this schema.
    pub fn define_relationship(
        &mut self,
        id: &str,
        source_type: &str,
        target_type: &str,
        where_clause: &str,
        constraint: &str,
    ) -> Result<Arc<Relationship>, RowGraphError> {
        let source = self
            .table(source_type)
            .ok_or_else(|| RowGraphError::schema(format!("unknown table type {source_type}")))?;
        let target = self
            .table(target_type)
            .ok_or_else(|| RowGraphError::schema(format!("unknown table type {target_type}")))?;
        let relationship = Relationship::new(id, source, target, where_clause, constraint)?;
        self.add_relationship(relationship)
    }

    pub fn add_relationship(
        &mut self,
        relationship: Relationship,
    ) -> Result<Arc<Relationship>, RowGraphError> {
        if self.relationship(relationship.id()).is_some() {
            return Err(RowGraphError::schema(format!(
                "relationship {} already defined",
                relationship.id()
            )));
        }
        let relationship = Arc::new(relationship);
        self.relationships.push(Arc::clone(&relationship));
        Ok(relationship)
    }

    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn table(&self, table_type: &str) -> Option<Arc<Table>> {
        let wanted = self.config.fold(table_type);
        self.tables
            .iter()
            .find(|t| t.table_type() == wanted)
            .cloned()
    }

    /// The table that owns the named identifier.
    pub fn owner_of(&self, id_name: &str) -> Option<&Arc<Table>> {
        let wanted = self.config.fold(id_name);
        self.tables
            .iter()
            .find(|t| t.owned_id() == Some(wanted.as_str()))
    }

    pub fn owned_ids(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter_map(|t| t.owned_id().map(str::to_string))
            .collect()
    }

    pub fn relationships(&self) -> &[Arc<Relationship>] {
        &self.relationships
    }

    pub fn relationship(&self, id: &str) -> Option<&Arc<Relationship>> {
        self.relationships.iter().find(|r| r.id() == id)
    }

    pub fn relationships_from(&self, table: &Table) -> Vec<Arc<Relationship>> {
        self.relationships
            .iter()
            .filter(|r| r.source().as_ref() == table)
            .cloned()
            .collect()
    }

    pub fn relationships_to(&self, table: &Table) -> Vec<Arc<Relationship>> {
        self.relationships
            .iter()
            .filter(|r| r.target().as_ref() == table)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn owned_id_marker_sets_self_foreign_key() {
        let table = Table::new(
            "s",
            "event",
            "event",
            vec![
                Column::new("evid", ValueType::Integer)
                    .primary_key()
                    .foreign_key("ownedid!"),
                Column::new("lddate", ValueType::Date),
            ],
            &config(),
        )
        .unwrap();
        assert_eq!(table.owned_id(), Some("EVID"));
        assert_eq!(table.foreign_keys(), &[0]);
        assert_eq!(table.load_date_index(), Some(1));
        assert_eq!(table.column_index("EvId"), Some(0));
    }

    #[test]
    fn compound_primary_key_rejects_distinct_unique_keys() {
        let result = Table::new(
            "s",
            "assoc",
            "assoc",
            vec![
                Column::new("arid", ValueType::Integer).primary_key(),
                Column::new("orid", ValueType::Integer).primary_key(),
                Column::new("sta", ValueType::Text).unique_key(),
            ],
            &config(),
        );
        assert!(matches!(result, Err(RowGraphError::SchemaError(_))));
    }

    #[test]
    fn unique_keys_matching_primary_key_are_dropped() {
        let table = Table::new(
            "s",
            "assoc",
            "assoc",
            vec![
                Column::new("arid", ValueType::Integer).primary_key().unique_key(),
                Column::new("orid", ValueType::Integer).primary_key().unique_key(),
            ],
            &config(),
        )
        .unwrap();
        assert!(table.unique_keys().is_empty());
        assert_eq!(table.primary_keys(), &[0, 1]);
    }

    #[test]
    fn value_of_prefix_survives_folding() {
        let table = Table::new(
            "s",
            "remark",
            "remark",
            vec![
                Column::new("idname", ValueType::Text),
                Column::new("idvalue", ValueType::Integer).foreign_key("valueof:idname"),
            ],
            &config(),
        )
        .unwrap();
        let column = table.column(1).unwrap();
        assert_eq!(column.dynamic_foreign_key(), Some("IDNAME"));
    }

    #[test]
    fn na_policy_parses_sentinels() {
        assert_eq!(
            NaPolicy::parse(ValueType::Integer, "not allowed").unwrap(),
            NaPolicy::NotAllowed
        );
        assert_eq!(
            NaPolicy::parse(ValueType::Integer, "-1").unwrap(),
            NaPolicy::Allowed(ColumnValue::Integer(-1))
        );
    }
}
