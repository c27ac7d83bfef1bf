//! JSON documents for moving graphs, schemas and ledgers between processes.
//! Edges travel as hex row ids; [`GraphDocument::into_graph`] relinks them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    config::EngineConfig,
    errors::RowGraphError,
    graph::RowGraph,
    id_gaps::{Gap, GapState, IdGapsLedger},
    relationship::Relationship,
    remap::{RemapEntry, RemapLedger},
    row::{Row, RowId},
    schema::{Column, NaPolicy, OWNED_ID_MARKER, Schema, Table},
    value::{ColumnValue, ValueType},
};

fn to_json<T: Serialize>(value: &T) -> Result<String, RowGraphError> {
    serde_json::to_string_pretty(value).map_err(|e| RowGraphError::interchange(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, RowGraphError> {
    serde_json::from_str(text).map_err(|e| RowGraphError::interchange(e.to_string()))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowDocument {
    pub schema: String,
    pub table_type: String,
    pub values: Vec<ColumnValue>,
    pub row_id: RowId,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub rows: Vec<RowDocument>,
}

impl GraphDocument {
    pub fn from_graph(graph: &RowGraph) -> Self {
        let rows = graph
            .disassemble()
            .into_iter()
            .map(|linked| RowDocument {
                schema: linked.row.table().schema_name().to_string(),
                table_type: linked.row.table().table_type().to_string(),
                values: linked.row.values().to_vec(),
                row_id: linked.id,
                children: linked.children.iter().map(RowId::to_hex).collect(),
                parents: linked.parents.iter().map(RowId::to_hex).collect(),
            })
            .collect();
        Self { rows }
    }

    /// Rebuilds the graph against `schema`. Every row is loaded before any
    /// edge is resolved.
    pub fn into_graph(self, schema: &Schema) -> Result<RowGraph, RowGraphError> {
        let mut graph = RowGraph::new();
        for doc in self.rows {
            if schema.config().fold(&doc.schema) != schema.name() {
                return Err(RowGraphError::interchange(format!(
                    "row of schema {} cannot load into schema {}",
                    doc.schema,
                    schema.name()
                )));
            }
            let table = schema.table(&doc.table_type).ok_or_else(|| {
                RowGraphError::interchange(format!("unknown table type {}", doc.table_type))
            })?;
            let row = Row::new(table, doc.values)?;
            if !graph.add_unlinked(doc.row_id, row, doc.children, doc.parents) {
                return Err(RowGraphError::interchange(format!(
                    "row id {} appears twice",
                    doc.row_id
                )));
            }
        }
        graph.create_links()?;
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String, RowGraphError> {
        to_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self, RowGraphError> {
        from_json(text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDocument {
    pub id: String,
    pub source_type: String,
    pub target_type: String,
    pub where_clause: String,
    #[serde(default)]
    pub constraint: String,
}

impl RelationshipDocument {
    pub fn from_relationship(relationship: &Relationship) -> Self {
        Self {
            id: relationship.id().to_string(),
            source_type: relationship.source().table_type().to_string(),
            target_type: relationship.target().table_type().to_string(),
            where_clause: relationship.where_clause().to_string(),
            constraint: relationship.multiplicity().as_str().to_string(),
        }
    }

    pub fn into_relationship(self, schema: &Schema) -> Result<Relationship, RowGraphError> {
        let lookup = |table_type: &str| {
            schema
                .table(table_type)
                .ok_or_else(|| RowGraphError::schema(format!("unknown table type {table_type}")))
        };
        Relationship::new(
            &self.id,
            lookup(&self.source_type)?,
            lookup(&self.target_type)?,
            &self.where_clause,
            &self.constraint,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDocument {
    pub name: String,
    pub value_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique_key: bool,
    /// An identifier name, `OWNEDID!`, or `VALUEOF:<column>`.
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Not-applicable sentinel; absent or `NA` disables it.
    #[serde(default)]
    pub na: Option<String>,
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default)]
    pub fixed: bool,
}

impl ColumnDocument {
    fn from_column(column: &Column) -> Self {
        let foreign_key = if column.is_owned_id() {
            Some(OWNED_ID_MARKER.to_string())
        } else {
            column.foreign_key_target().map(str::to_string)
        };
        let na = match column.na_policy() {
            NaPolicy::NotAllowed => None,
            NaPolicy::Allowed(ColumnValue::Null) => Some(String::from("null")),
            NaPolicy::Allowed(value) => Some(value.to_sql_literal()),
        };
        Self {
            name: column.name().to_string(),
            value_type: column.value_type().as_str().to_string(),
            primary_key: column.is_primary_key(),
            unique_key: column.is_unique_key(),
            foreign_key,
            na,
            tolerance: column.tolerance_value(),
            fixed: column.is_fixed(),
        }
    }

    fn into_column(self) -> Result<Column, RowGraphError> {
        let value_type = ValueType::parse(&self.value_type)?;
        let mut column = Column::new(&self.name, value_type).tolerance(self.tolerance);
        if self.primary_key {
            column = column.primary_key();
        }
        if self.unique_key {
            column = column.unique_key();
        }
        if let Some(fk) = &self.foreign_key {
            column = column.foreign_key(fk);
        }
        if let Some(na) = &self.na {
            column = column.na(NaPolicy::parse(value_type, na)?);
        }
        if self.fixed {
            column = column.fixed();
        }
        Ok(column)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    pub table_type: String,
    /// Store table name; defaults to the table type.
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<ColumnDocument>,
}

impl TableDocument {
    fn from_table(table: &Table) -> Self {
        Self {
            table_type: table.table_type().to_string(),
            name: Some(table.name().to_string()),
            columns: table.columns().iter().map(ColumnDocument::from_column).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableDocument>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDocument>,
}

impl SchemaDocument {
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            name: schema.name().to_string(),
            tables: schema
                .tables()
                .iter()
                .map(|t| TableDocument::from_table(t))
                .collect(),
            relationships: schema
                .relationships()
                .iter()
                .map(|r| RelationshipDocument::from_relationship(r))
                .collect(),
        }
    }

    pub fn into_schema(self, config: EngineConfig) -> Result<Schema, RowGraphError> {
        config.validate()?;
        let mut schema = Schema::new(&self.name, config);
        for table in self.tables {
            let name = table.name.unwrap_or_else(|| table.table_type.clone());
            let columns = table
                .columns
                .into_iter()
                .map(ColumnDocument::into_column)
                .collect::<Result<Vec<_>, _>>()?;
            schema.define_table(&table.table_type, &name, columns)?;
        }
        for relationship in self.relationships {
            let relationship = relationship.into_relationship(&schema)?;
            schema.add_relationship(relationship)?;
        }
        Ok(schema)
    }

    pub fn to_json(&self) -> Result<String, RowGraphError> {
        to_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self, RowGraphError> {
        from_json(text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapDocument {
    pub id_name: String,
    pub gap_id: i64,
    pub next: i64,
    pub last: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapLedgerDocument {
    pub gaps: Vec<GapDocument>,
    #[serde(default)]
    pub returned: BTreeMap<String, Vec<i64>>,
}

impl GapLedgerDocument {
    pub fn from_ledger(ledger: &IdGapsLedger) -> Self {
        let state = ledger.snapshot();
        Self {
            gaps: state
                .gaps
                .into_iter()
                .map(|(id_name, gap)| GapDocument {
                    id_name,
                    gap_id: gap.gap_id,
                    next: gap.next,
                    last: gap.last,
                })
                .collect(),
            returned: state
                .returned
                .into_iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(name, values)| (name, values.into_iter().collect()))
                .collect(),
        }
    }

    pub fn into_ledger(self, config: &EngineConfig) -> Result<IdGapsLedger, RowGraphError> {
        let mut state = GapState::default();
        for doc in self.gaps {
            let name = config.fold(&doc.id_name);
            if name.is_empty() {
                return Err(RowGraphError::interchange("gap without identifier name"));
            }
            state.gaps.insert(
                name,
                Gap {
                    gap_id: doc.gap_id,
                    next: doc.next,
                    last: doc.last,
                },
            );
        }
        for (name, values) in self.returned {
            state
                .returned
                .entry(config.fold(&name))
                .or_default()
                .extend(values);
        }
        Ok(IdGapsLedger::from_state(config, state))
    }

    pub fn to_json(&self) -> Result<String, RowGraphError> {
        to_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self, RowGraphError> {
        from_json(text)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapDocument {
    pub entries: Vec<RemapEntry>,
}

impl RemapDocument {
    pub fn from_ledger(ledger: &RemapLedger) -> Self {
        Self {
            entries: ledger.entries(),
        }
    }

    /// Replays every entry into `ledger`.
    pub fn apply(&self, ledger: &RemapLedger) -> Result<usize, RowGraphError> {
        for e in &self.entries {
            ledger.add_current_id(&e.source, &e.id_name, e.original, e.current)?;
        }
        Ok(self.entries.len())
    }

    pub fn into_ledger(self, config: &EngineConfig) -> Result<RemapLedger, RowGraphError> {
        let ledger = RemapLedger::new(config);
        self.apply(&ledger)?;
        Ok(ledger)
    }

    pub fn to_json(&self) -> Result<String, RowGraphError> {
        to_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self, RowGraphError> {
        from_json(text)
    }
}
