//! The row graph: an arena of vertices keyed by [`RowId`] with a per-table
//! index. Every insertion and removal goes through `insert_vertex` and
//! `remove_vertex` so the two maps never disagree.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::{
    errors::RowGraphError,
    row::{Row, RowId},
    schema::{Schema, Table},
};

mod assemble;
mod links;
mod traverse;
mod vertex;

pub use assemble::AssemblyReport;
pub use links::LinkedRow;
pub use traverse::{GraphWalk, Iter};
pub use vertex::Vertex;

#[derive(Clone, Debug, Default)]
pub struct RowGraph {
    vertices: AHashMap<RowId, Vertex>,
    by_table: AHashMap<Arc<Table>, BTreeMap<u64, RowId>>,
    table_order: Vec<Arc<Table>>,
    next_seq: u64,
    pending: Vec<links::PendingLinks>,
}

impl RowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.vertices.contains_key(&id)
    }

    pub fn vertex(&self, id: RowId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.vertices.get(&id).map(Vertex::row)
    }

    pub(crate) fn row_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.vertices.get_mut(&id).map(Vertex::row_mut)
    }

    /// Inserts `row` without edges. Returns false, leaving the graph
    /// untouched, when a vertex with the same id exists.
    pub fn add(&mut self, row: Row) -> bool {
        self.insert_vertex(row)
    }

    /// Inserts `row` and links it to every existing vertex that a schema
    /// relationship connects it to, checked with [`crate::Relationship::evaluate`].
    pub fn add_connected(&mut self, row: Row, schema: &Schema) -> Result<bool, RowGraphError> {
        let id = row.id();
        if self.contains(id) {
            return Ok(false);
        }
        let table = Arc::clone(row.table());
        let mut parents = Vec::new();
        for rel in schema.relationships_to(&table) {
            for source in self.rows_of_table(rel.source()) {
                if rel.evaluate(source, &row)? {
                    parents.push(source.id());
                }
            }
        }
        let mut children = Vec::new();
        for rel in schema.relationships_from(&table) {
            for target in self.rows_of_table(rel.target()) {
                if rel.evaluate(&row, target)? {
                    children.push(target.id());
                }
            }
        }
        self.insert_vertex(row);
        for parent in parents {
            self.link(parent, id);
        }
        for child in children {
            self.link(id, child);
        }
        Ok(true)
    }

    /// Adds a parent to child edge between two existing vertices.
    pub fn add_edge(&mut self, parent: RowId, child: RowId) -> Result<bool, RowGraphError> {
        if !self.contains(parent) || !self.contains(child) {
            return Err(RowGraphError::not_found(format!(
                "edge {parent} -> {child} references a missing vertex"
            )));
        }
        Ok(self.link(parent, child))
    }

    pub fn remove(&mut self, id: RowId) -> Option<Row> {
        self.remove_vertex(id)
    }

    pub fn remove_all<I: IntoIterator<Item = RowId>>(&mut self, ids: I) -> usize {
        ids.into_iter()
            .filter_map(|id| self.remove_vertex(id))
            .count()
    }

    /// Keeps only the listed vertices.
    pub fn retain_all(&mut self, keep: &AHashSet<RowId>) -> usize {
        let doomed: Vec<RowId> = self
            .vertices
            .keys()
            .filter(|id| !keep.contains(id))
            .copied()
            .collect();
        self.remove_all(doomed)
    }

    /// Moves every parent and child edge of `from` onto `to`. `from` stays in
    /// the graph with no edges.
    pub fn transfer_relationships(&mut self, from: RowId, to: RowId) -> Result<(), RowGraphError> {
        if from == to {
            return Ok(());
        }
        let (parents, children) = match self.vertices.get(&from) {
            Some(v) => (v.parents().clone(), v.children().clone()),
            None => return Err(RowGraphError::not_found(format!("vertex {from}"))),
        };
        if !self.contains(to) {
            return Err(RowGraphError::not_found(format!("vertex {to}")));
        }
        for parent in parents {
            self.unlink(parent, from);
            if parent != to {
                self.link(parent, to);
            }
        }
        for child in children {
            self.unlink(from, child);
            if child != to {
                self.link(to, child);
            }
        }
        Ok(())
    }

    /// Every row, grouped by table in first-seen order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> + '_ {
        self.table_order
            .iter()
            .flat_map(move |t| self.rows_of_table(t))
    }

    pub fn ids(&self) -> Vec<RowId> {
        self.rows().map(Row::id).collect()
    }

    pub fn rows_of_table(&self, table: &Table) -> Vec<&Row> {
        self.by_table
            .get(table)
            .map(|ids| ids.values().filter_map(|id| self.row(*id)).collect())
            .unwrap_or_default()
    }

    /// Rows whose table type matches, across every schema in the graph.
    pub fn rows_of_type(&self, table_type: &str) -> Vec<&Row> {
        self.table_order
            .iter()
            .filter(|t| t.table_type() == t.fold(table_type))
            .flat_map(|t| self.rows_of_table(t))
            .collect()
    }

    pub fn rows_of_schema(&self, schema_name: &str) -> Vec<&Row> {
        self.table_order
            .iter()
            .filter(|t| t.schema_name() == t.fold(schema_name))
            .flat_map(|t| self.rows_of_table(t))
            .collect()
    }

    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.table_order.clone()
    }

    pub fn schemas(&self) -> BTreeSet<String> {
        self.table_order
            .iter()
            .map(|t| t.schema_name().to_string())
            .collect()
    }

    /// `(table type, row count)` sorted by table type.
    pub fn table_inventory(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for table in &self.table_order {
            let n = self.by_table.get(table).map_or(0, BTreeMap::len);
            *counts.entry(table.table_type().to_string()).or_default() += n;
        }
        counts.into_iter().collect()
    }

    pub fn children(&self, id: RowId) -> Vec<&Row> {
        self.neighbors(id, Vertex::children)
    }

    pub fn parents(&self, id: RowId) -> Vec<&Row> {
        self.neighbors(id, Vertex::parents)
    }

    pub fn children_of_type(&self, id: RowId, table_type: &str) -> Vec<&Row> {
        self.children(id)
            .into_iter()
            .filter(|r| r.table().table_type() == r.table().fold(table_type))
            .collect()
    }

    pub fn parents_of_type(&self, id: RowId, table_type: &str) -> Vec<&Row> {
        self.parents(id)
            .into_iter()
            .filter(|r| r.table().table_type() == r.table().fold(table_type))
            .collect()
    }

    pub fn children_row_ids_hex(&self, id: RowId) -> Vec<String> {
        self.vertex(id)
            .map(|v| v.children().iter().map(RowId::to_hex).collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.vertices.values().map(|v| v.children().len()).sum()
    }

    fn neighbors(&self, id: RowId, pick: fn(&Vertex) -> &BTreeSet<RowId>) -> Vec<&Row> {
        self.vertex(id)
            .map(|v| pick(v).iter().filter_map(|n| self.row(*n)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn insert_vertex(&mut self, row: Row) -> bool {
        let id = row.id();
        if self.vertices.contains_key(&id) {
            return false;
        }
        let table = Arc::clone(row.table());
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.by_table.get_mut(&table) {
            Some(ids) => {
                ids.insert(seq, id);
            }
            None => {
                self.table_order.push(Arc::clone(&table));
                self.by_table.insert(table, BTreeMap::from([(seq, id)]));
            }
        }
        self.vertices.insert(id, Vertex::new(row, seq));
        true
    }

    pub(crate) fn remove_vertex(&mut self, id: RowId) -> Option<Row> {
        let vertex = self.vertices.remove(&id)?;
        for parent in vertex.parents() {
            if let Some(p) = self.vertices.get_mut(parent) {
                p.children_mut().remove(&id);
            }
        }
        for child in vertex.children() {
            if let Some(c) = self.vertices.get_mut(child) {
                c.parents_mut().remove(&id);
            }
        }
        let table = vertex.row().table();
        let emptied = match self.by_table.get_mut(table) {
            Some(ids) => {
                ids.remove(&vertex.seq());
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_table.remove(table);
            self.table_order.retain(|t| t != table);
        }
        debug!(row = %vertex.row(), "vertex removed");
        Some(vertex.row().clone())
    }

    /// Adds `parent -> child`; self edges are ignored.
    pub(crate) fn link(&mut self, parent: RowId, child: RowId) -> bool {
        if parent == child || !self.contains(parent) || !self.contains(child) {
            return false;
        }
        let added = self
            .vertices
            .get_mut(&parent)
            .is_some_and(|p| p.children_mut().insert(child));
        if let Some(c) = self.vertices.get_mut(&child) {
            c.parents_mut().insert(parent);
        }
        added
    }

    pub(crate) fn unlink(&mut self, parent: RowId, child: RowId) {
        if let Some(p) = self.vertices.get_mut(&parent) {
            p.children_mut().remove(&child);
        }
        if let Some(c) = self.vertices.get_mut(&child) {
            c.parents_mut().remove(&parent);
        }
    }

    /// Moves a vertex to a new key, rewriting every edge that points at it.
    pub(crate) fn rekey(&mut self, old: RowId, new: RowId) -> Result<(), RowGraphError> {
        if old == new {
            return Ok(());
        }
        if self.vertices.contains_key(&new) {
            return Err(RowGraphError::reassembly(format!(
                "row id {new} is used by two rows"
            )));
        }
        let vertex = self
            .vertices
            .remove(&old)
            .ok_or_else(|| RowGraphError::reassembly(format!("vertex {old} vanished")))?;
        for parent in vertex.parents() {
            if let Some(p) = self.vertices.get_mut(parent) {
                p.children_mut().remove(&old);
                p.children_mut().insert(new);
            }
        }
        for child in vertex.children() {
            if let Some(c) = self.vertices.get_mut(child) {
                c.parents_mut().remove(&old);
                c.parents_mut().insert(new);
            }
        }
        if let Some(ids) = self.by_table.get_mut(vertex.row().table()) {
            ids.insert(vertex.seq(), new);
        }
        self.vertices.insert(new, vertex);
        Ok(())
    }
}
