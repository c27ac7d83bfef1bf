use std::collections::BTreeSet;

use crate::row::{Row, RowId};

/// A row admitted into a [`super::RowGraph`] together with its adjacency.
/// Edges are stored as ids; the graph owns every vertex.
#[derive(Clone, Debug)]
pub struct Vertex {
    row: Row,
    seq: u64,
    parents: BTreeSet<RowId>,
    children: BTreeSet<RowId>,
}

impl Vertex {
    pub(crate) fn new(row: Row, seq: u64) -> Self {
        Self {
            row,
            seq,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub(crate) fn row_mut(&mut self) -> &mut Row {
        &mut self.row
    }

    pub fn id(&self) -> RowId {
        self.row.id()
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn parents(&self) -> &BTreeSet<RowId> {
        &self.parents
    }

    pub fn children(&self) -> &BTreeSet<RowId> {
        &self.children
    }

    pub(crate) fn parents_mut(&mut self) -> &mut BTreeSet<RowId> {
        &mut self.parents
    }

    pub(crate) fn children_mut(&mut self) -> &mut BTreeSet<RowId> {
        &mut self.children
    }
}
