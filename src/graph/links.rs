use tracing::debug;

use super::RowGraph;
use crate::{
    errors::RowGraphError,
    row::{Row, RowId},
};

/// Edges of one vertex recorded by hex id while rows are still arriving.
#[derive(Clone, Debug)]
pub(crate) struct PendingLinks {
    id: RowId,
    children: Vec<String>,
    parents: Vec<String>,
}

/// A row with its adjacency expressed as ids rather than vertices.
#[derive(Clone, Debug)]
pub struct LinkedRow {
    pub id: RowId,
    pub row: Row,
    pub children: Vec<RowId>,
    pub parents: Vec<RowId>,
}

impl RowGraph {
    /// Adds a row keyed by `id` and remembers its edges, given as hex row
    /// ids, until [`RowGraph::create_links`] runs.
    pub fn add_unlinked(
        &mut self,
        id: RowId,
        mut row: Row,
        children: Vec<String>,
        parents: Vec<String>,
    ) -> bool {
        row.assign_id(id);
        if !self.insert_vertex(row) {
            return false;
        }
        self.pending.push(PendingLinks {
            id,
            children,
            parents,
        });
        true
    }

    /// Resolves every recorded edge, then recomputes each row id from the
    /// row's values and re-keys vertices whose id changed. An edge naming a
    /// row that is not in the graph is fatal.
    pub fn create_links(&mut self) -> Result<usize, RowGraphError> {
        let pending = std::mem::take(&mut self.pending);
        let mut edges = 0;
        for entry in &pending {
            for hex in &entry.children {
                let child = self.resolve(hex, entry.id)?;
                if self.link(entry.id, child) {
                    edges += 1;
                }
            }
            for hex in &entry.parents {
                let parent = self.resolve(hex, entry.id)?;
                if self.link(parent, entry.id) {
                    edges += 1;
                }
            }
        }
        for entry in &pending {
            let Some(row) = self.row_mut(entry.id) else {
                continue;
            };
            let fresh = row.refresh_id();
            if fresh != entry.id {
                debug!(old = %entry.id, new = %fresh, "row id recomputed");
                self.rekey(entry.id, fresh)?;
            }
        }
        Ok(edges)
    }

    fn resolve(&self, hex: &str, from: RowId) -> Result<RowId, RowGraphError> {
        let id = RowId::from_hex(hex)
            .map_err(|e| RowGraphError::reassembly(format!("row {from}: {e}")))?;
        if !self.contains(id) {
            return Err(RowGraphError::reassembly(format!(
                "row {from} references {hex}, which is not in the graph"
            )));
        }
        Ok(id)
    }

    /// Flattens the graph into rows with id lists, in table order.
    pub fn disassemble(&self) -> Vec<LinkedRow> {
        self.rows()
            .filter_map(|row| self.vertex(row.id()))
            .map(|v| LinkedRow {
                id: v.id(),
                row: v.row().clone(),
                children: v.children().iter().copied().collect(),
                parents: v.parents().iter().copied().collect(),
            })
            .collect()
    }
}
