use std::{collections::VecDeque, sync::Arc};

use ahash::AHashMap;
use tracing::{debug, warn};

use super::RowGraph;
use crate::{
    errors::RowGraphError,
    row::{Row, RowId},
    schema::{Schema, Table},
    store::StoreAccess,
};

/// Counters from one breadth-first expansion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Vertices created.
    pub added: usize,
    /// Rows that were already in the graph and only gained an edge.
    pub merged: usize,
    /// Relationship batches whose execution failed.
    pub failed_batches: usize,
    /// Source rows whose child count broke the relationship's multiplicity.
    pub multiplicity_breaches: usize,
}

struct Pending {
    row: Row,
    parent: Option<RowId>,
}

/// Not-yet-expanded rows grouped by table, tables served in arrival order.
#[derive(Default)]
struct Frontier {
    order: VecDeque<Arc<Table>>,
    batches: AHashMap<Arc<Table>, Vec<Pending>>,
}

impl Frontier {
    fn push(&mut self, pending: Pending) {
        let table = Arc::clone(pending.row.table());
        match self.batches.get_mut(&table) {
            Some(batch) => batch.push(pending),
            None => {
                self.order.push_back(Arc::clone(&table));
                self.batches.insert(table, vec![pending]);
            }
        }
    }

    fn pop(&mut self) -> Option<(Arc<Table>, Vec<Pending>)> {
        let table = self.order.pop_front()?;
        let batch = self.batches.remove(&table).unwrap_or_default();
        Some((table, batch))
    }
}

enum Expansion<'a> {
    Store {
        schema: &'a Schema,
        store: &'a dyn StoreAccess,
    },
    Graph(&'a RowGraph),
}

impl RowGraph {
    /// Builds the graph breadth-first from `seeds`, following every
    /// relationship whose source is the table being expanded.
    ///
    /// A returned row whose id is already present creates no vertex; the new
    /// parent edge is moved onto the existing vertex instead. Failed
    /// relationship executions are logged and yield no children.
    pub fn assemble(
        &mut self,
        schema: &Schema,
        store: &dyn StoreAccess,
        seeds: Vec<Row>,
    ) -> Result<AssemblyReport, RowGraphError> {
        let mut frontier = Frontier::default();
        for row in seeds {
            if schema.table(row.table().table_type()).as_ref() != Some(row.table()) {
                return Err(RowGraphError::invalid_input(format!(
                    "seed {row} is not a row of schema {}",
                    schema.name()
                )));
            }
            frontier.push(Pending { row, parent: None });
        }
        Ok(self.expand(frontier, Expansion::Store { schema, store }))
    }

    /// Seeds assembly with every row `store` returns for a where clause.
    pub fn assemble_from_query(
        &mut self,
        schema: &Schema,
        store: &dyn StoreAccess,
        table_type: &str,
        where_clause: &str,
    ) -> Result<AssemblyReport, RowGraphError> {
        let table = schema
            .table(table_type)
            .ok_or_else(|| RowGraphError::not_found(format!("table type {table_type}")))?;
        let seeds = store.select(&table, where_clause)?;
        self.assemble(schema, store, seeds)
    }

    /// Copies the part of this graph reachable from `seeds` through existing
    /// edges into a new graph. No store is queried.
    pub fn sub_graph(&self, seeds: &[RowId]) -> RowGraph {
        let mut frontier = Frontier::default();
        for id in seeds {
            if let Some(row) = self.row(*id) {
                frontier.push(Pending {
                    row: row.clone(),
                    parent: None,
                });
            }
        }
        let mut sub = RowGraph::new();
        sub.expand(frontier, Expansion::Graph(self));
        sub
    }

    pub fn sub_graph_of_table(&self, table_type: &str) -> RowGraph {
        let seeds: Vec<RowId> = self.rows_of_type(table_type).iter().map(|r| r.id()).collect();
        self.sub_graph(&seeds)
    }

    pub fn sub_graph_of_schema(&self, schema_name: &str) -> RowGraph {
        let seeds: Vec<RowId> = self
            .rows_of_schema(schema_name)
            .iter()
            .map(|r| r.id())
            .collect();
        self.sub_graph(&seeds)
    }

    fn expand(&mut self, mut frontier: Frontier, expansion: Expansion<'_>) -> AssemblyReport {
        let mut report = AssemblyReport::default();
        while let Some((table, batch)) = frontier.pop() {
            let mut fresh = Vec::with_capacity(batch.len());
            for pending in batch {
                let id = pending.row.id();
                if self.contains(id) {
                    if let Some(parent) = pending.parent {
                        self.link(parent, id);
                    }
                    report.merged += 1;
                    continue;
                }
                self.insert_vertex(pending.row.clone());
                if let Some(parent) = pending.parent {
                    self.link(parent, id);
                }
                report.added += 1;
                fresh.push(pending.row);
            }
            if fresh.is_empty() {
                continue;
            }
            debug!(table = %table, rows = fresh.len(), "expanding batch");
            match &expansion {
                Expansion::Store { schema, store } => {
                    let chunk_size = schema.config().lump_chunk_size;
                    for rel in schema.relationships_from(&table) {
                        let results = match rel.execute_batch(*store, &fresh, chunk_size) {
                            Ok(results) => results,
                            Err(err) => {
                                warn!(
                                    relationship = %rel.id(),
                                    rows = fresh.len(),
                                    error = %err,
                                    "relationship batch failed"
                                );
                                report.failed_batches += 1;
                                continue;
                            }
                        };
                        let mut counts = vec![0usize; fresh.len()];
                        for (index, _) in &results {
                            counts[*index] += 1;
                        }
                        for (row, count) in fresh.iter().zip(&counts) {
                            if rel.preconditions_hold(row) && rel.constraint_violated(*count) {
                                warn!(
                                    relationship = %rel.id(),
                                    row = %row,
                                    count = *count,
                                    constraint = rel.multiplicity().as_str(),
                                    "relationship multiplicity not met"
                                );
                                report.multiplicity_breaches += 1;
                            }
                        }
                        for (index, child) in results {
                            frontier.push(Pending {
                                row: child,
                                parent: Some(fresh[index].id()),
                            });
                        }
                    }
                }
                Expansion::Graph(source) => {
                    for row in &fresh {
                        for child in source.children(row.id()) {
                            frontier.push(Pending {
                                row: child.clone(),
                                parent: Some(row.id()),
                            });
                        }
                    }
                }
            }
        }
        report
    }
}
