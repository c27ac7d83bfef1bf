//! Moves an assembled graph into the identifier space of a target store.
//!
//! Every owned identifier in the graph is decided once: matched to an
//! existing target row by unique keys, kept because the column is fixed, or
//! given a fresh value from the gap ledger. Decisions land in the remap ledger
//! under the merge source, then every foreign key in the graph is rewritten
//! through it. Every rewrite is logged so [`Merger::rollback`] can put the
//! graph back.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::{
    errors::RowGraphError,
    graph::RowGraph,
    id_gaps::IdGapsLedger,
    remap::RemapLedger,
    row::{Row, RowId},
    schema::{Schema, Table},
    store::StoreAccess,
    value::ColumnValue,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStatistics {
    /// Owned ids matched to an existing target row.
    pub matched: usize,
    /// Owned ids kept because their column is fixed.
    pub fixed: usize,
    /// Owned ids given a fresh value.
    pub allocated: usize,
    /// Foreign-key values changed in the graph.
    pub rewritten: usize,
    /// Owned ids left undecided because no value could be allocated.
    pub unresolved: usize,
}

/// One column value changed by a merge.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoEntry {
    pub row: RowId,
    pub column: usize,
    pub id_name: String,
    pub previous: i64,
    pub current: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Allocated values handed back to the gap ledger.
    pub returned: usize,
    /// Graph values put back to what they were before the merge.
    pub restored: usize,
}

pub struct Merger<'a> {
    schema: &'a Schema,
    target: &'a dyn StoreAccess,
    gaps: &'a IdGapsLedger,
    remap: &'a RemapLedger,
    source: String,
    /// Allocated values per identifier name, with the original they replaced.
    allocations: BTreeMap<String, Vec<(i64, i64)>>,
    undo: Vec<UndoEntry>,
}

impl<'a> Merger<'a> {
    pub fn new(
        schema: &'a Schema,
        target: &'a dyn StoreAccess,
        gaps: &'a IdGapsLedger,
        remap: &'a RemapLedger,
        source: &str,
    ) -> Self {
        Self {
            schema,
            target,
            gaps,
            remap,
            source: schema.config().fold(source),
            allocations: BTreeMap::new(),
            undo: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn merge(&mut self, graph: &mut RowGraph) -> Result<MergeStatistics, RowGraphError> {
        let mut stats = MergeStatistics::default();
        let owners: Vec<_> = graph
            .tables()
            .into_iter()
            .filter(|t| t.is_id_owner() && t.schema_name() == self.schema.name())
            .collect();
        for table in owners {
            let rows: Vec<Row> = graph.rows_of_table(&table).into_iter().cloned().collect();
            for row in rows {
                self.decide(&table, &row, &mut stats)?;
            }
        }
        stats.rewritten = self.rewrite_foreign_keys(graph)?;
        info!(
            source = %self.source,
            matched = stats.matched,
            fixed = stats.fixed,
            allocated = stats.allocated,
            rewritten = stats.rewritten,
            unresolved = stats.unresolved,
            "merge complete"
        );
        Ok(stats)
    }

    fn decide(
        &mut self,
        table: &Table,
        row: &Row,
        stats: &mut MergeStatistics,
    ) -> Result<(), RowGraphError> {
        let (Some(id_name), Some(original)) = (table.owned_id(), row.owned_id_value()) else {
            return Ok(());
        };
        if self
            .remap
            .get_current_id(&self.source, id_name, original)
            .is_some()
        {
            return Ok(());
        }
        let current = if let Some(existing) = self.find_in_target(table, row)? {
            stats.matched += 1;
            existing
        } else if table
            .owned_id_index()
            .and_then(|i| table.column(i))
            .is_some_and(|c| c.is_fixed())
        {
            stats.fixed += 1;
            original
        } else {
            match self.gaps.next_id(id_name)? {
                Some(value) => {
                    stats.allocated += 1;
                    self.allocations
                        .entry(id_name.to_string())
                        .or_default()
                        .push((original, value));
                    value
                }
                None => {
                    warn!(id = id_name, original, row = %row, "no identifier available");
                    stats.unresolved += 1;
                    return Ok(());
                }
            }
        };
        debug!(id = id_name, original, current, "identifier decided");
        self.remap
            .add_current_id(&self.source, id_name, original, current)
    }

    /// The owned id of the target row with the same unique keys, if any.
    fn find_in_target(&self, table: &Table, row: &Row) -> Result<Option<i64>, RowGraphError> {
        if table.unique_keys().is_empty() {
            return Ok(None);
        }
        let Some(stored) = self.schema.table(table.table_type()) else {
            return Ok(None);
        };
        if !self.target.table_exists(stored.name())? {
            return Ok(None);
        }
        let clause = unique_key_clause(table, row);
        let found = self.target.select(&stored, &clause)?;
        match found.as_slice() {
            [] => Ok(None),
            [existing] => Ok(existing.owned_id_value()),
            many => Err(RowGraphError::invalid_input(format!(
                "{} target rows of {} share the unique keys of {row}",
                many.len(),
                table.table_type()
            ))),
        }
    }

    fn rewrite_foreign_keys(&mut self, graph: &mut RowGraph) -> Result<usize, RowGraphError> {
        let mut rewritten = 0;
        for id in graph.ids() {
            let Some(row) = graph.row(id).cloned() else {
                continue;
            };
            let table = row.table();
            for &index in table.foreign_keys() {
                let column = &table.columns()[index];
                let value = &row.values()[index];
                if column.is_fixed() || column.is_na(value) {
                    continue;
                }
                let Some(original) = value.as_i64() else {
                    continue;
                };
                let target = match column.dynamic_foreign_key() {
                    Some(name_column) => match row.value_of(name_column) {
                        Some(ColumnValue::Text(name)) => table.fold(name),
                        _ => continue,
                    },
                    None => match column.foreign_key_target() {
                        Some(target) => target.to_string(),
                        None => continue,
                    },
                };
                let Some(current) = self.remap.get_current_id(&self.source, &target, original)
                else {
                    continue;
                };
                if current != original {
                    if let Some(r) = graph.row_mut(id) {
                        r.set_value(index, ColumnValue::Integer(current))?;
                    }
                    self.undo.push(UndoEntry {
                        row: id,
                        column: index,
                        id_name: target,
                        previous: original,
                        current,
                    });
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }

    /// Fresh values handed out so far, per identifier name.
    pub fn allocated(&self) -> BTreeMap<String, Vec<i64>> {
        self.allocations
            .iter()
            .map(|(name, pairs)| (name.clone(), pairs.iter().map(|(_, v)| *v).collect()))
            .collect()
    }

    /// Rewrites applied to the graph so far, oldest first.
    pub fn undo_log(&self) -> &[UndoEntry] {
        &self.undo
    }

    /// Returns every allocated value to the gap ledger, drops the remaps that
    /// pointed at them and puts back every graph value rewritten to one of
    /// them, newest first. Rewrites to matched or fixed ids stay.
    pub fn rollback(&mut self, graph: &mut RowGraph) -> Result<RollbackSummary, RowGraphError> {
        let allocations = std::mem::take(&mut self.allocations);
        let mut summary = RollbackSummary::default();
        let mut handed_out: BTreeSet<(&str, i64)> = BTreeSet::new();
        for (id_name, pairs) in &allocations {
            for (original, current) in pairs {
                self.remap
                    .remove_entry(&self.source, id_name, *original, *current);
                handed_out.insert((id_name.as_str(), *current));
            }
            summary.returned += pairs.len();
        }

        let mut kept = Vec::new();
        for entry in std::mem::take(&mut self.undo).into_iter().rev() {
            if !handed_out.contains(&(entry.id_name.as_str(), entry.current)) {
                kept.push(entry);
                continue;
            }
            match graph.row_mut(entry.row) {
                Some(row) => {
                    row.set_value(entry.column, ColumnValue::Integer(entry.previous))?;
                    summary.restored += 1;
                }
                None => debug!(row = %entry.row, "rewritten row left the graph"),
            }
        }
        kept.reverse();
        self.undo = kept;

        self.gaps.return_unused_values(
            allocations
                .into_iter()
                .map(|(name, pairs)| (name, pairs.into_iter().map(|(_, v)| v).collect())),
        );
        info!(
            source = %self.source,
            returned = summary.returned,
            restored = summary.restored,
            "merge rolled back"
        );
        Ok(summary)
    }
}

fn unique_key_clause(table: &Table, row: &Row) -> String {
    let terms: Vec<String> = table
        .unique_keys()
        .iter()
        .map(|&i| {
            let name = table.columns()[i].name();
            match &row.values()[i] {
                ColumnValue::Null => format!("{name} IS NULL"),
                value => format!("{name} = {}", value.to_sql_literal()),
            }
        })
        .collect();
    format!("WHERE {}", terms.join(" AND "))
}
