//! Duplicate detection and foreign-key repair over an assembled row graph.
//!
//! Severity codes:
//!
//! | code | meaning |
//! |------|---------|
//! | 10   | duplicate removed, rows equal apart from load date (and the owned id when remapped) |
//! | 11   | duplicate owned-id row removed, data equal apart from owned id and load date |
//! | 20   | foreign key set to its not-applicable value |
//! | 30   | duplicate removed on unique-key equality |
//! | 31   | duplicate owned-id row removed on unique-key equality, owned id remapped |
//! | 50   | row removed, foreign key cannot be repaired |
//! | 60   | rows share an owned id but not their unique keys, duplicate dropped without transfer |

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    errors::RowGraphError,
    graph::RowGraph,
    remap::RemapLedger,
    row::{Row, RowId},
    schema::{Schema, Table},
    value::ColumnValue,
};

pub const LEGEND: [(u32, &str); 7] = [
    (
        10,
        "duplicate row removed and its relationships transferred; rows equal apart from load date",
    ),
    (
        11,
        "duplicate owned-id row removed and its relationships transferred; data equal apart from owned id and load date",
    ),
    (20, "foreign key set to its not-applicable value"),
    (
        30,
        "duplicate row removed and its relationships transferred; unique keys equal",
    ),
    (
        31,
        "duplicate owned-id row removed and its relationships transferred; unique keys equal, owned id remapped",
    ),
    (50, "row removed because a foreign key could not be repaired"),
    (
        60,
        "rows share an owned id but differ on unique keys; duplicate removed without transfer",
    ),
];

/// Which severity codes are informational.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedErrors {
    Nothing,
    UpTo(u32),
    Codes(BTreeSet<u32>),
}

impl AllowedErrors {
    /// Parses `<=N` or a comma or space separated list of codes.
    pub fn parse(text: &str) -> Result<Self, RowGraphError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(AllowedErrors::Nothing);
        }
        if let Some(limit) = trimmed.strip_prefix("<=") {
            return limit
                .trim()
                .parse()
                .map(AllowedErrors::UpTo)
                .map_err(|_| RowGraphError::invalid_input(format!("bad allowed errors {text}")));
        }
        let mut codes = BTreeSet::new();
        for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
            if part.is_empty() {
                continue;
            }
            codes.insert(part.parse().map_err(|_| {
                RowGraphError::invalid_input(format!("bad severity code {part} in {text}"))
            })?);
        }
        Ok(AllowedErrors::Codes(codes))
    }

    pub fn allows(&self, code: u32) -> bool {
        match self {
            AllowedErrors::Nothing => false,
            AllowedErrors::UpTo(limit) => code <= *limit,
            AllowedErrors::Codes(codes) => codes.contains(&code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub code: u32,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Violations {
    allowed: AllowedErrors,
    counts: BTreeMap<u32, usize>,
    records: Vec<Violation>,
    max_code: Option<u32>,
    valid: bool,
}

impl Violations {
    pub fn new(allowed: AllowedErrors) -> Self {
        Self {
            allowed,
            counts: BTreeMap::new(),
            records: Vec::new(),
            max_code: None,
            valid: true,
        }
    }

    pub fn add(&mut self, code: u32, message: String) {
        if self.allowed.allows(code) {
            warn!(code, "{message}");
        } else {
            error!(code, "{message}");
            self.valid = false;
        }
        *self.counts.entry(code).or_default() += 1;
        self.max_code = Some(self.max_code.map_or(code, |m| m.max(code)));
        self.records.push(Violation { code, message });
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn max_code(&self) -> Option<u32> {
        self.max_code
    }

    pub fn count(&self, code: u32) -> usize {
        self.counts.get(&code).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<u32, usize> {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Violation] {
        &self.records
    }

    /// `"10:2  50:1"`, or `"none"`.
    pub fn counts_summary(&self) -> String {
        if self.counts.is_empty() {
            return String::from("none");
        }
        self.counts
            .iter()
            .map(|(code, n)| format!("{code}:{n}"))
            .collect::<Vec<_>>()
            .join("  ")
    }

    pub fn legend() -> String {
        LEGEND
            .iter()
            .map(|(code, text)| format!("{code}: {text}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug)]
pub struct ConstraintReport {
    pub violations: Violations,
    pub removed: Vec<Row>,
    /// Foreign-key values rewritten through the identity map.
    pub rewritten: usize,
    /// Owned-id remaps recorded in the remap ledger.
    pub remapped: usize,
}

impl ConstraintReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_valid()
    }

    pub fn max_code(&self) -> Option<u32> {
        self.violations.max_code()
    }

    pub fn counts_summary(&self) -> String {
        self.violations.counts_summary()
    }
}

pub struct ConstraintResolver<'a> {
    schema: &'a Schema,
    allowed: AllowedErrors,
    source: String,
}

/// Identifier name to original value to surviving value.
type IdMap = BTreeMap<String, AHashMap<i64, i64>>;

impl<'a> ConstraintResolver<'a> {
    /// Uses the schema's configured allow-list and remap source.
    pub fn new(schema: &'a Schema) -> Result<Self, RowGraphError> {
        let config = schema.config();
        Ok(Self {
            schema,
            allowed: AllowedErrors::parse(&config.allowed_errors)?,
            source: config.remap_source.clone(),
        })
    }

    pub fn with_allowed(mut self, allowed: AllowedErrors) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    /// Runs the four passes, mutating `graph` in place.
    pub fn resolve(
        &self,
        graph: &mut RowGraph,
        remap: &RemapLedger,
    ) -> Result<ConstraintReport, RowGraphError> {
        let mut report = ConstraintReport {
            violations: Violations::new(self.allowed.clone()),
            removed: Vec::new(),
            rewritten: 0,
            remapped: 0,
        };
        let mut id_map: IdMap = self
            .schema
            .owned_ids()
            .into_iter()
            .map(|id| (id, AHashMap::new()))
            .collect();

        self.owned_id_pass(graph, &mut id_map, &mut report)?;
        self.owner_unique_key_pass(graph, &mut id_map, remap, &mut report)?;
        self.foreign_key_pass(graph, &mut id_map, &mut report)?;
        self.non_owner_unique_key_pass(graph, &mut report)?;

        info!(
            valid = report.is_valid(),
            counts = %report.counts_summary(),
            remaining = graph.len(),
            "constraints resolved"
        );
        Ok(report)
    }

    fn owner_tables(&self, graph: &RowGraph) -> Vec<Arc<Table>> {
        graph
            .tables()
            .into_iter()
            .filter(|t| t.is_id_owner() && self.in_schema(t))
            .collect()
    }

    fn in_schema(&self, table: &Table) -> bool {
        table.schema_name() == self.schema.name()
    }

    fn owned_id_pass(
        &self,
        graph: &mut RowGraph,
        id_map: &mut IdMap,
        report: &mut ConstraintReport,
    ) -> Result<(), RowGraphError> {
        for table in self.owner_tables(graph) {
            let Some(id_name) = table.owned_id().map(str::to_string) else {
                continue;
            };
            let ids = row_ids(graph, &table);
            let mut doomed = AHashSet::new();
            for (i, keep_id) in ids.iter().enumerate() {
                if doomed.contains(keep_id) {
                    continue;
                }
                let Some(keep) = graph.row(*keep_id).cloned() else {
                    continue;
                };
                let Some(value) = keep.owned_id_value() else {
                    continue;
                };
                let map = id_map.entry(id_name.clone()).or_default();
                if map.contains_key(&value) {
                    continue;
                }
                map.insert(value, value);
                for other_id in &ids[i + 1..] {
                    if doomed.contains(other_id) {
                        continue;
                    }
                    let Some(other) = graph.row(*other_id).cloned() else {
                        continue;
                    };
                    if other.owned_id_value() != Some(value) {
                        continue;
                    }
                    if table.primary_keys().len() > 1 && !keep.equal_primary_keys(&other) {
                        continue;
                    }
                    if keep.equal_all_but_load_date(&other) {
                        report.violations.add(
                            10,
                            format!("{other} duplicates {keep}; removed, relationships transferred"),
                        );
                        graph.transfer_relationships(*other_id, *keep_id)?;
                    } else if keep.equal_unique_keys(&other) {
                        report.violations.add(
                            30,
                            format!(
                                "{other} has the unique keys of {keep}; removed, relationships transferred"
                            ),
                        );
                        graph.transfer_relationships(*other_id, *keep_id)?;
                    } else {
                        report.violations.add(
                            60,
                            format!(
                                "{other} shares {id_name}={value} with {keep} but not its unique keys; removed"
                            ),
                        );
                    }
                    doomed.insert(*other_id);
                }
            }
            remove_marked(graph, &ids, &doomed, report);
        }
        Ok(())
    }

    fn owner_unique_key_pass(
        &self,
        graph: &mut RowGraph,
        id_map: &mut IdMap,
        remap: &RemapLedger,
        report: &mut ConstraintReport,
    ) -> Result<(), RowGraphError> {
        for table in self.owner_tables(graph) {
            if table.unique_keys().is_empty() {
                continue;
            }
            let Some(id_name) = table.owned_id().map(str::to_string) else {
                continue;
            };
            let without_id: Vec<usize> = (0..table.columns().len())
                .filter(|i| Some(*i) != table.owned_id_index())
                .collect();
            let data = table.data_columns();
            let ids = row_ids(graph, &table);
            let mut doomed = AHashSet::new();
            for (i, keep_id) in ids.iter().enumerate() {
                if doomed.contains(keep_id) {
                    continue;
                }
                let Some(keep) = graph.row(*keep_id).cloned() else {
                    continue;
                };
                for other_id in &ids[i + 1..] {
                    if doomed.contains(other_id) {
                        continue;
                    }
                    let Some(other) = graph.row(*other_id).cloned() else {
                        continue;
                    };
                    if !keep.equal_unique_keys(&other) {
                        continue;
                    }
                    let code = if keep.equal_on(&other, &without_id) {
                        10
                    } else if keep.equal_on(&other, &data) {
                        11
                    } else {
                        31
                    };
                    report.violations.add(
                        code,
                        format!(
                            "{other} has the unique keys of {keep}; removed, relationships transferred"
                        ),
                    );
                    graph.transfer_relationships(*other_id, *keep_id)?;
                    if let (Some(from), Some(to)) = (other.owned_id_value(), keep.owned_id_value()) {
                        if from != to {
                            id_map.entry(id_name.clone()).or_default().insert(from, to);
                            remap.add_current_id(&self.source, &id_name, from, to)?;
                            report.remapped += 1;
                        }
                    }
                    doomed.insert(*other_id);
                }
            }
            remove_marked(graph, &ids, &doomed, report);
        }
        Ok(())
    }

    /// Rewrites foreign keys through `id_map` until no removal evicts an
    /// owned id that other rows may still reference.
    fn foreign_key_pass(
        &self,
        graph: &mut RowGraph,
        id_map: &mut IdMap,
        report: &mut ConstraintReport,
    ) -> Result<(), RowGraphError> {
        for _ in 0..=graph.len() {
            let mut doomed = Vec::new();
            let mut again = false;
            for id in graph.ids() {
                let Some(row) = graph.row(id).cloned() else {
                    continue;
                };
                let table = row.table().clone();
                if !self.in_schema(&table) {
                    continue;
                }
                let mut remove_row = false;
                for &index in table.foreign_keys() {
                    let column = &table.columns()[index];
                    let value = &row.values()[index];
                    if column.is_na(value) {
                        continue;
                    }
                    let target = match column.dynamic_foreign_key() {
                        Some(name_column) => match row.value_of(name_column) {
                            Some(ColumnValue::Text(name)) => table.fold(name),
                            _ => String::new(),
                        },
                        None => column.foreign_key_target().unwrap_or_default().to_string(),
                    };
                    let owner = self
                        .schema
                        .owner_of(&target)
                        .map(|t| t.table_type().to_string());
                    let mapped = value
                        .as_i64()
                        .and_then(|v| id_map.get(&target).and_then(|m| m.get(&v)).copied());
                    if column.is_fixed() {
                        if mapped.is_none() {
                            warn!(
                                column = column.name(),
                                table = %table,
                                row = %row,
                                "fixed foreign key does not resolve; left as is"
                            );
                        }
                        continue;
                    }
                    match mapped {
                        Some(current) => {
                            if value.as_i64() != Some(current) {
                                if let Some(r) = graph.row_mut(id) {
                                    r.set_value(index, ColumnValue::Integer(current))?;
                                }
                                report.rewritten += 1;
                            }
                        }
                        None => {
                            let missing = describe_missing(owner.as_deref(), &target, value);
                            if let Some(na) = column.na_value() {
                                report.violations.add(
                                    20,
                                    format!(
                                        "{row}: foreign key {} {missing}; set to {na}",
                                        column.name()
                                    ),
                                );
                                if let Some(r) = graph.row_mut(id) {
                                    r.set_value(index, na.clone())?;
                                }
                            } else {
                                report.violations.add(
                                    50,
                                    format!(
                                        "{row}: foreign key {} {missing}; row removed",
                                        column.name()
                                    ),
                                );
                                remove_row = true;
                                break;
                            }
                        }
                    }
                }
                if remove_row {
                    if let (Some(owned), Some(value)) = (table.owned_id(), row.owned_id_value()) {
                        if id_map
                            .get_mut(owned)
                            .and_then(|m| m.remove(&value))
                            .is_some()
                        {
                            again = true;
                        }
                    }
                    doomed.push(id);
                }
            }
            for id in doomed {
                if let Some(row) = graph.remove(id) {
                    report.removed.push(row);
                }
            }
            if !again {
                return Ok(());
            }
        }
        Ok(())
    }

    fn non_owner_unique_key_pass(
        &self,
        graph: &mut RowGraph,
        report: &mut ConstraintReport,
    ) -> Result<(), RowGraphError> {
        let tables: Vec<_> = graph
            .tables()
            .into_iter()
            .filter(|t| !t.is_id_owner() && !t.unique_keys().is_empty() && self.in_schema(t))
            .collect();
        for table in tables {
            let ids = row_ids(graph, &table);
            let mut doomed = AHashSet::new();
            for (i, keep_id) in ids.iter().enumerate() {
                if doomed.contains(keep_id) {
                    continue;
                }
                let Some(keep) = graph.row(*keep_id).cloned() else {
                    continue;
                };
                for other_id in &ids[i + 1..] {
                    if doomed.contains(other_id) {
                        continue;
                    }
                    let Some(other) = graph.row(*other_id).cloned() else {
                        continue;
                    };
                    if !keep.equal_unique_keys(&other) {
                        continue;
                    }
                    let code = if keep.equal_all_but_load_date(&other) {
                        10
                    } else {
                        30
                    };
                    report.violations.add(
                        code,
                        format!(
                            "{other} has the unique keys of {keep}; removed, relationships transferred"
                        ),
                    );
                    graph.transfer_relationships(*other_id, *keep_id)?;
                    doomed.insert(*other_id);
                }
            }
            remove_marked(graph, &ids, &doomed, report);
        }
        Ok(())
    }
}

impl RowGraph {
    /// Resolves duplicates and broken foreign keys with the schema's settings.
    pub fn check_constraints(
        &mut self,
        schema: &Schema,
        remap: &RemapLedger,
    ) -> Result<ConstraintReport, RowGraphError> {
        ConstraintResolver::new(schema)?.resolve(self, remap)
    }
}

fn row_ids(graph: &RowGraph, table: &Table) -> Vec<RowId> {
    graph.rows_of_table(table).iter().map(|r| r.id()).collect()
}

fn remove_marked(
    graph: &mut RowGraph,
    order: &[RowId],
    doomed: &AHashSet<RowId>,
    report: &mut ConstraintReport,
) {
    for id in order.iter().filter(|id| doomed.contains(id)) {
        if let Some(row) = graph.remove(*id) {
            report.removed.push(row);
        }
    }
}

fn describe_missing(owner: Option<&str>, target: &str, value: &ColumnValue) -> String {
    match owner {
        Some(owner) => format!("has no {owner} row with {target}={value}"),
        None if target.is_empty() => String::from("names no identifier"),
        None => format!("refers to {target}, which no table in the schema owns"),
    }
}
