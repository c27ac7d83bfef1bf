//! Directed, parameterized edges between two table types.
//!
//! A relationship template is a where clause over the target table in which
//! `#column#` placeholders are bound from a source row. Fragments of the form
//! `'#column#'='literal'` are preconditions on the source row and never reach
//! the store.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    errors::RowGraphError,
    expr::{Expr, split_where},
    pool::BufferPool,
    row::Row,
    schema::Table,
    store::StoreAccess,
    value::{ColumnValue, ValueType},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    ExactlyOne,
    AtMostOne,
    AtLeastOne,
    Any,
}

impl Multiplicity {
    pub fn parse(text: &str) -> Result<Self, RowGraphError> {
        match text.trim().to_ascii_uppercase().as_str() {
            "1" => Ok(Multiplicity::ExactlyOne),
            "0..1" => Ok(Multiplicity::AtMostOne),
            "N" | "1..N" => Ok(Multiplicity::AtLeastOne),
            "" | "0..N" | "*" => Ok(Multiplicity::Any),
            other => Err(RowGraphError::template(format!(
                "unknown relationship constraint {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Multiplicity::ExactlyOne => "1",
            Multiplicity::AtMostOne => "0..1",
            Multiplicity::AtLeastOne => "N",
            Multiplicity::Any => "0..N",
        }
    }

    pub fn is_violated(self, row_count: usize) -> bool {
        match self {
            Multiplicity::ExactlyOne => row_count != 1,
            Multiplicity::AtMostOne => row_count > 1,
            Multiplicity::AtLeastOne => row_count == 0,
            Multiplicity::Any => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Precondition {
    pub column: usize,
    pub literal: String,
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Placeholder(usize),
}

#[derive(Debug)]
pub struct Relationship {
    id: String,
    source: Arc<Table>,
    target: Arc<Table>,
    where_clause: String,
    template: String,
    segments: Vec<Segment>,
    preconditions: Vec<Precondition>,
    condition: Expr,
    lump: Option<(usize, usize)>,
    multiplicity: Multiplicity,
    buffers: BufferPool<String>,
}

impl Relationship {
    pub fn new(
        id: &str,
        source: Arc<Table>,
        target: Arc<Table>,
        where_clause: &str,
        constraint: &str,
    ) -> Result<Self, RowGraphError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RowGraphError::template("relationship id must be set"));
        }
        let multiplicity = Multiplicity::parse(constraint)?;
        let (body, order_by) = split_where(where_clause);
        let body = if body.is_empty() { "1=1" } else { body };
        let (stripped, preconditions) = extract_preconditions(body, &source)?;
        let condition = Expr::parse(&stripped, Some(&source), &target)?;
        // Fan-out keys on the rendered literal, so both sides need one type.
        let lump = condition.single_equality().filter(|(s, t)| {
            let source_type = source.columns()[*s].value_type();
            matches!(source_type, ValueType::Integer | ValueType::Text)
                && target.columns()[*t].value_type() == source_type
        });
        let mut template = format!("WHERE {stripped}");
        if let Some(order_by) = order_by {
            template.push(' ');
            template.push_str(order_by);
        }
        let segments = split_segments(&template, &source)?;
        debug!(
            relationship = id,
            lumpable = lump.is_some(),
            preconditions = preconditions.len(),
            "relationship parsed"
        );
        Ok(Self {
            id: id.to_string(),
            source,
            target,
            where_clause: where_clause.trim().to_string(),
            template,
            segments,
            preconditions,
            condition,
            lump,
            multiplicity,
            buffers: BufferPool::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Arc<Table> {
        &self.source
    }

    pub fn target(&self) -> &Arc<Table> {
        &self.target
    }

    /// The clause as declared, preconditions included.
    pub fn where_clause(&self) -> &str {
        &self.where_clause
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn is_lumpable(&self) -> bool {
        self.lump.is_some()
    }

    pub fn constraint_violated(&self, row_count: usize) -> bool {
        self.multiplicity.is_violated(row_count)
    }

    /// Case-insensitive check of every `'#column#'='literal'` fragment.
    pub fn preconditions_hold(&self, source_row: &Row) -> bool {
        self.preconditions.iter().all(|p| {
            source_row
                .value(p.column)
                .is_some_and(|v| v.to_string().eq_ignore_ascii_case(&p.literal))
        })
    }

    /// Binds every placeholder from `source_row`, producing a where clause.
    pub fn bind(&self, source_row: &Row) -> Result<String, RowGraphError> {
        let mut out = String::with_capacity(self.template.len() + 16);
        self.bind_into(source_row, &mut out)?;
        Ok(out)
    }

    fn bind_into(&self, source_row: &Row, out: &mut String) -> Result<(), RowGraphError> {
        self.check_source(source_row)?;
        out.clear();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(index) => {
                    let value = &source_row.values()[*index];
                    if value.is_null() {
                        return Err(RowGraphError::binding(format!(
                            "relationship {} needs {} but it is null in {source_row}",
                            self.id,
                            self.source.columns()[*index].name()
                        )));
                    }
                    out.push_str(&value.to_sql_literal());
                }
            }
        }
        Ok(())
    }

    /// Runs the relationship for one source row.
    pub fn execute(
        &self,
        store: &dyn StoreAccess,
        source_row: &Row,
    ) -> Result<Vec<Row>, RowGraphError> {
        if !self.preconditions_hold(source_row) {
            return Ok(Vec::new());
        }
        let mut clause = self.buffers.acquire(&store.connection_key(), String::new);
        self.bind_into(source_row, &mut clause)?;
        store.select(&self.target, &clause)
    }

    /// Runs the relationship for a batch of source rows. Each returned pair
    /// holds the index of the producing source row in `batch`.
    ///
    /// Lumpable relationships issue `IN (...)` queries over the distinct
    /// source values, at most `chunk_size` values per query. Otherwise every
    /// row is executed on its own and a failing row is logged and skipped.
    pub fn execute_batch(
        &self,
        store: &dyn StoreAccess,
        batch: &[Row],
        chunk_size: usize,
    ) -> Result<Vec<(usize, Row)>, RowGraphError> {
        let eligible: Vec<usize> = (0..batch.len())
            .filter(|&i| self.preconditions_hold(&batch[i]))
            .collect();
        match self.lump {
            Some((source_col, target_col)) if eligible.len() > 1 => {
                self.execute_lumped(store, batch, &eligible, source_col, target_col, chunk_size)
            }
            _ => {
                let mut results = Vec::new();
                for index in eligible {
                    match self.execute(store, &batch[index]) {
                        Ok(rows) => results.extend(rows.into_iter().map(|r| (index, r))),
                        Err(err) => {
                            warn!(
                                relationship = %self.id,
                                row = %batch[index],
                                error = %err,
                                "relationship execution failed"
                            );
                        }
                    }
                }
                Ok(results)
            }
        }
    }

    fn execute_lumped(
        &self,
        store: &dyn StoreAccess,
        batch: &[Row],
        eligible: &[usize],
        source_col: usize,
        target_col: usize,
        chunk_size: usize,
    ) -> Result<Vec<(usize, Row)>, RowGraphError> {
        let mut by_value: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &index in eligible {
            self.check_source(&batch[index])?;
            let value = &batch[index].values()[source_col];
            if value.is_null() {
                warn!(
                    relationship = %self.id,
                    row = %batch[index],
                    "source value is null, branch skipped"
                );
                continue;
            }
            by_value
                .entry(value.to_sql_literal())
                .or_default()
                .push(index);
        }

        let target_name = self.target.columns()[target_col].name();
        let keys: Vec<&String> = by_value.keys().collect();
        let mut results = Vec::new();
        let mut clause = self.buffers.acquire(&store.connection_key(), String::new);
        for chunk in keys.chunks(chunk_size.max(1)) {
            clause.clear();
            clause.push_str("WHERE ");
            clause.push_str(target_name);
            clause.push_str(" IN (");
            for (i, literal) in chunk.iter().enumerate() {
                if i > 0 {
                    clause.push_str(", ");
                }
                clause.push_str(literal);
            }
            clause.push(')');
            let rows = store.select(&self.target, &clause)?;
            debug!(
                relationship = %self.id,
                values = chunk.len(),
                rows = rows.len(),
                "lumped query"
            );
            for row in rows {
                let key = match row.value(target_col) {
                    Some(ColumnValue::Null) | None => continue,
                    Some(value) => value.to_sql_literal(),
                };
                if let Some(parents) = by_value.get(&key) {
                    for &parent in parents {
                        results.push((parent, row.clone()));
                    }
                }
            }
        }
        results.sort_by_key(|(parent, _)| *parent);
        Ok(results)
    }

    /// Checks the condition between two materialized rows without querying.
    pub fn evaluate(&self, source_row: &Row, target_row: &Row) -> Result<bool, RowGraphError> {
        self.check_source(source_row)?;
        if target_row.table() != &self.target {
            return Err(RowGraphError::invalid_input(format!(
                "relationship {} targets {}, not {}",
                self.id,
                self.target.table_type(),
                target_row.table().table_type()
            )));
        }
        if !self.preconditions_hold(source_row) {
            return Ok(false);
        }
        self.condition.matches(Some(source_row), target_row)
    }

    fn check_source(&self, source_row: &Row) -> Result<(), RowGraphError> {
        if source_row.table() != &self.source {
            return Err(RowGraphError::invalid_input(format!(
                "relationship {} reads from {}, not {}",
                self.id,
                self.source.table_type(),
                source_row.table().table_type()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} {} [{}]",
            self.id,
            self.source.table_type(),
            self.target.table_type(),
            self.template,
            self.multiplicity.as_str()
        )
    }
}

/// Pulls `'#col#'='literal'` fragments out of `body`, replacing each with
/// `1=1`.
fn extract_preconditions(
    body: &str,
    source: &Table,
) -> Result<(String, Vec<Precondition>), RowGraphError> {
    let mut out = String::with_capacity(body.len());
    let mut preconditions = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("'#") {
        let after_open = &rest[start + 2..];
        let Some(close) = after_open.find("#'") else {
            break;
        };
        let name = &after_open[..close];
        let tail = after_open[close + 2..].trim_start();
        let Some(tail) = tail.strip_prefix('=') else {
            out.push_str(&rest[..start + 2]);
            rest = after_open;
            continue;
        };
        let tail = tail.trim_start();
        let Some(literal_body) = tail.strip_prefix('\'') else {
            out.push_str(&rest[..start + 2]);
            rest = after_open;
            continue;
        };
        let end = literal_body.find('\'').ok_or_else(|| {
            RowGraphError::template(format!("unterminated precondition literal in {body}"))
        })?;
        let column = source.column_index(name).ok_or_else(|| {
            RowGraphError::template(format!(
                "precondition column {name} is not in {}",
                source.table_type()
            ))
        })?;
        preconditions.push(Precondition {
            column,
            literal: literal_body[..end].to_string(),
        });
        out.push_str(&rest[..start]);
        out.push_str("1=1");
        rest = &literal_body[end + 1..];
    }
    out.push_str(rest);
    Ok((out, preconditions))
}

fn split_segments(template: &str, source: &Table) -> Result<Vec<Segment>, RowGraphError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut in_quote = false;
    let mut text = String::new();
    while let Some(c) = rest.chars().next() {
        if c == '\'' {
            in_quote = !in_quote;
        }
        if c == '#' && !in_quote {
            let after = &rest[1..];
            let end = after
                .find('#')
                .ok_or_else(|| RowGraphError::template(format!("unmatched # in {template}")))?;
            let name = &after[..end];
            let index = source.column_index(name).ok_or_else(|| {
                RowGraphError::template(format!(
                    "#{name}# is not a column of {}",
                    source.table_type()
                ))
            })?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::Placeholder(index));
            rest = &after[end + 1..];
            continue;
        }
        text.push(c);
        rest = &rest[c.len_utf8()..];
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}
