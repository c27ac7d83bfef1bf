//! Priority lookups read from a ranking table, used to choose one row among
//! several candidates. A lower rank wins; unranked items sort last.

use std::sync::Arc;

use ahash::AHashMap;
use tracing::warn;

use crate::{errors::RowGraphError, row::Row, schema::Table, store::StoreAccess};

#[derive(Clone, Debug, Default)]
pub struct RankTable {
    name: String,
    ranks: AHashMap<String, i64>,
    priority: Vec<String>,
}

impl RankTable {
    /// Reads every `(ranked, rank)` pair from `table`. An item ranked twice is
    /// an error.
    pub fn load(
        store: &dyn StoreAccess,
        table: &Arc<Table>,
        ranked_column: &str,
        rank_column: &str,
    ) -> Result<Self, RowGraphError> {
        let column = |name: &str| {
            table.column_index(name).ok_or_else(|| {
                RowGraphError::not_found(format!("{name} is not a column of {}", table.name()))
            })
        };
        let ranked = column(ranked_column)?;
        let rank = column(rank_column)?;
        let mut pairs = Vec::new();
        for row in store.select(table, "")? {
            let value = &row.values()[rank];
            let Some(position) = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
            else {
                return Err(RowGraphError::invalid_input(format!(
                    "rank {value} of {row} is not numeric"
                )));
            };
            pairs.push((row.values()[ranked].to_string(), position));
        }
        if pairs.is_empty() {
            warn!(table = table.name(), "ranking table is empty");
        }
        Self::from_ranks(table.name(), pairs)
    }

    pub fn from_ranks<I, K>(name: &str, pairs: I) -> Result<Self, RowGraphError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        let mut table = Self {
            name: name.to_string(),
            ..Self::default()
        };
        let mut ordered = Vec::new();
        for (item, rank) in pairs {
            let key = fold(item.as_ref());
            if table.ranks.insert(key.clone(), rank).is_some() {
                return Err(RowGraphError::invalid_input(format!(
                    "ranking table {name} ranks {key} more than once"
                )));
            }
            ordered.push((rank, key));
        }
        ordered.sort_by_key(|(rank, _)| *rank);
        table.priority = ordered.into_iter().map(|(_, key)| key).collect();
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ranked items, highest priority first.
    pub fn priority_list(&self) -> &[String] {
        &self.priority
    }

    /// The rank of `item`, or `i64::MAX` when it is not ranked.
    pub fn rank(&self, item: &str) -> i64 {
        self.ranks.get(&fold(item)).copied().unwrap_or(i64::MAX)
    }

    /// The candidate whose `column` value ranks best. Ties keep the earliest
    /// candidate.
    pub fn best<'r, I>(&self, rows: I, column: &str) -> Option<&'r Row>
    where
        I: IntoIterator<Item = &'r Row>,
    {
        let mut best: Option<(&'r Row, i64)> = None;
        for row in rows {
            let rank = row
                .value_of(column)
                .map_or(i64::MAX, |value| self.rank(&value.to_string()));
            if best.is_none_or(|(_, current)| rank < current) {
                best = Some((row, rank));
            }
        }
        best.map(|(row, _)| row)
    }
}

fn fold(item: &str) -> String {
    item.trim().to_uppercase()
}
