//! Allocation of fresh identifier values, per identifier name.
//!
//! Each name owns one gap `[next, last]`. Values handed back through
//! [`IdGapsLedger::return_unused_values`] are reused first, in the order they
//! were returned. A ledger built with [`IdGapsLedger::sequence_backed`] asks
//! the store for every value instead and keeps no gaps.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    config::{EngineConfig, fold_name},
    errors::RowGraphError,
    schema::Schema,
    store::StoreAccess,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub gap_id: i64,
    pub next: i64,
    pub last: i64,
}

impl Gap {
    pub fn is_exhausted(&self) -> bool {
        self.next > self.last
    }

    pub fn remaining(&self) -> u64 {
        if self.is_exhausted() {
            0
        } else {
            (i128::from(self.last) - i128::from(self.next) + 1).min(i128::from(u64::MAX)) as u64
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GapState {
    pub(crate) gaps: BTreeMap<String, Gap>,
    pub(crate) returned: BTreeMap<String, VecDeque<i64>>,
}

#[derive(Default)]
struct Inner {
    state: GapState,
    saved: Option<GapState>,
}

struct Sequences {
    names: BTreeMap<String, String>,
    store: Arc<dyn StoreAccess>,
}

pub struct IdGapsLedger {
    fold_case: bool,
    inner: Mutex<Inner>,
    sequences: Option<Sequences>,
}

impl IdGapsLedger {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fold_case: config.fold_case,
            inner: Mutex::new(Inner::default()),
            sequences: None,
        }
    }

    /// One gap per identifier owned in `schema`, starting after the largest
    /// value the store holds and running to `i64::MAX`.
    pub fn generate(schema: &Schema, store: &dyn StoreAccess) -> Result<Self, RowGraphError> {
        let ledger = Self::new(schema.config());
        let mut gap_id = 1;
        for table in schema.tables() {
            let Some(id_name) = table.owned_id() else {
                continue;
            };
            let max = store.max_id(id_name, table)?.unwrap_or(0).max(0);
            ledger.add_gap(id_name, gap_id, max.saturating_add(1), i64::MAX)?;
            gap_id += 1;
        }
        Ok(ledger)
    }

    /// Allocates through store sequences. `sequences` maps identifier names
    /// to sequence names.
    pub fn sequence_backed<I, K, V>(
        config: &EngineConfig,
        sequences: I,
        store: Arc<dyn StoreAccess>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let names = sequences
            .into_iter()
            .map(|(k, v)| (config.fold(k.as_ref()), v.as_ref().trim().to_string()))
            .collect();
        Self {
            fold_case: config.fold_case,
            inner: Mutex::new(Inner::default()),
            sequences: Some(Sequences { names, store }),
        }
    }

    pub fn is_sequence_backed(&self) -> bool {
        self.sequences.is_some()
    }

    pub fn add_gap(
        &self,
        id_name: &str,
        gap_id: i64,
        next: i64,
        last: i64,
    ) -> Result<(), RowGraphError> {
        let name = self.fold(id_name);
        if name.is_empty() {
            return Err(RowGraphError::invalid_input("identifier name must be set"));
        }
        if last < next {
            return Err(RowGraphError::invalid_input(format!(
                "gap for {name} ends at {last}, before its start {next}"
            )));
        }
        self.inner
            .lock()
            .state
            .gaps
            .insert(name, Gap { gap_id, next, last });
        Ok(())
    }

    /// Next free value for `id_name`. `Ok(None)` means no value is available:
    /// the name is blank or unknown, or its gap is used up.
    pub fn next_id(&self, id_name: &str) -> Result<Option<i64>, RowGraphError> {
        let name = self.fold(id_name);
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(sequences) = &self.sequences {
            let Some(sequence) = sequences.names.get(&name) else {
                error!(id = %name, "no sequence bound to identifier");
                return Ok(None);
            };
            return sequences.store.next_sequence_value(sequence).map(Some);
        }

        let mut inner = self.inner.lock();
        if let Some(value) = inner
            .state
            .returned
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
        {
            debug!(id = %name, value, "reusing returned identifier");
            return Ok(Some(value));
        }
        let Some(gap) = inner.state.gaps.get_mut(&name) else {
            error!(id = %name, "no identifier gap defined");
            return Ok(None);
        };
        if gap.is_exhausted() {
            error!(id = %name, last = gap.last, "out of identifiers");
            return Ok(None);
        }
        let value = gap.next;
        match value.checked_add(1) {
            Some(next) => gap.next = next,
            None => {
                gap.last = value - 1;
                gap.next = value;
            }
        }
        Ok(Some(value))
    }

    /// Queues values for reuse, each name keeping submission order.
    pub fn return_unused_values<I, K>(&self, values: I)
    where
        I: IntoIterator<Item = (K, Vec<i64>)>,
        K: AsRef<str>,
    {
        if self.is_sequence_backed() {
            debug!("sequence-backed ledger ignores returned identifiers");
            return;
        }
        let mut inner = self.inner.lock();
        for (name, ids) in values {
            let name = self.fold(name.as_ref());
            if ids.is_empty() {
                continue;
            }
            inner.state.returned.entry(name).or_default().extend(ids);
        }
    }

    /// Checkpoints the gaps and queued values.
    pub fn save_state(&self) {
        let mut inner = self.inner.lock();
        inner.saved = Some(inner.state.clone());
    }

    /// Rolls back to the last checkpoint. Returns false when there is none.
    pub fn restore_state(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.saved.clone() {
            Some(saved) => {
                inner.state = saved;
                true
            }
            None => false,
        }
    }

    pub fn gap(&self, id_name: &str) -> Option<Gap> {
        self.inner.lock().state.gaps.get(&self.fold(id_name)).copied()
    }

    pub fn gaps(&self) -> Vec<(String, Gap)> {
        self.inner
            .lock()
            .state
            .gaps
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn returned(&self, id_name: &str) -> Vec<i64> {
        self.inner
            .lock()
            .state
            .returned
            .get(&self.fold(id_name))
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn snapshot(&self) -> GapState {
        self.inner.lock().state.clone()
    }

    pub(crate) fn from_state(config: &EngineConfig, state: GapState) -> Self {
        Self {
            fold_case: config.fold_case,
            inner: Mutex::new(Inner { state, saved: None }),
            sequences: None,
        }
    }

    fn fold(&self, name: &str) -> String {
        fold_name(name, self.fold_case)
    }
}

impl fmt::Display for IdGapsLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sequences) = &self.sequences {
            for (name, sequence) in &sequences.names {
                writeln!(f, "{name:<16} sequence {sequence}")?;
            }
            return Ok(());
        }
        writeln!(f, "{:<6} {:<16} {:>20} {:>20}", "GAPID", "ID_NAME", "GAP_START", "GAP_END")?;
        for (name, gap) in self.gaps() {
            writeln!(f, "{:<6} {:<16} {:>20} {:>20}", gap.gap_id, name, gap.next, gap.last)?;
        }
        Ok(())
    }
}
