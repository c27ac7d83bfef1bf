use std::{collections::BTreeMap, fmt};

use parking_lot::Mutex;
use tracing::warn;

use crate::{
    config::{EngineConfig, fold_name},
    errors::RowGraphError,
};

type Mapping = BTreeMap<String, BTreeMap<String, BTreeMap<i64, i64>>>;

/// One recorded remap.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemapEntry {
    pub source: String,
    pub id_name: String,
    pub original: i64,
    pub current: i64,
}

/// Original to current identifier values, per provenance source and
/// identifier name. Later writes replace earlier ones.
pub struct RemapLedger {
    fold_case: bool,
    entries: Mutex<Mapping>,
}

impl RemapLedger {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fold_case: config.fold_case,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add_current_id(
        &self,
        source: &str,
        id_name: &str,
        original: i64,
        current: i64,
    ) -> Result<(), RowGraphError> {
        let (source, id_name) = self.keys(source, id_name)?;
        let mut entries = self.entries.lock();
        let ids = entries
            .entry(source.clone())
            .or_default()
            .entry(id_name.clone())
            .or_default();
        if let Some(previous) = ids.insert(original, current) {
            if previous != current {
                warn!(
                    source = %source,
                    id = %id_name,
                    original,
                    previous,
                    current,
                    "remap overwritten"
                );
            }
        }
        Ok(())
    }

    pub fn get_current_id(&self, source: &str, id_name: &str, original: i64) -> Option<i64> {
        let (source, id_name) = self.keys(source, id_name).ok()?;
        self.entries
            .lock()
            .get(&source)
            .and_then(|by_id| by_id.get(&id_name))
            .and_then(|ids| ids.get(&original))
            .copied()
    }

    /// Removes the mapping only when it still reads `original -> current`.
    pub fn remove_entry(&self, source: &str, id_name: &str, original: i64, current: i64) -> bool {
        let Ok((source, id_name)) = self.keys(source, id_name) else {
            return false;
        };
        let mut entries = self.entries.lock();
        let Some(ids) = entries
            .get_mut(&source)
            .and_then(|by_id| by_id.get_mut(&id_name))
        else {
            warn!(source = %source, id = %id_name, "remap entry not found");
            return false;
        };
        match ids.get(&original) {
            Some(found) if *found == current => {
                ids.remove(&original);
                true
            }
            Some(found) => {
                warn!(
                    source = %source,
                    id = %id_name,
                    original,
                    expected = current,
                    found = *found,
                    "remap entry changed, not removed"
                );
                false
            }
            None => {
                warn!(source = %source, id = %id_name, original, "remap entry not found");
                false
            }
        }
    }

    /// Drops every mapping for one source and identifier name.
    pub fn drop_entries(&self, source: &str, id_name: &str) -> bool {
        let Ok((source, id_name)) = self.keys(source, id_name) else {
            return false;
        };
        let mut entries = self.entries.lock();
        let Some(by_id) = entries.get_mut(&source) else {
            return false;
        };
        let dropped = by_id.remove(&id_name).is_some();
        if by_id.is_empty() {
            entries.remove(&source);
        }
        dropped
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Every mapping, ordered by source, identifier name and original value.
    pub fn entries(&self) -> Vec<RemapEntry> {
        let entries = self.entries.lock();
        let mut out = Vec::new();
        for (source, by_id) in entries.iter() {
            for (id_name, ids) in by_id {
                for (original, current) in ids {
                    out.push(RemapEntry {
                        source: source.clone(),
                        id_name: id_name.clone(),
                        original: *original,
                        current: *current,
                    });
                }
            }
        }
        out
    }

    fn keys(&self, source: &str, id_name: &str) -> Result<(String, String), RowGraphError> {
        let source = fold_name(source, self.fold_case);
        let id_name = fold_name(id_name, self.fold_case);
        if source.is_empty() || id_name.is_empty() {
            return Err(RowGraphError::invalid_input(
                "remap source and identifier name must be set",
            ));
        }
        Ok((source, id_name))
    }
}

impl fmt::Display for RemapLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries();
        let source_width = entries
            .iter()
            .map(|e| e.source.len())
            .chain(["SOURCE".len()])
            .max()
            .unwrap_or(6);
        let id_width = entries
            .iter()
            .map(|e| e.id_name.len())
            .chain(["ID_NAME".len()])
            .max()
            .unwrap_or(7);
        writeln!(
            f,
            "{:<source_width$}  {:<id_width$}  {:>20}  {:>20}",
            "SOURCE", "ID_NAME", "ORIGINAL_ID", "CURRENT_ID"
        )?;
        for e in entries {
            writeln!(
                f,
                "{:<source_width$}  {:<id_width$}  {:>20}  {:>20}",
                e.source, e.id_name, e.original, e.current
            )?;
        }
        Ok(())
    }
}
