//! Engine settings and command-line parsing.

use serde::{Deserialize, Serialize};

use crate::errors::RowGraphError;

pub const DEFAULT_LUMP_CHUNK_SIZE: usize = 1000;

/// Settings threaded through schema construction, relationship execution and
/// constraint resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fold table, column and identifier names to upper case.
    pub fold_case: bool,
    /// Maximum number of distinct values in one set-membership query.
    pub lump_chunk_size: usize,
    /// Severity codes that are logged but do not invalidate a graph.
    pub allowed_errors: String,
    /// Provenance source the resolver records its remaps under.
    pub remap_source: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fold_case: true,
            lump_chunk_size: DEFAULT_LUMP_CHUNK_SIZE,
            allowed_errors: String::from("<=10"),
            remap_source: String::from("SELF"),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, RowGraphError> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| RowGraphError::invalid_input(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RowGraphError> {
        if self.lump_chunk_size == 0 {
            return Err(RowGraphError::invalid_input(
                "lump_chunk_size must be at least 1",
            ));
        }
        if self.remap_source.trim().is_empty() {
            return Err(RowGraphError::invalid_input("remap_source must be set"));
        }
        Ok(())
    }

    /// Applies the case-folding policy to a name.
    pub fn fold(&self, name: &str) -> String {
        fold_name(name, self.fold_case)
    }
}

pub(crate) fn fold_name(name: &str, fold_case: bool) -> String {
    let trimmed = name.trim();
    if fold_case {
        trimmed.to_uppercase()
    } else {
        trimmed.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLineConfig {
    pub database: String,
    pub schema: Option<String>,
    pub config: Option<String>,
    pub seeds: Vec<String>,
    pub command: String,
}

impl CommandLineConfig {
    pub fn from_args(args: &[&str]) -> Result<Self, String> {
        let mut database = String::from("memory");
        let mut schema = None;
        let mut config = None;
        let mut seeds = Vec::new();
        let mut command = String::from("status");
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match *arg {
                "--db" | "--database" => {
                    database = iter
                        .next()
                        .ok_or_else(|| "--db requires a value".to_string())?
                        .to_string();
                }
                "--schema" => {
                    schema = Some(
                        iter.next()
                            .ok_or_else(|| "--schema requires a value".to_string())?
                            .to_string(),
                    );
                }
                "--config" => {
                    config = Some(
                        iter.next()
                            .ok_or_else(|| "--config requires a value".to_string())?
                            .to_string(),
                    );
                }
                "--seed" => {
                    seeds.push(
                        iter.next()
                            .ok_or_else(|| "--seed requires a value".to_string())?
                            .to_string(),
                    );
                }
                "--command" => {
                    command = iter
                        .next()
                        .ok_or_else(|| "--command requires a value".to_string())?
                        .to_string();
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown flag {other}"));
                }
                _ => {
                    command = arg.to_string();
                }
            }
        }
        Ok(Self {
            database,
            schema,
            config,
            seeds,
            command,
        })
    }

    /// Splits a `TABLE_TYPE:where clause` seed argument.
    pub fn parse_seed(seed: &str) -> Result<(String, String), String> {
        match seed.split_once(':') {
            Some((table, clause)) if !table.trim().is_empty() => {
                Ok((table.trim().to_string(), clause.trim().to_string()))
            }
            _ => Err(format!("seed must look like TABLE:where, got {seed}")),
        }
    }

    pub fn help() -> &'static str {
        "Usage: rowgraph --schema FILE [--db memory|PATH] [--config FILE] \
         [--seed TABLE:where]... [--command status|check|export]\n"
    }
}
