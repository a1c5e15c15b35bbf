//! Per-field population tracking.
//!
//! Every feeder reports what it did to each leaf it considered: which
//! search keys it tried, which key answered, and the value it wrote. The
//! accumulated [`FieldPopulation`] records are the audit trail behind a
//! configuration load — when two feeders populate the same path, both
//! records remain and the last writer's value is the live one.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::ConfigValue;

/// Which kind of source a feeder read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Plain environment variables.
    Env,
    /// Environment variables with a prefix/suffix affix.
    EnvAffixed,
    /// A YAML document.
    Yaml,
    /// A JSON document.
    Json,
    /// A TOML document.
    Toml,
    /// A `.env`-style file.
    Dotenv,
    /// The layered base/overrides directory structure.
    BaseLayer,
    /// A schema `default` literal applied by the engine.
    Default,
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Env => "env",
            SourceKind::EnvAffixed => "env_affixed",
            SourceKind::Yaml => "yaml",
            SourceKind::Json => "json",
            SourceKind::Toml => "toml",
            SourceKind::Dotenv => "dotenv",
            SourceKind::BaseLayer => "base_layer",
            SourceKind::Default => "default",
        };
        write!(f, "{name}")
    }
}

/// One attempted or successful population of a leaf field.
#[derive(Debug, Clone)]
pub struct FieldPopulation {
    /// Dotted path of the field.
    pub path: String,

    /// Declared Rust type of the field.
    pub field_type: String,

    /// Stable identity of the feeder that produced this record.
    pub feeder: String,

    /// Kind of source consulted.
    pub source_kind: SourceKind,

    /// The source key actually used (tag, file key, or env var).
    pub source_key: String,

    /// Search keys tried, in priority order.
    pub search_keys: Vec<String>,

    /// The key that answered; empty when the field stayed unresolved.
    pub found_key: String,

    /// Instance key for multi-instance feeders; empty otherwise.
    pub instance_key: String,

    /// The value written (or `None` when unresolved).
    pub value: ConfigValue,
}

impl FieldPopulation {
    /// True when a source key answered and a value was written.
    pub fn resolved(&self) -> bool {
        !self.found_key.is_empty()
    }
}

/// Accumulates population records for the lifetime of a run.
#[derive(Debug, Default)]
pub struct FieldTracker {
    records: Mutex<Vec<FieldPopulation>>,
}

/// Cloneable tracker handle shared between feeders and the engine.
pub type SharedTracker = Arc<FieldTracker>;

impl FieldTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared handle to a fresh tracker.
    pub fn shared() -> SharedTracker {
        Arc::new(Self::new())
    }

    /// Appends one record.
    pub fn record(&self, population: FieldPopulation) {
        self.records.lock().push(population);
    }

    /// Returns a defensive copy of all records, in append order.
    pub fn records(&self) -> Vec<FieldPopulation> {
        self.records.lock().clone()
    }

    /// Records for a single dotted path, in append order.
    pub fn records_for(&self, path: &str) -> Vec<FieldPopulation> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// The set of paths at least one feeder resolved.
    pub fn resolved_paths(&self) -> HashSet<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.resolved())
            .map(|r| r.path.clone())
            .collect()
    }

    /// Drops all records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Display for FieldTracker {
    /// Renders the provenance table:
    ///
    /// ```text
    /// Field Provenance:
    /// --------------------------------------------------
    ///   db.host  <- env [DB_HOST] = prod.example.com
    ///   db.port  <- default [5432] = 5432
    /// ```
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Field Provenance:")?;
        writeln!(f, "{}", "-".repeat(50))?;

        let records = self.records.lock();
        let width = records.iter().map(|r| r.path.len()).max().unwrap_or(0);
        for r in records.iter() {
            if r.resolved() {
                writeln!(
                    f,
                    "  {:<width$}  <- {} [{}] = {}",
                    r.path, r.source_kind, r.found_key, r.value,
                )?;
            } else {
                writeln!(
                    f,
                    "  {:<width$}  <- {} (unresolved, tried {})",
                    r.path,
                    r.source_kind,
                    r.search_keys.join(", "),
                )?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
