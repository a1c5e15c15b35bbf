//! Configuration engine: feeder orchestration and typed snapshots.

use std::collections::HashSet;

use crate::Error;
use crate::feeders::Feeder;
use crate::schema::{ConfigShape, FieldKind, Schema, ShapedTarget, join_prefixed};
use crate::tracker::{FieldPopulation, FieldTracker, SharedTracker, SourceKind};
use crate::value::ConfigValue;

/// An immutable deep copy of a fed configuration target.
///
/// A snapshot plus its population records is the unit of comparison for
/// the diff engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    tree: ConfigValue,
}

impl ConfigSnapshot {
    /// Captures the current contents of a target.
    pub fn capture(target: &dyn ShapedTarget) -> Self {
        Self {
            tree: target.to_tree(),
        }
    }

    /// Wraps an existing tree.
    pub fn from_tree(tree: ConfigValue) -> Self {
        Self { tree }
    }

    /// The underlying generic tree.
    pub fn tree(&self) -> &ConfigValue {
        &self.tree
    }

    /// Exports the snapshot as JSON (durations as canonical strings).
    pub fn to_json(&self) -> serde_json::Value {
        self.tree.to_json()
    }
}

/// A successful configuration load.
#[derive(Debug)]
pub struct Loaded<T> {
    /// The populated typed target.
    pub config: T,

    /// Snapshot of the populated tree, for later diffing.
    pub snapshot: ConfigSnapshot,
}

/// Runs feeders in registration order against a configuration target.
///
/// All feeders share one [`FieldTracker`]; ambiguous collisions are
/// permitted — the last writer wins and every record stays in the tracker
/// for audit. Fields with `default` tags that no feeder populated receive
/// their default after the feed pass.
pub struct ConfigEngine {
    feeders: Vec<Box<dyn Feeder>>,
    tracker: SharedTracker,
    verbose: bool,
}

impl std::fmt::Debug for ConfigEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigEngine")
            .field("feeders", &self.feeders.len())
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl Default for ConfigEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigEngine {
    /// Creates an engine with no feeders.
    pub fn new() -> Self {
        Self {
            feeders: Vec::new(),
            tracker: FieldTracker::shared(),
            verbose: false,
        }
    }

    /// Appends a feeder; feeders run in registration order.
    pub fn add_feeder(&mut self, feeder: Box<dyn Feeder>) -> &mut Self {
        self.feeders.push(feeder);
        self
    }

    /// Enables verbose feed debugging on all feeders.
    pub fn set_verbose_debug(&mut self, enabled: bool) {
        self.verbose = enabled;
    }

    /// Handle to the shared tracker.
    pub fn tracker(&self) -> SharedTracker {
        SharedTracker::clone(&self.tracker)
    }

    /// Defensive copy of all population records so far.
    pub fn records(&self) -> Vec<FieldPopulation> {
        self.tracker.records()
    }

    /// Loads a typed configuration.
    ///
    /// Validates the schema, runs all feeders, applies defaults, and
    /// returns the typed value with its snapshot.
    pub fn load<T: ConfigShape>(&mut self) -> Result<Loaded<T>, Error> {
        let mut config = T::default();
        let snapshot = self.load_into(&mut config)?;
        Ok(Loaded { config, snapshot })
    }

    /// Loads into an existing target, returning the resulting snapshot.
    pub fn load_into(&mut self, target: &mut dyn ShapedTarget) -> Result<ConfigSnapshot, Error> {
        let schema = target.schema();
        schema.validate()?;

        for feeder in &mut self.feeders {
            feeder.set_tracker(SharedTracker::clone(&self.tracker));
            feeder.set_verbose_debug(self.verbose);
            feeder.feed(target)?;
        }

        let resolved = self.tracker.resolved_paths();
        apply_defaults(
            schema,
            &mut Vec::new(),
            target,
            &resolved,
            &self.tracker,
        )?;

        Ok(ConfigSnapshot::capture(target))
    }
}

/// Writes schema defaults into leaves no feeder resolved.
fn apply_defaults(
    schema: &'static Schema,
    segments: &mut Vec<&'static str>,
    target: &mut dyn ShapedTarget,
    resolved: &HashSet<String>,
    tracker: &SharedTracker,
) -> Result<(), Error> {
    for field in schema.fields {
        match field.kind {
            FieldKind::Record(nested) => {
                segments.push(field.name);
                apply_defaults(nested(), segments, target, resolved, tracker)?;
                segments.pop();
            }
            // Map entries only exist once a feeder created them; defaults
            // cannot invent keys.
            FieldKind::RecordMap(_) => {}
            _ => {
                let Some(literal) = field.default else { continue };
                let path = join_prefixed(&segments.join("."), field.name);
                if resolved.contains(&path) {
                    continue;
                }

                let value = field.kind.parse_str(literal).map_err(|e| Error::CannotConvert {
                    value: e.value,
                    target: e.expected.to_string(),
                    path: path.clone(),
                    origin: SourceKind::Default,
                })?;

                let mut full = segments.clone();
                full.push(field.name);
                target
                    .set_value(&full, value.clone())
                    .map_err(|e| crate::feeders::wrap_set_error(&path, e))?;

                tracker.record(FieldPopulation {
                    path,
                    field_type: field.type_name.to_string(),
                    feeder: "engine".to_string(),
                    source_kind: SourceKind::Default,
                    source_key: literal.to_string(),
                    search_keys: Vec::new(),
                    found_key: literal.to_string(),
                    instance_key: String::new(),
                    value,
                });
            }
        }
    }
    Ok(())
}
