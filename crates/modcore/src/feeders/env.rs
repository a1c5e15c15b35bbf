//! Environment variable feeder.

use std::sync::Arc;

use tracing::debug;

use crate::Error;
use crate::catalog::EnvCatalog;
use crate::schema::{FieldKind, Schema, ShapedTarget, join_prefixed};
use crate::tracker::{FieldPopulation, SharedTracker, SourceKind};
use crate::value::ConfigValue;

use super::wrap_set_error;

/// Feeds a target from environment variables through the [`EnvCatalog`].
///
/// For each leaf with an env tag `X`, the search keys are tried in
/// priority order, stopping at the first non-empty hit. With a module
/// context `M` (see [`for_module`](Self::for_module)) the order is
/// `M_X`, `X_M`, `X`; without one it is just `X`. All names are
/// uppercased.
pub struct EnvFeeder {
    module: Option<String>,
    catalog: Arc<EnvCatalog>,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl Default for EnvFeeder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvFeeder {
    /// Creates a feeder against the process-wide catalog.
    pub fn new() -> Self {
        Self::with_catalog(EnvCatalog::global())
    }

    /// Creates a feeder against a private catalog.
    pub fn with_catalog(catalog: Arc<EnvCatalog>) -> Self {
        Self {
            module: None,
            catalog,
            tracker: None,
            verbose: false,
        }
    }

    /// Creates a module-aware feeder: tags are additionally searched under
    /// the module's name.
    pub fn for_module(module: &str) -> Self {
        let mut feeder = Self::new();
        feeder.module = Some(module.to_string());
        feeder
    }

    /// Module-aware variant against a private catalog.
    pub fn for_module_with_catalog(module: &str, catalog: Arc<EnvCatalog>) -> Self {
        let mut feeder = Self::with_catalog(catalog);
        feeder.module = Some(module.to_string());
        feeder
    }

    fn search_keys(&self, tag: &str) -> Vec<String> {
        let tag = tag.to_ascii_uppercase();
        match &self.module {
            Some(module) => {
                let module = module.to_ascii_uppercase();
                vec![
                    format!("{module}_{tag}"),
                    format!("{tag}_{module}"),
                    tag,
                ]
            }
            None => vec![tag],
        }
    }
}

impl super::Feeder for EnvFeeder {
    fn name(&self) -> &str {
        "env"
    }

    fn feed(&mut self, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let spec = EnvWalkSpec {
            feeder: "env",
            source_kind: SourceKind::Env,
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key: "",
        };
        feed_lookup(
            &spec,
            target,
            &|tag| self.search_keys(tag),
            &|key| self.catalog.get(key).map(|(value, _)| value),
        )
    }

    fn set_tracker(&mut self, tracker: SharedTracker) {
        self.tracker = Some(tracker);
    }

    fn set_verbose_debug(&mut self, enabled: bool) {
        self.verbose = enabled;
    }
}

// ============================================================================
// Shared Env-Family Walk
// ============================================================================

/// Parameters shared by every env-family walk.
pub(super) struct EnvWalkSpec<'a> {
    pub feeder: &'a str,
    pub source_kind: SourceKind,
    pub tracker: Option<&'a SharedTracker>,
    pub verbose: bool,
    pub instance_key: &'a str,
}

/// Walks the target schema, resolving each env-tagged leaf through
/// `lookup` with the feeder-specific search key list.
///
/// Record maps are skipped: flat key/value sources cannot enumerate map
/// keys; the instance-aware feeder covers multi-instance shapes instead.
pub(super) fn feed_lookup(
    spec: &EnvWalkSpec<'_>,
    target: &mut dyn ShapedTarget,
    search_keys: &dyn Fn(&str) -> Vec<String>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    let schema = target.schema();
    let mut segments: Vec<&'static str> = Vec::new();
    walk_record(spec, schema, &mut segments, target, search_keys, lookup)
}

fn walk_record(
    spec: &EnvWalkSpec<'_>,
    schema: &'static Schema,
    segments: &mut Vec<&'static str>,
    target: &mut dyn ShapedTarget,
    search_keys: &dyn Fn(&str) -> Vec<String>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    for field in schema.fields {
        match field.kind {
            FieldKind::Record(nested) => {
                segments.push(field.name);
                walk_record(spec, nested(), segments, target, search_keys, lookup)?;
                segments.pop();
            }
            FieldKind::RecordMap(_) => {}
            _ => {
                let Some(tag) = field.env else { continue };
                let keys = search_keys(tag);
                let path = join_prefixed(&segments.join("."), field.name);

                let mut hit: Option<(String, String)> = None;
                for key in &keys {
                    if spec.verbose {
                        debug!(feeder = spec.feeder, field = %path, key = %key, "trying search key");
                    }
                    if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                        if spec.verbose {
                            debug!(feeder = spec.feeder, field = %path, key = %key, "found value");
                        }
                        hit = Some((key.clone(), value));
                        break;
                    }
                }

                match hit {
                    Some((found_key, raw)) => {
                        let value =
                            field.kind.parse_str(&raw).map_err(|e| Error::CannotConvert {
                                value: e.value,
                                target: e.expected.to_string(),
                                path: path.clone(),
                                origin: spec.source_kind,
                            })?;

                        let mut full = segments.clone();
                        full.push(field.name);
                        target
                            .set_value(&full, value.clone())
                            .map_err(|e| wrap_set_error(&path, e))?;

                        track(spec, field_record(spec, &path, field.type_name, keys, found_key, value));
                    }
                    None => {
                        track(
                            spec,
                            field_record(
                                spec,
                                &path,
                                field.type_name,
                                keys,
                                String::new(),
                                ConfigValue::None,
                            ),
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn field_record(
    spec: &EnvWalkSpec<'_>,
    path: &str,
    type_name: &str,
    search_keys: Vec<String>,
    found_key: String,
    value: ConfigValue,
) -> FieldPopulation {
    let source_key = if found_key.is_empty() {
        search_keys.first().cloned().unwrap_or_default()
    } else {
        found_key.clone()
    };
    FieldPopulation {
        path: path.to_string(),
        field_type: type_name.to_string(),
        feeder: spec.feeder.to_string(),
        source_kind: spec.source_kind,
        source_key,
        search_keys,
        found_key,
        instance_key: spec.instance_key.to_string(),
        value,
    }
}

fn track(spec: &EnvWalkSpec<'_>, record: FieldPopulation) {
    if let Some(tracker) = spec.tracker {
        tracker.record(record);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
