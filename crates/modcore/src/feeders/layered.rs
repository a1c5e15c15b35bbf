//! Layered configuration feeder: `base/` defaults deep-merged with
//! per-environment overrides, plus per-tenant overlays.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::Error;
use crate::schema::{FieldSpec, ShapedTarget};
use crate::tracker::{SharedTracker, SourceKind};

use super::file::{FileFormat, TreeWalkSpec, feed_tree, parse_file};

/// Extension resolution priority for layer files.
const EXTENSIONS: [(&str, FileFormat); 4] = [
    ("yaml", FileFormat::Yaml),
    ("yml", FileFormat::Yaml),
    ("json", FileFormat::Json),
    ("toml", FileFormat::Toml),
];

/// Folds an override layer onto a base layer, returning the combined
/// tree.
///
/// Only when both sides are record-shaped do their keys merge
/// recursively; any other pairing takes the override whole, collections
/// included.
pub(crate) fn overlay_layer(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let folded = match merged.remove(&key) {
                    Some(existing) => overlay_layer(existing, value),
                    None => value,
                };
                merged.insert(key, folded);
            }
            Value::Object(merged)
        }
        (_, replacement) => replacement,
    }
}

/// Feeds a target from a layered directory structure:
///
/// ```text
/// <root>/base/default.{yaml,yml,json,toml}
/// <root>/environments/<env>/overrides.<ext>
/// <root>/base/tenants/<id>.<ext>
/// <root>/environments/<env>/tenants/<id>.<ext>
/// ```
///
/// `feed` merges the base defaults with the environment overrides;
/// `feed_key` overlays the tenant files for one tenant identifier. The
/// first extension found wins, in the order `.yaml > .yml > .json >
/// .toml`, and missing files are not errors.
pub struct LayeredFeeder {
    base_dir: PathBuf,
    environment: String,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl LayeredFeeder {
    /// Creates a feeder rooted at `base_dir` for `environment`.
    pub fn new(base_dir: impl Into<PathBuf>, environment: &str) -> Self {
        Self {
            base_dir: base_dir.into(),
            environment: environment.to_string(),
            tracker: None,
            verbose: false,
        }
    }

    /// Finds `stem.<ext>` under `dir` in extension priority order.
    fn resolve(dir: &Path, stem: &str) -> Option<(PathBuf, FileFormat)> {
        EXTENSIONS.iter().find_map(|(ext, format)| {
            let candidate = dir.join(format!("{stem}.{ext}"));
            candidate.exists().then_some((candidate, *format))
        })
    }

    /// Loads and merges one base file plus one override file.
    fn merged_layers(
        &self,
        base: Option<(PathBuf, FileFormat)>,
        overlay: Option<(PathBuf, FileFormat)>,
    ) -> Result<Value, Error> {
        let mut tree = Value::Object(serde_json::Map::new());
        for (path, format) in [base, overlay].into_iter().flatten() {
            if self.verbose {
                debug!(feeder = "layered", path = %path.display(), "merging layer");
            }
            let layer = parse_file(&path, format)?;
            tree = overlay_layer(tree, layer);
        }
        Ok(tree)
    }

    fn feed_merged(
        &self,
        tree: &Value,
        instance_key: &str,
        target: &mut dyn ShapedTarget,
    ) -> Result<(), Error> {
        let spec = TreeWalkSpec {
            feeder: "layered",
            source_kind: SourceKind::BaseLayer,
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key,
        };
        feed_tree(&spec, target, tree, &layer_keys)
    }
}

/// Candidate document keys for a field in a merged layer tree.
///
/// The merged tree can combine documents of different formats, so every
/// format's tag is a candidate, in extension priority order, duplicates
/// removed.
fn layer_keys(field: &FieldSpec) -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = Vec::with_capacity(3);
    for key in [field.yaml, field.json, field.toml].into_iter().flatten() {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

impl super::Feeder for LayeredFeeder {
    fn name(&self) -> &str {
        "layered"
    }

    fn feed(&mut self, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let base = Self::resolve(&self.base_dir.join("base"), "default");
        let overlay = Self::resolve(
            &self.base_dir.join("environments").join(&self.environment),
            "overrides",
        );
        let tree = self.merged_layers(base, overlay)?;
        self.feed_merged(&tree, "", target)
    }

    /// Feeds the tenant overlay for `tenant_id`.
    fn feed_key(&mut self, tenant_id: &str, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let base = Self::resolve(&self.base_dir.join("base").join("tenants"), tenant_id);
        let overlay = Self::resolve(
            &self
                .base_dir
                .join("environments")
                .join(&self.environment)
                .join("tenants"),
            tenant_id,
        );
        let tree = self.merged_layers(base, overlay)?;
        self.feed_merged(&tree, tenant_id, target)
    }

    fn set_tracker(&mut self, tracker: SharedTracker) {
        self.tracker = Some(tracker);
    }

    fn set_verbose_debug(&mut self, enabled: bool) {
        self.verbose = enabled;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_layer_recurses_records() {
        let base = serde_json::json!({
            "a": 1,
            "b": {"x": 10, "y": 20}
        });
        let overlay = serde_json::json!({
            "b": {"y": 200, "z": 30},
            "c": 3
        });

        let merged = overlay_layer(base, overlay);

        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"]["x"], 10);
        assert_eq!(merged["b"]["y"], 200);
        assert_eq!(merged["b"]["z"], 30);
        assert_eq!(merged["c"], 3);
    }

    #[test]
    fn test_overlay_layer_replaces_collections_whole() {
        let merged = overlay_layer(
            serde_json::json!({"a": [1, 2, 3]}),
            serde_json::json!({"a": [4, 5]}),
        );
        assert_eq!(merged["a"], serde_json::json!([4, 5]));
    }

    #[test]
    fn test_overlay_layer_mixed_shapes_take_override() {
        let merged = overlay_layer(
            serde_json::json!({"a": 1, "b": {"x": 1}}),
            serde_json::json!({"a": {"nested": true}, "b": "flat"}),
        );
        assert_eq!(merged["a"], serde_json::json!({"nested": true}));
        assert_eq!(merged["b"], "flat");
    }

    #[test]
    fn test_resolve_extension_priority() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.toml"), "a = 1\n").unwrap();
        std::fs::write(dir.path().join("default.yaml"), "a: 2\n").unwrap();

        let (path, format) = LayeredFeeder::resolve(dir.path(), "default").unwrap();
        assert_eq!(format, FileFormat::Yaml);
        assert!(path.ends_with("default.yaml"));
    }

    #[test]
    fn test_resolve_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LayeredFeeder::resolve(dir.path(), "default").is_none());
    }
}
