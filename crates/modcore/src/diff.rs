//! Structural diffs between configuration trees.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use crate::Error;
use crate::value::ConfigValue;

/// Recursion bound for the pairwise walk. Configuration trees cannot
/// alias, so depth is the only way a walk could run away.
const MAX_DEPTH: usize = 128;

/// Old and new value of a changed path.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    /// Value in the left (old) tree.
    pub old: ConfigValue,

    /// Value in the right (new) tree.
    pub new: ConfigValue,
}

/// A structured delta between two configuration trees.
///
/// Keyed by dotted path; the three maps are pairwise disjoint. `BTreeMap`
/// keeps iteration lexicographic so downstream consumers (the reload
/// manager in particular) observe a deterministic change order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDiff {
    /// Paths present only in the right tree.
    pub added: BTreeMap<String, ConfigValue>,

    /// Paths present only in the left tree.
    pub removed: BTreeMap<String, ConfigValue>,

    /// Paths present in both trees with different values.
    pub changed: BTreeMap<String, ValueChange>,
}

impl ConfigDiff {
    /// True when nothing was added, removed, or changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// All paths in the diff, lexicographically sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .added
            .keys()
            .chain(self.removed.keys())
            .chain(self.changed.keys())
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// The sub-diff of paths under `section` (the section itself or any
    /// `section.`-prefixed path).
    pub fn scoped(&self, section: &str) -> ConfigDiff {
        let prefix = format!("{section}.");
        let keep = |path: &String| path.as_str() == section || path.starts_with(&prefix);
        ConfigDiff {
            added: self
                .added
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            removed: self
                .removed
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            changed: self
                .changed
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Display for ConfigDiff {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (path, value) in &self.added {
            writeln!(f, "+ {path} = {value}")?;
        }
        for (path, value) in &self.removed {
            writeln!(f, "- {path} = {value}")?;
        }
        for (path, change) in &self.changed {
            writeln!(f, "~ {path}: {} -> {}", change.old, change.new)?;
        }
        Ok(())
    }
}

/// Computes the delta between two trees.
///
/// Walks both trees pairwise by union of keys: a path only in `new` is
/// Added, only in `old` is Removed, in both with unequal values is
/// Changed. Deep equality is structural — records field-by-field, maps
/// key-by-key, arrays position-by-position. Subtrees present on one side
/// only are recorded whole at their root path.
pub fn diff(old: &ConfigValue, new: &ConfigValue) -> Result<ConfigDiff, Error> {
    let mut out = ConfigDiff::default();
    walk(old, new, "", 0, &mut out)?;
    Ok(out)
}

fn walk(
    old: &ConfigValue,
    new: &ConfigValue,
    path: &str,
    depth: usize,
    out: &mut ConfigDiff,
) -> Result<(), Error> {
    if depth > MAX_DEPTH {
        return Err(Error::TreeTooDeep { depth: MAX_DEPTH });
    }

    match (old, new) {
        (ConfigValue::Map(left), ConfigValue::Map(right)) => {
            for (key, old_value) in left {
                let child = child_path(path, key);
                match right.get(key) {
                    Some(new_value) => walk(old_value, new_value, &child, depth + 1, out)?,
                    None => {
                        out.removed.insert(child, old_value.clone());
                    }
                }
            }
            for (key, new_value) in right {
                if !left.contains_key(key) {
                    out.added.insert(child_path(path, key), new_value.clone());
                }
            }
        }
        (old_value, new_value) => {
            if old_value != new_value {
                out.changed.insert(
                    path.to_string(),
                    ValueChange {
                        old: old_value.clone(),
                        new: new_value.clone(),
                    },
                );
            }
        }
    }
    Ok(())
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
