//! Dynamic configuration reload.
//!
//! The [`ReloadManager`] classifies diff paths as dynamic or static,
//! rejects batches touching static paths, serializes concurrent apply
//! requests, and invokes module reload callbacks under their declared
//! timeout. Modules follow the build-next-then-swap pattern: a failed
//! callback must leave the module's visible state equal to the pre-reload
//! state.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::diff::ConfigDiff;
use crate::schema::ConfigShape;
use crate::value::ConfigValue;
use crate::{BoxError, Error};

/// Timeout applied when a module declares none.
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// One applied configuration change.
///
/// Batches are ordered lexicographically by path, so modules can rely on
/// a stable sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    /// Configuration section the change belongs to.
    pub section: String,

    /// Dotted path of the field.
    pub path: String,

    /// Previous value; `None` for added paths.
    pub old: Option<ConfigValue>,

    /// New value; `None` for removed paths.
    pub new: Option<ConfigValue>,

    /// Label of whatever triggered the change.
    pub source: String,
}

/// A module that can apply configuration changes at runtime.
#[async_trait]
pub trait ReloadableModule: Send + Sync {
    /// Module name, used in errors and history records.
    fn name(&self) -> &str;

    /// Whether runtime reload is supported at all.
    fn can_reload(&self) -> bool {
        true
    }

    /// Upper bound for one reload invocation. Zero means "use the
    /// manager default" ([`DEFAULT_RELOAD_TIMEOUT`]).
    fn reload_timeout(&self) -> Duration {
        DEFAULT_RELOAD_TIMEOUT
    }

    /// Applies one ordered batch of changes.
    ///
    /// Must be atomic from the caller's perspective: build the next state,
    /// then commit under the module's own lock; on error, abort before the
    /// commit so readers keep observing the pre-reload snapshot.
    async fn reload(&self, changes: &[ConfigChange]) -> Result<(), BoxError>;
}

/// One successfully applied batch, kept in history.
#[derive(Debug, Clone)]
pub struct ReloadBatch {
    /// Module that applied the batch.
    pub module: String,

    /// Configuration section.
    pub section: String,

    /// The ordered changes.
    pub changes: Vec<ConfigChange>,

    /// Deterministic identifier of the batch (paths plus new-value
    /// presence flags).
    pub fingerprint: String,

    /// When the batch committed.
    pub applied_at: SystemTime,
}

#[derive(Default)]
struct ManagerState {
    history: Vec<ReloadBatch>,
    fingerprint: String,
}

/// Serializes and audits configuration reloads.
pub struct ReloadManager {
    dynamic_paths: parking_lot::RwLock<HashSet<String>>,
    apply_lock: tokio::sync::Mutex<()>,
    state: Mutex<ManagerState>,
}

impl ReloadManager {
    /// Creates a manager with the given dynamic path set.
    ///
    /// Entries act as path prefixes: `cache` covers `cache.ttl` and every
    /// other descendant. All other paths are static.
    pub fn new(dynamic_paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            dynamic_paths: parking_lot::RwLock::new(dynamic_paths.into_iter().collect()),
            apply_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Creates a manager from the `dynamic` tags of a config shape.
    pub fn from_schema<T: ConfigShape>() -> Self {
        Self::new(T::schema().dynamic_paths())
    }

    /// Extends the dynamic set (module config registration).
    pub fn add_dynamic_paths(&self, paths: impl IntoIterator<Item = String>) {
        self.dynamic_paths.write().extend(paths);
    }

    /// Whether `path` may change at runtime.
    pub fn is_dynamic(&self, path: &str) -> bool {
        let dynamic_paths = self.dynamic_paths.read();
        if dynamic_paths.contains(path) {
            return true;
        }
        dynamic_paths
            .iter()
            .any(|entry| path.strip_prefix(entry.as_str()).is_some_and(|rest| rest.starts_with('.')))
    }

    /// Defensive copy of the applied-batch history.
    pub fn history(&self) -> Vec<ReloadBatch> {
        self.state.lock().history.clone()
    }

    /// Fingerprint of the most recently applied batch.
    pub fn last_fingerprint(&self) -> String {
        self.state.lock().fingerprint.clone()
    }

    /// Applies a configuration diff to one module.
    ///
    /// An empty diff is a successful no-op. If any path in the diff is
    /// static, the whole batch is rejected with
    /// [`Error::StaticFieldChange`] before the module is invoked — mixed
    /// batches never partially apply. Concurrent calls fully serialize;
    /// identical consecutive batches still execute.
    pub async fn apply_diff(
        &self,
        module: &dyn ReloadableModule,
        section: &str,
        diff: &ConfigDiff,
        source: &str,
    ) -> Result<(), Error> {
        if diff.is_empty() {
            return Ok(());
        }

        let changes = changes_from_diff(section, diff, source);
        let static_paths: Vec<String> = changes
            .iter()
            .map(|c| c.path.clone())
            .filter(|path| !self.is_dynamic(path))
            .collect();
        if !static_paths.is_empty() {
            warn!(
                module = module.name(),
                paths = ?static_paths,
                "rejecting reload batch touching static fields"
            );
            return Err(Error::StaticFieldChange {
                paths: static_paths,
            });
        }

        // A diff can flatten to nothing once filtered; the module is not
        // consulted for an empty batch.
        if changes.is_empty() {
            return Ok(());
        }

        if !module.can_reload() {
            return Err(Error::ReloadNotSupported {
                module: module.name().to_string(),
            });
        }

        let _guard = self.apply_lock.lock().await;

        let declared = module.reload_timeout();
        let timeout = if declared.is_zero() {
            DEFAULT_RELOAD_TIMEOUT
        } else {
            declared
        };

        match tokio::time::timeout(timeout, module.reload(&changes)).await {
            Err(_elapsed) => {
                warn!(module = module.name(), ?timeout, "reload timed out");
                Err(Error::ReloadTimedOut {
                    module: module.name().to_string(),
                    timeout,
                })
            }
            Ok(Err(source)) => {
                warn!(module = module.name(), error = %source, "reload failed");
                Err(Error::ReloadFailed {
                    module: module.name().to_string(),
                    source,
                })
            }
            Ok(Ok(())) => {
                let fingerprint = fingerprint_of(&changes);
                info!(
                    module = module.name(),
                    section,
                    changes = changes.len(),
                    %fingerprint,
                    "reload applied"
                );
                let mut state = self.state.lock();
                state.fingerprint = fingerprint.clone();
                state.history.push(ReloadBatch {
                    module: module.name().to_string(),
                    section: section.to_string(),
                    changes,
                    fingerprint,
                    applied_at: SystemTime::now(),
                });
                Ok(())
            }
        }
    }
}

/// Flattens a diff into an ordered change list.
///
/// The diff's maps iterate lexicographically already; merging through a
/// `BTreeMap` keeps the combined list in path order.
fn changes_from_diff(section: &str, diff: &ConfigDiff, source: &str) -> Vec<ConfigChange> {
    let mut merged: std::collections::BTreeMap<String, ConfigChange> = Default::default();

    for (path, value) in &diff.added {
        merged.insert(
            path.clone(),
            ConfigChange {
                section: section.to_string(),
                path: path.clone(),
                old: None,
                new: Some(value.clone()),
                source: source.to_string(),
            },
        );
    }
    for (path, value) in &diff.removed {
        merged.insert(
            path.clone(),
            ConfigChange {
                section: section.to_string(),
                path: path.clone(),
                old: Some(value.clone()),
                new: None,
                source: source.to_string(),
            },
        );
    }
    for (path, change) in &diff.changed {
        merged.insert(
            path.clone(),
            ConfigChange {
                section: section.to_string(),
                path: path.clone(),
                old: Some(change.old.clone()),
                new: Some(change.new.clone()),
                source: source.to_string(),
            },
        );
    }

    merged.into_values().collect()
}

/// Deterministic batch identifier: paths plus new-value presence flags.
fn fingerprint_of(changes: &[ConfigChange]) -> String {
    changes
        .iter()
        .map(|c| format!("{}{}", c.path, if c.new.is_some() { "+" } else { "-" }))
        .collect::<Vec<_>>()
        .join("|")
}

// ============================================================================
// Unit Tests
// ============================================================================
