//! Affixed environment feeders: static prefix/suffix, per-instance, and
//! per-tenant variants.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Error;
use crate::catalog::EnvCatalog;
use crate::schema::{ConfigShape, ShapedTarget};
use crate::tracker::{SharedTracker, SourceKind};

use super::env::{EnvWalkSpec, feed_lookup};

/// Builds the affixed search key for a tag.
///
/// Non-empty parts join with `_`; the affixes themselves are used verbatim
/// (uppercased), so a prefix ending in `_` or a suffix starting with `_`
/// yields a double underscore: prefix `PROD_` and suffix `_ENV` on tag
/// `HOST` produce `PROD__HOST__ENV`. That is intentional and part of the
/// contract.
fn affixed_key(prefix: &str, tag: &str, suffix: &str) -> String {
    [prefix, &tag.to_ascii_uppercase(), suffix]
        .iter()
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect::<Vec<_>>()
        .join("_")
}

/// Feeds a target from environment variables decorated with a fixed
/// prefix and/or suffix.
pub struct AffixedEnvFeeder {
    prefix: String,
    suffix: String,
    catalog: Arc<EnvCatalog>,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl AffixedEnvFeeder {
    /// Creates a feeder with the given affixes (uppercased on input).
    ///
    /// At least one affix must be non-empty; otherwise this is just the
    /// plain env feeder and the construction fails with
    /// [`Error::EmptyAffix`].
    pub fn new(prefix: &str, suffix: &str) -> Result<Self, Error> {
        Self::with_catalog(prefix, suffix, EnvCatalog::global())
    }

    /// Affixed feeder against a private catalog.
    pub fn with_catalog(
        prefix: &str,
        suffix: &str,
        catalog: Arc<EnvCatalog>,
    ) -> Result<Self, Error> {
        if prefix.is_empty() && suffix.is_empty() {
            return Err(Error::EmptyAffix);
        }
        Ok(Self {
            prefix: prefix.to_ascii_uppercase(),
            suffix: suffix.to_ascii_uppercase(),
            catalog,
            tracker: None,
            verbose: false,
        })
    }
}

impl super::Feeder for AffixedEnvFeeder {
    fn name(&self) -> &str {
        "env_affixed"
    }

    fn feed(&mut self, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let spec = EnvWalkSpec {
            feeder: "env_affixed",
            source_kind: SourceKind::EnvAffixed,
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key: "",
        };
        feed_lookup(
            &spec,
            target,
            &|tag| vec![affixed_key(&self.prefix, tag, &self.suffix)],
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

/// Derives an env prefix from an instance key.
pub type PrefixFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Derives an env affix from a tenant identifier.
pub type AffixFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Feeds multiple instances of one record shape, each from its own env
/// prefix.
///
/// Constructed with a function from instance key to prefix;
/// [`feed_key`](super::Feeder::feed_key) feeds a single instance and
/// [`feed_instances`](Self::feed_instances) fans out across a map.
/// Instance keys appear verbatim in provenance records.
pub struct InstanceAwareEnvFeeder {
    prefix_fn: PrefixFn,
    catalog: Arc<EnvCatalog>,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl InstanceAwareEnvFeeder {
    /// Creates a feeder deriving prefixes with `prefix_fn`.
    pub fn new(prefix_fn: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self::with_catalog(prefix_fn, EnvCatalog::global())
    }

    /// Instance-aware feeder against a private catalog.
    pub fn with_catalog(
        prefix_fn: impl Fn(&str) -> String + Send + Sync + 'static,
        catalog: Arc<EnvCatalog>,
    ) -> Self {
        Self {
            prefix_fn: Box::new(prefix_fn),
            catalog,
            tracker: None,
            verbose: false,
        }
    }

    /// Feeds every entry of `instances`, keyed by instance name.
    pub fn feed_instances<T: ConfigShape>(
        &mut self,
        instances: &mut HashMap<String, T>,
    ) -> Result<(), Error> {
        use super::Feeder;
        for (key, target) in instances.iter_mut() {
            let key = key.clone();
            self.feed_key(&key, target)?;
        }
        Ok(())
    }
}

impl super::Feeder for InstanceAwareEnvFeeder {
    fn name(&self) -> &str {
        "env_instance"
    }

    /// Without an instance key there is nothing to derive a prefix from;
    /// plain `feed` is a no-op.
    fn feed(&mut self, _target: &mut dyn ShapedTarget) -> Result<(), Error> {
        Ok(())
    }

    fn feed_key(&mut self, key: &str, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let prefix = (self.prefix_fn)(key).to_ascii_uppercase();
        let spec = EnvWalkSpec {
            feeder: "env_instance",
            source_kind: SourceKind::EnvAffixed,
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key: key,
        };
        feed_lookup(
            &spec,
            target,
            &|tag| vec![affixed_key(&prefix, tag, "")],
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

/// Feeds a target from tenant-decorated environment variables.
///
/// Composes a prefix function and a suffix function of the tenant
/// identifier over the affixed search key; both are recomputed on every
/// [`feed_key`](super::Feeder::feed_key) call.
pub struct TenantAffixedEnvFeeder {
    prefix_fn: AffixFn,
    suffix_fn: AffixFn,
    catalog: Arc<EnvCatalog>,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl TenantAffixedEnvFeeder {
    /// Creates a feeder with tenant-derived affixes.
    pub fn new(
        prefix_fn: impl Fn(&str) -> String + Send + Sync + 'static,
        suffix_fn: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self::with_catalog(prefix_fn, suffix_fn, EnvCatalog::global())
    }

    /// Tenant-affixed feeder against a private catalog.
    pub fn with_catalog(
        prefix_fn: impl Fn(&str) -> String + Send + Sync + 'static,
        suffix_fn: impl Fn(&str) -> String + Send + Sync + 'static,
        catalog: Arc<EnvCatalog>,
    ) -> Self {
        Self {
            prefix_fn: Box::new(prefix_fn),
            suffix_fn: Box::new(suffix_fn),
            catalog,
            tracker: None,
            verbose: false,
        }
    }
}

impl super::Feeder for TenantAffixedEnvFeeder {
    fn name(&self) -> &str {
        "env_tenant"
    }

    /// Without a tenant identifier there are no affixes; plain `feed` is a
    /// no-op.
    fn feed(&mut self, _target: &mut dyn ShapedTarget) -> Result<(), Error> {
        Ok(())
    }

    fn feed_key(&mut self, tenant_id: &str, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let prefix = (self.prefix_fn)(tenant_id).to_ascii_uppercase();
        let suffix = (self.suffix_fn)(tenant_id).to_ascii_uppercase();
        if prefix.is_empty() && suffix.is_empty() {
            return Err(Error::EmptyAffix);
        }
        let spec = EnvWalkSpec {
            feeder: "env_tenant",
            source_kind: SourceKind::EnvAffixed,
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key: tenant_id,
        };
        feed_lookup(
            &spec,
            target,
            &|tag| vec![affixed_key(&prefix, tag, &suffix)],
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
// Unit Tests
// ============================================================================
