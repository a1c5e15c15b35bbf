//! Configuration feeders.
//!
//! A feeder pulls values from one kind of source and writes them into a
//! typed target, reporting provenance to the shared [`FieldTracker`].
//! Concrete feeders are variants tagged by their source kind:
//!
//! | Feeder | Source |
//! |--------|--------|
//! | [`EnvFeeder`] | Environment variables, optionally module-aware |
//! | [`AffixedEnvFeeder`] | Environment variables with prefix/suffix |
//! | [`InstanceAwareEnvFeeder`] | Per-instance env prefixes |
//! | [`TenantAffixedEnvFeeder`] | Tenant-derived prefix and suffix |
//! | [`FileFeeder`] | One YAML/JSON/TOML document |
//! | [`DotenvFileFeeder`] | One `.env`-style file |
//! | [`LayeredFeeder`] | `base/` + `environments/<env>/` directory layers |
//!
//! Precedence between feeders is execution order: later feeders observe
//! and may overwrite earlier ones. Within the env family, OS environment
//! beats `.env` regardless of order because the [`EnvCatalog`] enforces it
//! on the read path.
//!
//! [`FieldTracker`]: crate::tracker::FieldTracker
//! [`EnvCatalog`]: crate::catalog::EnvCatalog

mod affixed;
mod env;
mod file;
mod layered;

pub use affixed::{AffixedEnvFeeder, InstanceAwareEnvFeeder, TenantAffixedEnvFeeder};
pub use env::EnvFeeder;
pub use file::{DotenvFileFeeder, FileFeeder, FileFormat};
pub use layered::LayeredFeeder;

use crate::Error;
use crate::schema::{SetError, ShapedTarget};
use crate::tracker::SharedTracker;

/// A value producer reading a single source kind.
///
/// Feeders walk the target's schema recursively, descending into nested
/// records and allocating optional records on first assignment; leaf
/// primitives are converted from the source encoding to the declared kind.
pub trait Feeder: Send {
    /// Stable identity used in provenance records.
    fn name(&self) -> &str;

    /// Populates `target` from this feeder's source.
    fn feed(&mut self, target: &mut dyn ShapedTarget) -> Result<(), Error>;

    /// Populates `target` for one instance key.
    ///
    /// Instance-aware feeders derive their source keys from `key`; the
    /// default implementation ignores the key and behaves like
    /// [`feed`](Self::feed).
    fn feed_key(&mut self, key: &str, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let _ = key;
        self.feed(target)
    }

    /// Attaches the shared field tracker.
    fn set_tracker(&mut self, tracker: SharedTracker);

    /// Enables the verbose `tracing::debug!` trail of every key tried.
    fn set_verbose_debug(&mut self, enabled: bool);
}

/// Converts a typed-target write failure into the crate error, attaching
/// the full dotted path the feeder resolved.
pub(crate) fn wrap_set_error(path: &str, err: SetError) -> Error {
    match err {
        SetError::ArraySize { len, capacity, .. } => Error::ArraySizeExceeded {
            path: path.to_string(),
            got: len,
            capacity,
        },
        other => Error::FieldNotSettable {
            path: path.to_string(),
            reason: other.to_string(),
        },
    }
}
