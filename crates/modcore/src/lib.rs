//! # modcore
//!
//! A modular application runtime core: independent components ("modules")
//! composed into one process with layered configuration, dynamic reload,
//! and health aggregation.
//!
//! ## Subsystems
//!
//! | Component | Module | Responsibility |
//! |-----------|--------|----------------|
//! | Env catalog | [`catalog`] | Read-through OS env + `.env` view with provenance |
//! | Feeders | [`feeders`] | Populate typed targets from env, files, layered dirs |
//! | Field tracker | [`tracker`] | Per-field population records |
//! | Config engine | [`engine`] | Feeder orchestration, defaults, snapshots |
//! | Diff engine | [`diff`] | Structural deltas between snapshots |
//! | Reload manager | [`reload`] | Dynamic/static classification, serialized apply |
//! | Health aggregator | [`health`] | Periodic checks, readiness/liveness verdicts |
//! | Application kernel | [`kernel`] | Lifecycle, module and service registration |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modcore::{ConfigEngine, ConfigShape, EnvFeeder};
//!
//! #[derive(Default, ConfigShape)]
//! struct ServerConfig {
//!     #[field(env = "HTTP_HOST", default = "127.0.0.1")]
//!     host: String,
//!
//!     #[field(env = "HTTP_PORT", default = "8080", dynamic)]
//!     port: u16,
//!
//!     #[field(env = "REQUEST_TIMEOUT", default = "30s", dynamic)]
//!     request_timeout: std::time::Duration,
//! }
//!
//! let mut engine = ConfigEngine::new();
//! engine.add_feeder(Box::new(EnvFeeder::new()));
//! let loaded = engine.load::<ServerConfig>()?;
//! println!("listening on {}:{}", loaded.config.host, loaded.config.port);
//! # Ok::<(), modcore::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All failures surface through [`Error`], which integrates with
//! [`miette`] for rich terminal diagnostics. Reload and health callbacks
//! return errors as values; nothing crosses the module boundary by panic.

pub use modcore_macro::ConfigShape;

pub mod catalog;
pub mod diff;
pub mod engine;
pub mod feeders;
pub mod health;
pub mod kernel;
pub mod reload;
pub mod schema;
pub mod tracker;
pub mod value;

pub use catalog::{EnvCatalog, EnvSource};
pub use diff::{ConfigDiff, ValueChange, diff};
pub use engine::{ConfigEngine, ConfigSnapshot, Loaded};
pub use feeders::{
    AffixedEnvFeeder, DotenvFileFeeder, EnvFeeder, Feeder, FileFeeder, FileFormat,
    InstanceAwareEnvFeeder, LayeredFeeder, TenantAffixedEnvFeeder,
};
pub use health::{
    AggregatedHealth, HealthAggregator, HealthAggregatorConfig, HealthProvider, HealthReport,
    HealthStatus,
};
pub use kernel::{AppContext, AppKernel, Module, ServiceRegistry, SnapshotSource};
pub use reload::{ConfigChange, ReloadBatch, ReloadManager, ReloadableModule};
pub use schema::{ConfigShape as ConfigShapeTrait, FieldKind, FieldSpec, Schema, ShapedTarget};
pub use tracker::{FieldPopulation, FieldTracker, SharedTracker, SourceKind};
pub use value::ConfigValue;

use miette::{Diagnostic, NamedSource, SourceSpan};

/// Boxed error type crossing the module boundary (reload callbacks, health
/// checks, module lifecycle hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ============================================================================
// Diagnostic Code Registry
// ============================================================================

/// Centralized registry of diagnostic error codes used throughout modcore.
///
/// These constants document all codes used in `#[diagnostic(code(...))]`
/// attributes; attribute positions require literal strings, so this module
/// is the single source of truth for programmatic matching and tooling.
///
/// All codes follow the pattern `modcore::<category>`:
///
/// | Code | Description |
/// |------|-------------|
/// | `modcore::invalid_dotenv_line` | `.env` line without `=` |
/// | `modcore::empty_affix` | Affixed feeder with no prefix and no suffix |
/// | `modcore::cannot_convert` | Value failed type conversion |
/// | `modcore::array_size` | Fixed array overfilled |
/// | `modcore::field_not_settable` | Path did not resolve into the target |
/// | `modcore::duplicate_tag` | Two fields share a source tag |
/// | `modcore::static_field_change` | Reload batch touches static paths |
/// | `modcore::reload_*` | Reload dispatch failures |
/// | `modcore::file_*` | File read/parse failures |
/// | `modcore::module_*` | Module lifecycle failures |
pub mod diagnostic_codes {
    /// `.env` line without `=`.
    pub const INVALID_DOTENV_LINE: &str = "modcore::invalid_dotenv_line";

    /// Affixed feeder constructed with empty prefix and suffix.
    pub const EMPTY_AFFIX: &str = "modcore::empty_affix";

    /// Value failed conversion to the declared field kind.
    pub const CANNOT_CONVERT: &str = "modcore::cannot_convert";

    /// Fixed-size array field received too many elements.
    pub const ARRAY_SIZE: &str = "modcore::array_size";

    /// A path failed to resolve into the typed target.
    pub const FIELD_NOT_SETTABLE: &str = "modcore::field_not_settable";

    /// Duplicate source tag within one record.
    pub const DUPLICATE_TAG: &str = "modcore::duplicate_tag";

    /// Configuration tree exceeded the diff depth bound.
    pub const TREE_TOO_DEEP: &str = "modcore::tree_too_deep";

    /// Reload batch touches paths outside the dynamic set.
    pub const STATIC_FIELD_CHANGE: &str = "modcore::static_field_change";

    /// Module does not support runtime reload.
    pub const RELOAD_NOT_SUPPORTED: &str = "modcore::reload_not_supported";

    /// Module reload callback exceeded its timeout.
    pub const RELOAD_TIMED_OUT: &str = "modcore::reload_timed_out";

    /// Module reload callback returned an error.
    pub const RELOAD_FAILED: &str = "modcore::reload_failed";

    /// Configuration file could not be read.
    pub const FILE_READ: &str = "modcore::file_read";

    /// Configuration file could not be parsed.
    pub const FILE_PARSE: &str = "modcore::file_parse";

    /// Unrecognized configuration file extension.
    pub const UNKNOWN_FORMAT: &str = "modcore::unknown_format";

    /// Module init failed during kernel startup.
    pub const MODULE_INIT: &str = "modcore::module_init";

    /// Module start failed during kernel startup.
    pub const MODULE_START: &str = "modcore::module_start";

    /// Module stop failed during kernel shutdown.
    pub const MODULE_STOP: &str = "modcore::module_stop";

    /// Kernel operation invoked in the wrong lifecycle phase.
    pub const INVALID_PHASE: &str = "modcore::invalid_phase";

    /// Reload requested without an installed snapshot source.
    pub const NO_SNAPSHOT_SOURCE: &str = "modcore::no_snapshot_source";
}

// ============================================================================
// Error Type
// ============================================================================

/// Errors produced by the configuration, reload, and kernel subsystems.
///
/// Health check failures never appear here; they are captured into
/// [`HealthReport`]s instead of propagating as process errors.
#[derive(Debug, Diagnostic, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A `.env` line without a `=` separator.
    #[error("invalid line {line} in {path}: expected KEY=VALUE")]
    #[diagnostic(
        code(modcore::invalid_dotenv_line),
        help("each non-comment line must contain '='")
    )]
    InvalidDotenvLine {
        /// File being parsed.
        path: String,
        /// 1-based line number.
        line: usize,
    },

    /// Affixed env feeder constructed with neither prefix nor suffix.
    #[error("affixed env feeder requires a prefix or a suffix")]
    #[diagnostic(
        code(modcore::empty_affix),
        help("supply at least one affix, or use the plain env feeder")
    )]
    EmptyAffix,

    /// A source value failed conversion to the declared field kind.
    #[error("cannot convert string '{value}' to {target} for field '{path}'")]
    #[diagnostic(code(modcore::cannot_convert))]
    CannotConvert {
        /// Raw value that failed.
        value: String,
        /// Expected type name.
        target: String,
        /// Dotted path of the field.
        path: String,
        /// Source kind the value came from.
        origin: SourceKind,
    },

    /// A fixed-size array field received more elements than it holds.
    #[error("array field '{path}' holds at most {capacity} items, got {got}")]
    #[diagnostic(code(modcore::array_size))]
    ArraySizeExceeded {
        /// Dotted path of the field.
        path: String,
        /// Elements supplied.
        got: usize,
        /// Declared capacity.
        capacity: usize,
    },

    /// A path failed to resolve into the typed target.
    #[error("field '{path}' cannot be set: {reason}")]
    #[diagnostic(code(modcore::field_not_settable))]
    FieldNotSettable {
        /// Dotted path of the field.
        path: String,
        /// Underlying resolution failure.
        reason: String,
    },

    /// Two fields of one record share a source tag.
    #[error("duplicate tag {tag} in record {record} (field '{path}')")]
    #[diagnostic(
        code(modcore::duplicate_tag),
        help("every field must be reachable by a unique source key")
    )]
    DuplicateTag {
        /// Record type name.
        record: &'static str,
        /// The colliding tag, as `format:key`.
        tag: String,
        /// Dotted path of the second field carrying the tag.
        path: String,
    },

    /// Configuration tree exceeded the diff engine's depth bound.
    #[error("configuration tree exceeds maximum depth {depth}")]
    #[diagnostic(code(modcore::tree_too_deep))]
    TreeTooDeep {
        /// The bound that was hit.
        depth: usize,
    },

    /// A reload batch touched paths outside the dynamic set.
    ///
    /// Mixed batches never partially apply: one static path rejects the
    /// whole batch before the module sees it.
    #[error("reload rejected: static field(s) changed: {}", paths.join(", "))]
    #[diagnostic(
        code(modcore::static_field_change),
        help("static fields require a process restart")
    )]
    StaticFieldChange {
        /// The offending static paths.
        paths: Vec<String>,
    },

    /// The target module reports `can_reload() == false`.
    #[error("module '{module}' does not support runtime reload")]
    #[diagnostic(code(modcore::reload_not_supported))]
    ReloadNotSupported {
        /// Module name.
        module: String,
    },

    /// The module's reload callback exceeded its declared timeout.
    #[error("reload of module '{module}' timed out after {timeout:?}")]
    #[diagnostic(code(modcore::reload_timed_out))]
    ReloadTimedOut {
        /// Module name.
        module: String,
        /// The timeout that elapsed.
        timeout: std::time::Duration,
    },

    /// The module's reload callback returned an error.
    ///
    /// The module is responsible for leaving its visible state unchanged;
    /// the process continues on the previous configuration.
    #[error("reload of module '{module}' failed")]
    #[diagnostic(code(modcore::reload_failed))]
    ReloadFailed {
        /// Module name.
        module: String,
        /// The callback's error.
        #[source]
        source: BoxError,
    },

    /// A configuration file could not be read.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(modcore::file_read),
        help("check that the file exists and is readable")
    )]
    FileRead {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file failed to parse, with source location.
    #[error("{format} parse error in {path}")]
    #[diagnostic(code(modcore::file_parse))]
    FileParse {
        /// Format name (YAML, JSON, TOML).
        format: &'static str,
        /// File path.
        path: String,
        /// File content for snippet rendering.
        #[source_code]
        src: NamedSource<String>,
        /// Location of the error.
        #[label("{message}")]
        span: SourceSpan,
        /// What went wrong.
        message: String,
        /// Suggested fix.
        #[help]
        help: String,
    },

    /// A configuration file failed to parse, location unknown.
    #[error("{format} parse error in {path}: {message}")]
    #[diagnostic(code(modcore::file_parse))]
    FileParseNoSpan {
        /// Format name.
        format: &'static str,
        /// File path.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Unrecognized configuration file extension.
    #[error("unknown configuration file format: .{extension}")]
    #[diagnostic(
        code(modcore::unknown_format),
        help("supported formats: .yaml, .yml, .json, .toml")
    )]
    UnknownFormat {
        /// The unrecognized extension.
        extension: String,
    },

    /// A module's init hook failed.
    ///
    /// The kernel aborts startup and stops already-initialized modules.
    #[error("init of module '{module}' failed")]
    #[diagnostic(code(modcore::module_init))]
    ModuleInit {
        /// Module name.
        module: String,
        /// The hook's error.
        #[source]
        source: BoxError,
    },

    /// A module's start hook failed.
    #[error("start of module '{module}' failed")]
    #[diagnostic(code(modcore::module_start))]
    ModuleStart {
        /// Module name.
        module: String,
        /// The hook's error.
        #[source]
        source: BoxError,
    },

    /// A module's stop hook failed.
    #[error("stop of module '{module}' failed")]
    #[diagnostic(code(modcore::module_stop))]
    ModuleStop {
        /// Module name.
        module: String,
        /// The hook's error.
        #[source]
        source: BoxError,
    },

    /// Kernel operation invoked in the wrong lifecycle phase.
    #[error("cannot {operation} while kernel is {phase}")]
    #[diagnostic(code(modcore::invalid_phase))]
    InvalidPhase {
        /// Attempted operation.
        operation: &'static str,
        /// Current phase name.
        phase: &'static str,
    },

    /// `request_reload` called without an installed snapshot source.
    #[error("no snapshot source installed; cannot reload configuration")]
    #[diagnostic(
        code(modcore::no_snapshot_source),
        help("install one with AppKernel::set_snapshot_source")
    )]
    NoSnapshotSource,
}
