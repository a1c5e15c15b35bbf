//! Application kernel: lifecycle, module and service registration, and
//! the wiring between configuration, reload, and health services.
//!
//! Lifecycle phases are strictly ordered: `init` runs modules in
//! dependency (registration) order, `start` the same order, `stop` in
//! reverse. A module whose init fails aborts the sequence and
//! already-initialized modules receive stop. For binaries,
//! [`AppKernel::run`] maps the outcome to process exit codes: 0 for a
//! normal lifecycle, 1 for an init/start error.

use std::any::Any;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::diff::diff;
use crate::engine::ConfigSnapshot;
use crate::health::{AggregatedHealth, HealthAggregator, HealthAggregatorConfig, HealthProvider};
use crate::reload::{ReloadManager, ReloadableModule};
use crate::{BoxError, Error};

/// A composable unit of application behavior.
#[async_trait]
pub trait Module: Send + Sync {
    /// Module name, used in lifecycle errors and logs.
    fn name(&self) -> &str;

    /// Declares the module's configuration requirements.
    ///
    /// Runs for every module before any `init`, in registration order.
    /// Typical use is [`AppContext::register_config_section`], which
    /// validates the section's schema and marks its `dynamic` paths
    /// reloadable.
    fn register_config(&mut self, ctx: &mut AppContext<'_>) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }

    /// Wires the module into the application: service registration,
    /// health providers, reloadables, config access.
    async fn init(&mut self, ctx: &mut AppContext<'_>) -> Result<(), BoxError>;

    /// Begins active work. Called after every module initialized.
    async fn start(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Ceases active work. Called in reverse registration order.
    async fn stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Name-keyed service registry.
///
/// Services are registered by name, not resolved by type graph; lookup
/// downcasts to the requested type.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`, replacing any previous entry.
    pub fn register<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.services
            .insert(name.into(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Looks up a service by name and type.
    ///
    /// Returns `None` when the name is unknown or registered under a
    /// different type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Whether a service with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names, unsorted.
    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

/// Produces a fresh configuration snapshot on demand.
///
/// Installed into the kernel for [`AppKernel::request_reload`]; typically
/// a closure re-running a [`ConfigEngine`](crate::engine::ConfigEngine).
pub trait SnapshotSource: Send {
    /// Produces the current configuration snapshot.
    fn load(&mut self) -> Result<ConfigSnapshot, Error>;
}

impl<F> SnapshotSource for F
where
    F: FnMut() -> Result<ConfigSnapshot, Error> + Send,
{
    fn load(&mut self) -> Result<ConfigSnapshot, Error> {
        self()
    }
}

/// The registration surface handed to modules during config
/// registration and init.
pub struct AppContext<'a> {
    services: &'a mut ServiceRegistry,
    health: &'a HealthAggregator,
    reload: &'a ReloadManager,
    reloadables: &'a mut Vec<(String, Arc<dyn ReloadableModule>)>,
    snapshot: Option<&'a ConfigSnapshot>,
}

impl AppContext<'_> {
    /// Declares a configuration section backed by `schema`.
    ///
    /// Validates the schema (duplicate tags reject registration) and adds
    /// its `dynamic` paths, prefixed with `section`, to the reload
    /// manager's dynamic set.
    pub fn register_config_section(
        &mut self,
        section: &str,
        schema: &'static crate::schema::Schema,
    ) -> Result<(), Error> {
        schema.validate()?;
        self.reload.add_dynamic_paths(
            schema
                .dynamic_paths()
                .into_iter()
                .map(|path| format!("{section}.{path}")),
        );
        Ok(())
    }

    /// Registers a named service.
    pub fn register_service<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        service: Arc<T>,
    ) {
        self.services.register(name, service);
    }

    /// Looks up a previously registered service.
    pub fn get_service<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.services.get(name)
    }

    /// Registers a health provider.
    pub fn register_health_provider(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn HealthProvider>,
        optional: bool,
    ) {
        self.health.register(name, provider, optional);
    }

    /// Registers a reloadable module for the given configuration section.
    ///
    /// On reload, the module receives the sub-diff of paths under
    /// `section`.
    pub fn register_reloadable(
        &mut self,
        section: impl Into<String>,
        module: Arc<dyn ReloadableModule>,
    ) {
        self.reloadables.push((section.into(), module));
    }

    /// The configuration snapshot current at init time, when one is
    /// installed.
    pub fn snapshot(&self) -> Option<&ConfigSnapshot> {
        self.snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Initialized,
    Started,
    Stopped,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Initialized => "initialized",
            Phase::Started => "started",
            Phase::Stopped => "stopped",
        }
    }
}

struct ModuleEntry {
    module: Box<dyn Module>,
    initialized: bool,
}

/// Composes modules into one process.
pub struct AppKernel {
    modules: Vec<ModuleEntry>,
    services: ServiceRegistry,
    reload: Arc<ReloadManager>,
    health: Arc<HealthAggregator>,
    reloadables: Vec<(String, Arc<dyn ReloadableModule>)>,
    snapshot_source: Mutex<Option<Box<dyn SnapshotSource>>>,
    current: RwLock<Option<ConfigSnapshot>>,
    phase: Phase,
}

impl AppKernel {
    /// Creates a kernel around a reload manager, with default health
    /// aggregation settings.
    pub fn new(reload: ReloadManager) -> Self {
        Self::with_health_config(reload, HealthAggregatorConfig::default())
    }

    /// Creates a kernel with explicit health aggregation settings.
    pub fn with_health_config(reload: ReloadManager, health: HealthAggregatorConfig) -> Self {
        Self {
            modules: Vec::new(),
            services: ServiceRegistry::new(),
            reload: Arc::new(reload),
            health: Arc::new(HealthAggregator::new(health)),
            reloadables: Vec::new(),
            snapshot_source: Mutex::new(None),
            current: RwLock::new(None),
            phase: Phase::Created,
        }
    }

    /// Registers a module. Registration order is dependency order.
    pub fn register_module(&mut self, module: Box<dyn Module>) -> Result<(), Error> {
        if self.phase != Phase::Created {
            return Err(Error::InvalidPhase {
                operation: "register module",
                phase: self.phase.name(),
            });
        }
        self.modules.push(ModuleEntry {
            module,
            initialized: false,
        });
        Ok(())
    }

    /// Installs the snapshot source used by [`request_reload`](Self::request_reload).
    pub fn set_snapshot_source(&self, source: Box<dyn SnapshotSource>) {
        *self.snapshot_source.lock() = Some(source);
    }

    /// Registers a reloadable module for a configuration section, outside
    /// of module init (modules normally use
    /// [`AppContext::register_reloadable`]).
    pub fn register_reloadable(
        &mut self,
        section: impl Into<String>,
        module: Arc<dyn ReloadableModule>,
    ) {
        self.reloadables.push((section.into(), module));
    }

    /// Seeds the current configuration snapshot (normally the result of
    /// the initial load).
    pub fn set_snapshot(&self, snapshot: ConfigSnapshot) {
        *self.current.write() = Some(snapshot);
    }

    /// The current configuration snapshot.
    pub fn snapshot(&self) -> Option<ConfigSnapshot> {
        self.current.read().clone()
    }

    /// The service registry.
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Mutable access to the service registry (pre-init wiring).
    pub fn services_mut(&mut self) -> &mut ServiceRegistry {
        &mut self.services
    }

    /// The reload manager.
    pub fn reload_manager(&self) -> Arc<ReloadManager> {
        Arc::clone(&self.reload)
    }

    /// The health aggregator (for registration outside module init).
    pub fn health_aggregator(&self) -> Arc<HealthAggregator> {
        Arc::clone(&self.health)
    }

    /// The cached aggregated health verdict, as read by `/health`,
    /// `/ready`, and `/alive` handlers.
    pub fn health(&self) -> AggregatedHealth {
        self.health.latest()
    }

    /// Initializes all modules in registration order.
    ///
    /// On the first failure the sequence aborts, already-initialized
    /// modules are stopped in reverse order, and the error is returned.
    pub async fn init(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Created {
            return Err(Error::InvalidPhase {
                operation: "init",
                phase: self.phase.name(),
            });
        }

        let snapshot = self.current.read().clone();

        // Config registration runs for every module before any init.
        for index in 0..self.modules.len() {
            let Self {
                modules,
                services,
                health,
                reload,
                reloadables,
                ..
            } = self;
            let entry = &mut modules[index];
            let mut ctx = AppContext {
                services,
                health: health.as_ref(),
                reload: reload.as_ref(),
                reloadables,
                snapshot: snapshot.as_ref(),
            };

            if let Err(source) = entry.module.register_config(&mut ctx) {
                let module = entry.module.name().to_string();
                error!(module = %module, error = %source, "module config registration failed");
                self.phase = Phase::Stopped;
                return Err(Error::ModuleInit { module, source });
            }
        }

        let mut failure: Option<(String, BoxError)> = None;
        for index in 0..self.modules.len() {
            let Self {
                modules,
                services,
                health,
                reload,
                reloadables,
                ..
            } = self;
            let entry = &mut modules[index];
            let mut ctx = AppContext {
                services,
                health: health.as_ref(),
                reload: reload.as_ref(),
                reloadables,
                snapshot: snapshot.as_ref(),
            };

            info!(module = entry.module.name(), "initializing module");
            match entry.module.init(&mut ctx).await {
                Ok(()) => entry.initialized = true,
                Err(source) => {
                    failure = Some((entry.module.name().to_string(), source));
                    break;
                }
            }
        }

        if let Some((module, source)) = failure {
            error!(module = %module, error = %source, "module init failed; aborting startup");
            self.stop_initialized().await;
            self.phase = Phase::Stopped;
            return Err(Error::ModuleInit { module, source });
        }

        self.phase = Phase::Initialized;
        Ok(())
    }

    /// Starts all modules in registration order, then the health
    /// aggregator.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Initialized {
            return Err(Error::InvalidPhase {
                operation: "start",
                phase: self.phase.name(),
            });
        }

        for index in 0..self.modules.len() {
            let entry = &mut self.modules[index];
            info!(module = entry.module.name(), "starting module");
            if let Err(source) = entry.module.start().await {
                let module = entry.module.name().to_string();
                error!(module = %module, error = %source, "module start failed; shutting down");
                self.stop_initialized().await;
                self.phase = Phase::Stopped;
                return Err(Error::ModuleStart { module, source });
            }
        }

        self.health.start();
        self.phase = Phase::Started;
        Ok(())
    }

    /// Stops the health aggregator, then all modules in reverse order.
    ///
    /// Every initialized module is stopped even when an earlier one
    /// errors; the first error is returned.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Initialized | Phase::Started) {
            return Err(Error::InvalidPhase {
                operation: "stop",
                phase: self.phase.name(),
            });
        }

        self.health.stop().await;
        let first_error = self.stop_initialized().await;
        self.phase = Phase::Stopped;
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop_initialized(&mut self) -> Option<Error> {
        let mut first_error = None;
        for entry in self.modules.iter_mut().rev() {
            if !entry.initialized {
                continue;
            }
            info!(module = entry.module.name(), "stopping module");
            if let Err(source) = entry.module.stop().await {
                let module = entry.module.name().to_string();
                warn!(module = %module, error = %source, "module stop failed");
                if first_error.is_none() {
                    first_error = Some(Error::ModuleStop { module, source });
                }
            }
            entry.initialized = false;
        }
        first_error
    }

    /// Initializes and starts the kernel, mapping the outcome to a
    /// process exit code: success (0) when both phases complete, failure
    /// (1) when init or start errors.
    pub async fn run(&mut self) -> ExitCode {
        if let Err(err) = self.init().await {
            error!(error = %err, "kernel init failed");
            return ExitCode::FAILURE;
        }
        if let Err(err) = self.start().await {
            error!(error = %err, "kernel start failed");
            return ExitCode::FAILURE;
        }
        ExitCode::SUCCESS
    }

    /// Produces a fresh snapshot, diffs it against the current one, and
    /// applies each reloadable module's section-scoped sub-diff.
    ///
    /// The new snapshot commits only when every batch applied; on error
    /// the previous snapshot stays current and the process continues on
    /// the previous configuration.
    pub async fn request_reload(&self) -> Result<(), Error> {
        let new_snapshot = {
            let mut slot = self.snapshot_source.lock();
            let source = slot.as_mut().ok_or(Error::NoSnapshotSource)?;
            source.load()?
        };

        let Some(old_snapshot) = self.snapshot() else {
            // First load; nothing to diff against.
            self.set_snapshot(new_snapshot);
            return Ok(());
        };

        let delta = diff(old_snapshot.tree(), new_snapshot.tree())?;
        if delta.is_empty() {
            info!("configuration reload requested; no changes detected");
            return Ok(());
        }

        // The whole reload is one batch from the caller's perspective: a
        // static path anywhere rejects it before any module is invoked.
        let static_paths: Vec<String> = delta
            .paths()
            .into_iter()
            .filter(|path| !self.reload.is_dynamic(path))
            .collect();
        if !static_paths.is_empty() {
            return Err(Error::StaticFieldChange {
                paths: static_paths,
            });
        }

        for (section, module) in &self.reloadables {
            let scoped = delta.scoped(section);
            if scoped.is_empty() {
                continue;
            }
            self.reload
                .apply_diff(module.as_ref(), section, &scoped, "config_reload")
                .await?;
        }

        self.set_snapshot(new_snapshot);
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::time::Duration;

    use crate::reload::ConfigChange;
    use crate::value::ConfigValue;

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct LoggingModule {
        name: &'static str,
        log: EventLog,
        fail_init: bool,
        fail_start: bool,
    }

    impl LoggingModule {
        fn entry(name: &'static str, log: &EventLog) -> Box<Self> {
            Box::new(Self {
                name,
                log: Arc::clone(log),
                fail_init: false,
                fail_start: false,
            })
        }
    }

    #[async_trait]
    impl Module for LoggingModule {
        fn name(&self) -> &str {
            self.name
        }

        async fn init(&mut self, _ctx: &mut AppContext<'_>) -> Result<(), BoxError> {
            self.log.lock().push(format!("init:{}", self.name));
            if self.fail_init {
                return Err("init exploded".into());
            }
            Ok(())
        }

        async fn start(&mut self) -> Result<(), BoxError> {
            self.log.lock().push(format!("start:{}", self.name));
            if self.fail_start {
                return Err("start exploded".into());
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), BoxError> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn kernel() -> AppKernel {
        AppKernel::with_health_config(
            ReloadManager::new(["log.level".to_string()]),
            HealthAggregatorConfig {
                enabled: false,
                ..HealthAggregatorConfig::default()
            },
        )
    }

    fn tree(entries: &[(&str, ConfigValue)]) -> ConfigValue {
        ConfigValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_order_forward_then_reverse() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut kernel = kernel();
        kernel.register_module(LoggingModule::entry("a", &log)).unwrap();
        kernel.register_module(LoggingModule::entry("b", &log)).unwrap();

        kernel.init().await.unwrap();
        kernel.start().await.unwrap();
        kernel.stop().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["init:a", "init:b", "start:a", "start:b", "stop:b", "stop:a"]
        );
    }

    #[tokio::test]
    async fn test_init_failure_stops_initialized_in_reverse() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut kernel = kernel();
        kernel.register_module(LoggingModule::entry("a", &log)).unwrap();
        let mut failing = LoggingModule::entry("b", &log);
        failing.fail_init = true;
        kernel.register_module(failing).unwrap();
        kernel.register_module(LoggingModule::entry("c", &log)).unwrap();

        let err = kernel.init().await.unwrap_err();
        assert!(matches!(err, Error::ModuleInit { ref module, .. } if module == "b"));

        // c never initialized; only a receives stop.
        assert_eq!(*log.lock(), vec!["init:a", "init:b", "stop:a"]);
    }

    #[tokio::test]
    async fn test_start_failure_shuts_down() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let mut kernel = kernel();
        let mut failing = LoggingModule::entry("a", &log);
        failing.fail_start = true;
        kernel.register_module(failing).unwrap();

        kernel.init().await.unwrap();
        let err = kernel.start().await.unwrap_err();
        assert!(matches!(err, Error::ModuleStart { .. }));
        assert_eq!(*log.lock(), vec!["init:a", "start:a", "stop:a"]);
    }

    #[tokio::test]
    async fn test_phase_misuse_rejected() {
        let mut kernel = kernel();
        let err = kernel.start().await.unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { .. }));

        kernel.init().await.unwrap();
        let err = kernel.init().await.unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn test_service_registry_typed_lookup() {
        let mut registry = ServiceRegistry::new();
        registry.register("pool", Arc::new(42_u32));

        assert_eq!(registry.get::<u32>("pool").as_deref(), Some(&42));
        assert!(registry.get::<String>("pool").is_none());
        assert!(registry.get::<u32>("missing").is_none());
        assert!(registry.contains("pool"));
    }

    struct CountingReloadable {
        applied: Mutex<Vec<Vec<ConfigChange>>>,
    }

    #[async_trait]
    impl ReloadableModule for CountingReloadable {
        fn name(&self) -> &str {
            "counting"
        }

        fn reload_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn reload(&self, changes: &[ConfigChange]) -> Result<(), BoxError> {
            self.applied.lock().push(changes.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_request_reload_applies_section_diff() {
        let kernel = {
            let mut kernel = kernel();
            kernel.register_reloadable(
                "log",
                Arc::new(CountingReloadable {
                    applied: Mutex::new(Vec::new()),
                }),
            );
            kernel
        };

        kernel.set_snapshot(ConfigSnapshot::from_tree(tree(&[(
            "log",
            tree(&[("level", ConfigValue::String("info".into()))]),
        )])));

        let next = tree(&[("log", tree(&[("level", ConfigValue::String("debug".into()))]))]);
        kernel.set_snapshot_source(Box::new(move || {
            Ok(ConfigSnapshot::from_tree(next.clone()))
        }));

        kernel.request_reload().await.unwrap();

        let snapshot = kernel.snapshot().unwrap();
        let level = snapshot
            .tree()
            .as_map()
            .and_then(|m| m.get("log"))
            .and_then(|l| l.as_map())
            .and_then(|m| m.get("level"))
            .cloned();
        assert_eq!(level, Some(ConfigValue::String("debug".into())));
        assert_eq!(kernel.reload_manager().history().len(), 1);
    }

    #[tokio::test]
    async fn test_request_reload_static_change_keeps_old_snapshot() {
        let kernel = {
            let mut kernel = kernel();
            kernel.register_reloadable(
                "server",
                Arc::new(CountingReloadable {
                    applied: Mutex::new(Vec::new()),
                }),
            );
            kernel
        };

        let original = tree(&[(
            "server",
            tree(&[("port", ConfigValue::UnsignedInteger(8080))]),
        )]);
        kernel.set_snapshot(ConfigSnapshot::from_tree(original.clone()));

        let next = tree(&[(
            "server",
            tree(&[("port", ConfigValue::UnsignedInteger(9090))]),
        )]);
        kernel.set_snapshot_source(Box::new(move || {
            Ok(ConfigSnapshot::from_tree(next.clone()))
        }));

        let err = kernel.request_reload().await.unwrap_err();
        assert!(matches!(err, Error::StaticFieldChange { .. }));
        assert_eq!(kernel.snapshot().unwrap().tree(), &original);
    }

    #[tokio::test]
    async fn test_request_reload_without_source_errors() {
        let kernel = kernel();
        let err = kernel.request_reload().await.unwrap_err();
        assert!(matches!(err, Error::NoSnapshotSource));
    }

    #[tokio::test]
    async fn test_register_config_marks_dynamic_paths() {
        use crate::schema::{FieldKind, FieldSpec, Schema};

        static FIELDS: &[FieldSpec] = &[FieldSpec {
            name: "level",
            kind: FieldKind::String,
            optional: false,
            env: Some("LOG_LEVEL"),
            yaml: Some("level"),
            json: Some("level"),
            toml: Some("level"),
            default: None,
            dynamic: true,
            type_name: "String",
        }];
        static SCHEMA: Schema = Schema {
            record: "LogSection",
            fields: FIELDS,
        };

        struct ConfiguredModule;

        #[async_trait]
        impl Module for ConfiguredModule {
            fn name(&self) -> &str {
                "configured"
            }

            fn register_config(&mut self, ctx: &mut AppContext<'_>) -> Result<(), BoxError> {
                ctx.register_config_section("logging", &SCHEMA)?;
                Ok(())
            }

            async fn init(&mut self, _ctx: &mut AppContext<'_>) -> Result<(), BoxError> {
                Ok(())
            }
        }

        let mut kernel = AppKernel::with_health_config(
            ReloadManager::new([]),
            HealthAggregatorConfig {
                enabled: false,
                ..HealthAggregatorConfig::default()
            },
        );
        kernel.register_module(Box::new(ConfiguredModule)).unwrap();
        kernel.init().await.unwrap();

        let manager = kernel.reload_manager();
        assert!(manager.is_dynamic("logging.level"));
        assert!(!manager.is_dynamic("logging.other"));
    }
}
