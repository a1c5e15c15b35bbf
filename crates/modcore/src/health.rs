//! Health aggregation.
//!
//! Registered providers are polled on a schedule, each bounded by a
//! per-check timeout; per-component reports merge into one cached
//! [`AggregatedHealth`] verdict that the external HTTP surface reads.
//! Required providers drive readiness and liveness; optional providers
//! contribute reports without lowering either verdict. Provider errors
//! and panics become Unhealthy reports — they never propagate as process
//! errors.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::BoxError;

/// Status of one component or of the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational with reduced capacity.
    Degraded,
    /// Not operational.
    Unhealthy,
    /// No information.
    Unknown,
}

impl HealthStatus {
    /// Worst-first ordering: Unhealthy > Degraded > Healthy > Unknown.
    fn severity(self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 3,
            HealthStatus::Degraded => 2,
            HealthStatus::Healthy => 1,
            HealthStatus::Unknown => 0,
        }
    }

    /// Anything but Unknown.
    pub fn is_definitive(self) -> bool {
        self != HealthStatus::Unknown
    }

    /// Healthy or Degraded: the component is still serving.
    pub fn at_least_degraded(self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// One component's health at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Reporting module.
    pub module: String,

    /// Component within the module, when finer-grained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    /// Observed status.
    pub status: HealthStatus,

    /// Human-readable message.
    pub message: String,

    /// When this check ran.
    pub checked_at: SystemTime,

    /// Since when the current status has been observed. Always at or
    /// before `checked_at`.
    pub observed_since: SystemTime,

    /// Whether the provider was registered optional.
    pub optional: bool,

    /// Free-form details.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl HealthReport {
    /// A report with the given status, stamped now.
    pub fn new(module: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            module: module.into(),
            component: None,
            status,
            message: message.into(),
            checked_at: now,
            observed_since: now,
            optional: false,
            details: BTreeMap::new(),
        }
    }

    /// A Healthy report.
    pub fn healthy(module: impl Into<String>) -> Self {
        Self::new(module, HealthStatus::Healthy, "ok")
    }

    /// Sets the component name.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Adds one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// A pollable health source.
#[async_trait]
pub trait HealthProvider: Send + Sync {
    /// Runs one check. Errors are captured into Unhealthy reports by the
    /// aggregator.
    async fn check(&self) -> Result<HealthReport, BoxError>;

    /// Whether this provider participates in the liveness verdict.
    /// Defaults to yes; providers may opt out.
    fn liveness_relevant(&self) -> bool {
        true
    }
}

/// A registered provider.
#[derive(Clone)]
pub struct HealthRegistration {
    /// Registration name; authoritative for the report's module field.
    pub name: String,

    /// The provider.
    pub provider: Arc<dyn HealthProvider>,

    /// Optional providers never lower readiness or liveness.
    pub optional: bool,
}

/// The merged verdict over all providers.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedHealth {
    /// Worst definitive status across required providers.
    pub readiness: HealthStatus,

    /// True when every liveness-relevant required provider is at least
    /// Degraded.
    pub alive: bool,

    /// All per-component reports from the last collection.
    pub reports: Vec<HealthReport>,

    /// When the collection finished.
    pub collected_at: SystemTime,
}

impl Default for AggregatedHealth {
    /// The verdict before any collection ran.
    fn default() -> Self {
        Self {
            readiness: HealthStatus::Unknown,
            alive: true,
            reports: Vec::new(),
            collected_at: SystemTime::now(),
        }
    }
}

/// Health aggregator configuration.
#[derive(Debug, Clone)]
pub struct HealthAggregatorConfig {
    /// Whether the background collector runs at all.
    pub enabled: bool,

    /// Tick interval of the background collector.
    pub interval: Duration,

    /// Upper bound for one provider check.
    pub check_timeout: Duration,
}

impl Default for HealthAggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
        }
    }
}

struct Inner {
    config: HealthAggregatorConfig,
    providers: RwLock<Vec<HealthRegistration>>,
    latest: RwLock<AggregatedHealth>,
    // name -> (last status, observed since)
    observed: Mutex<HashMap<String, (HealthStatus, SystemTime)>>,
}

/// Periodically polls providers and caches the merged verdict.
pub struct HealthAggregator {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl HealthAggregator {
    /// Creates an aggregator; call [`start`](Self::start) to begin
    /// background collection.
    pub fn new(config: HealthAggregatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                providers: RwLock::new(Vec::new()),
                latest: RwLock::new(AggregatedHealth::default()),
                observed: Mutex::new(HashMap::new()),
            }),
            handle: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// Registers a provider under `name`.
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn HealthProvider>, optional: bool) {
        self.inner.providers.write().push(HealthRegistration {
            name: name.into(),
            provider,
            optional,
        });
    }

    /// The cached verdict from the most recent collection.
    pub fn latest(&self) -> AggregatedHealth {
        self.inner.latest.read().clone()
    }

    /// Forces an immediate collection and returns the fresh verdict.
    pub async fn collect(&self) -> AggregatedHealth {
        collect_round(&self.inner).await
    }

    /// Spawns the background collection loop.
    ///
    /// A no-op when disabled by configuration or already running. The
    /// first collection happens immediately.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            debug!("health aggregator disabled; not starting");
            return;
        }
        let mut handle_slot = self.handle.lock();
        if handle_slot.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let inner = Arc::clone(&self.inner);
        *handle_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        collect_round(&inner).await;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Stops the background loop and waits for it to exit.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Runs one collection round: fan out, bound, merge, cache.
async fn collect_round(inner: &Arc<Inner>) -> AggregatedHealth {
    let registrations: Vec<HealthRegistration> = inner.providers.read().clone();
    let timeout = inner.config.check_timeout;

    let mut tasks = Vec::with_capacity(registrations.len());
    for registration in &registrations {
        let provider = Arc::clone(&registration.provider);
        tasks.push(tokio::spawn(async move {
            tokio::time::timeout(timeout, provider.check()).await
        }));
    }
    let joined = futures::future::join_all(tasks).await;

    let now = SystemTime::now();
    let mut reports = Vec::with_capacity(registrations.len());
    let mut readiness = HealthStatus::Unknown;
    let mut required_seen = false;
    let mut alive = true;

    let mut observed = inner.observed.lock();
    for (registration, outcome) in registrations.iter().zip(joined) {
        let mut report = match outcome {
            Ok(Ok(Ok(report))) => report,
            Ok(Ok(Err(error))) => HealthReport::new(
                &registration.name,
                HealthStatus::Unhealthy,
                error.to_string(),
            ),
            Ok(Err(_elapsed)) => {
                warn!(provider = %registration.name, ?timeout, "health check timed out");
                HealthReport::new(
                    &registration.name,
                    HealthStatus::Unhealthy,
                    format!("health check timed out after {timeout:?}"),
                )
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "health check panicked"
                } else {
                    "health check aborted"
                };
                warn!(provider = %registration.name, reason, "health check task failed");
                HealthReport::new(&registration.name, HealthStatus::Unhealthy, reason)
            }
        };

        report.module = registration.name.clone();
        report.optional = registration.optional;
        report.checked_at = now;
        report.observed_since = match observed.get(&registration.name) {
            Some((status, since)) if *status == report.status => *since,
            _ => now,
        };
        observed.insert(registration.name.clone(), (report.status, report.observed_since));

        if !registration.optional {
            required_seen = true;
            if report.status.is_definitive() && report.status.severity() > readiness.severity() {
                readiness = report.status;
            }
            if registration.provider.liveness_relevant() && !report.status.at_least_degraded() {
                alive = false;
            }
        }

        reports.push(report);
    }
    drop(observed);

    // No required provider registered: the process is trivially ready.
    // Required providers present but nothing definitive: Unhealthy.
    if readiness == HealthStatus::Unknown {
        readiness = if required_seen {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
    }

    let verdict = AggregatedHealth {
        readiness,
        alive,
        reports,
        collected_at: now,
    };
    *inner.latest.write() = verdict.clone();
    verdict
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        status: HealthStatus,
        liveness: bool,
    }

    #[async_trait]
    impl HealthProvider for FixedProvider {
        async fn check(&self) -> Result<HealthReport, BoxError> {
            Ok(HealthReport::new("fixed", self.status, "fixed"))
        }

        fn liveness_relevant(&self) -> bool {
            self.liveness
        }
    }

    fn fixed(status: HealthStatus) -> Arc<dyn HealthProvider> {
        Arc::new(FixedProvider {
            status,
            liveness: true,
        })
    }

    fn aggregator() -> HealthAggregator {
        HealthAggregator::new(HealthAggregatorConfig {
            enabled: true,
            interval: Duration::from_millis(10),
            check_timeout: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_required_unhealthy_lowers_readiness() {
        let agg = aggregator();
        agg.register("db", fixed(HealthStatus::Unhealthy), false);
        agg.register("cache", fixed(HealthStatus::Unhealthy), true);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Unhealthy);
        assert!(!verdict.alive);
    }

    #[tokio::test]
    async fn test_optional_unhealthy_does_not_lower() {
        let agg = aggregator();
        agg.register("db", fixed(HealthStatus::Healthy), false);
        agg.register("cache", fixed(HealthStatus::Unhealthy), true);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Healthy);
        assert!(verdict.alive);
        assert_eq!(verdict.reports.len(), 2);
    }

    #[tokio::test]
    async fn test_degraded_is_alive_but_not_healthy() {
        let agg = aggregator();
        agg.register("db", fixed(HealthStatus::Degraded), false);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Degraded);
        assert!(verdict.alive);
    }

    #[tokio::test]
    async fn test_unknown_ignored_when_definitive_exists() {
        let agg = aggregator();
        agg.register("a", fixed(HealthStatus::Unknown), false);
        agg.register("b", fixed(HealthStatus::Healthy), false);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_all_unknown_collapses_to_unhealthy() {
        let agg = aggregator();
        agg.register("a", fixed(HealthStatus::Unknown), false);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_no_required_providers_is_ready() {
        let agg = aggregator();
        agg.register("cache", fixed(HealthStatus::Unhealthy), true);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Healthy);
        assert!(verdict.alive);
    }

    #[tokio::test]
    async fn test_provider_error_becomes_unhealthy_report() {
        struct Failing;

        #[async_trait]
        impl HealthProvider for Failing {
            async fn check(&self) -> Result<HealthReport, BoxError> {
                Err("connection refused".into())
            }
        }

        let agg = aggregator();
        agg.register("db", Arc::new(Failing), false);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Unhealthy);
        assert_eq!(verdict.reports[0].message, "connection refused");
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_unhealthy() {
        struct Slow;

        #[async_trait]
        impl HealthProvider for Slow {
            async fn check(&self) -> Result<HealthReport, BoxError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(HealthReport::healthy("slow"))
            }
        }

        let agg = aggregator();
        agg.register("slow", Arc::new(Slow), false);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Unhealthy);
        assert!(!verdict.alive);
        assert!(verdict.reports[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_panicking_provider_captured() {
        struct Panics;

        #[async_trait]
        impl HealthProvider for Panics {
            async fn check(&self) -> Result<HealthReport, BoxError> {
                panic!("boom");
            }
        }

        let agg = aggregator();
        agg.register("bad", Arc::new(Panics), false);

        let verdict = agg.collect().await;
        assert_eq!(verdict.readiness, HealthStatus::Unhealthy);
        assert!(verdict.reports[0].message.contains("panicked"));
    }

    #[tokio::test]
    async fn test_liveness_opt_out() {
        let agg = aggregator();
        agg.register(
            "batch",
            Arc::new(FixedProvider {
                status: HealthStatus::Unhealthy,
                liveness: false,
            }),
            false,
        );

        let verdict = agg.collect().await;
        // Readiness still drops; liveness does not.
        assert_eq!(verdict.readiness, HealthStatus::Unhealthy);
        assert!(verdict.alive);
    }

    #[tokio::test]
    async fn test_observed_since_stable_across_collections() {
        let agg = aggregator();
        agg.register("db", fixed(HealthStatus::Healthy), false);

        let first = agg.collect().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = agg.collect().await;

        assert_eq!(
            first.reports[0].observed_since,
            second.reports[0].observed_since
        );
        assert!(second.reports[0].checked_at >= second.reports[0].observed_since);
        assert!(second.reports[0].checked_at > first.reports[0].checked_at);
    }

    #[tokio::test]
    async fn test_background_loop_updates_cache() {
        let agg = aggregator();
        agg.register("db", fixed(HealthStatus::Healthy), false);

        agg.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let verdict = agg.latest();
        agg.stop().await;

        assert_eq!(verdict.readiness, HealthStatus::Healthy);
        assert_eq!(verdict.reports.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_aggregator_does_not_start() {
        let agg = HealthAggregator::new(HealthAggregatorConfig {
            enabled: false,
            ..HealthAggregatorConfig::default()
        });
        agg.register("db", fixed(HealthStatus::Unhealthy), false);

        agg.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let verdict = agg.latest();
        agg.stop().await;

        // Never collected; still the initial verdict.
        assert_eq!(verdict.readiness, HealthStatus::Unknown);
        assert!(verdict.reports.is_empty());
    }
}
