//! Kernel lifecycle with real modules: service wiring, health providers,
//! and the read contracts consumed by the external HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use modcore::{
    AppContext, AppKernel, BoxError, HealthAggregatorConfig, HealthProvider, HealthReport,
    HealthStatus, Module, ReloadManager,
};

struct ConnectionPool {
    dsn: String,
}

struct DatabaseModule;

struct DatabaseHealth;

#[async_trait]
impl HealthProvider for DatabaseHealth {
    async fn check(&self) -> Result<HealthReport, BoxError> {
        Ok(HealthReport::healthy("database")
            .with_detail("connections", serde_json::json!(5)))
    }
}

#[async_trait]
impl Module for DatabaseModule {
    fn name(&self) -> &str {
        "database"
    }

    async fn init(&mut self, ctx: &mut AppContext<'_>) -> Result<(), BoxError> {
        ctx.register_service(
            "db.pool",
            Arc::new(ConnectionPool {
                dsn: "postgres://localhost/app".to_string(),
            }),
        );
        ctx.register_health_provider("database", Arc::new(DatabaseHealth), false);
        Ok(())
    }
}

struct ApiModule {
    pool: Option<Arc<ConnectionPool>>,
}

#[async_trait]
impl Module for ApiModule {
    fn name(&self) -> &str {
        "api"
    }

    async fn init(&mut self, ctx: &mut AppContext<'_>) -> Result<(), BoxError> {
        // Registered by the database module, which initialized earlier.
        self.pool = ctx.get_service::<ConnectionPool>("db.pool");
        if self.pool.is_none() {
            return Err("db.pool service missing".into());
        }
        Ok(())
    }
}

fn kernel() -> AppKernel {
    AppKernel::with_health_config(
        ReloadManager::new([]),
        HealthAggregatorConfig {
            enabled: true,
            interval: Duration::from_millis(10),
            check_timeout: Duration::from_millis(100),
        },
    )
}

#[tokio::test]
async fn modules_share_services_in_dependency_order() {
    let mut kernel = kernel();
    kernel.register_module(Box::new(DatabaseModule)).unwrap();
    kernel.register_module(Box::new(ApiModule { pool: None })).unwrap();

    kernel.init().await.unwrap();
    kernel.start().await.unwrap();

    let pool = kernel.services().get::<ConnectionPool>("db.pool").unwrap();
    assert_eq!(pool.dsn, "postgres://localhost/app");

    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn health_verdict_flows_from_module_provider() {
    let mut kernel = kernel();
    kernel.register_module(Box::new(DatabaseModule)).unwrap();

    kernel.init().await.unwrap();
    kernel.start().await.unwrap();

    // Force a collection rather than waiting for the background tick.
    let verdict = kernel.health_aggregator().collect().await;
    assert_eq!(verdict.readiness, HealthStatus::Healthy);
    assert!(verdict.alive);
    assert_eq!(verdict.reports.len(), 1);
    assert_eq!(verdict.reports[0].module, "database");

    // The cached verdict serves the /health, /ready, /alive readers.
    let cached = kernel.health();
    assert_eq!(cached.readiness, HealthStatus::Healthy);

    let rendered = serde_json::to_value(&cached).unwrap();
    assert_eq!(rendered["readiness"], "healthy");
    assert_eq!(rendered["alive"], true);
    assert_eq!(rendered["reports"][0]["details"]["connections"], 5);

    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn misordered_modules_fail_init_and_clean_up() {
    let mut kernel = kernel();
    // Api first: its dependency is not registered yet.
    kernel.register_module(Box::new(ApiModule { pool: None })).unwrap();
    kernel.register_module(Box::new(DatabaseModule)).unwrap();

    let err = kernel.init().await.unwrap_err();
    assert!(matches!(err, modcore::Error::ModuleInit { ref module, .. } if module == "api"));
}
