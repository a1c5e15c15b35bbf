//! Source precedence and env-family feeding scenarios.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;

use modcore::{
    AffixedEnvFeeder, ConfigShape, DotenvFileFeeder, EnvCatalog, EnvFeeder, Error, SourceKind,
    schema::ConfigShape as _,
};

#[derive(Debug, Default, ConfigShape)]
struct DbConfig {
    #[field(env = "DB_HOST")]
    host: String,
}

#[derive(Debug, Default, ConfigShape)]
struct HostConfig {
    #[field(env = "HOST")]
    host: String,
}

#[derive(Debug, Default, ConfigShape)]
struct TimeoutConfig {
    #[field(env = "REQUEST_TIMEOUT")]
    request_timeout: Duration,
}

#[test]
#[serial]
fn os_env_beats_dotenv_and_both_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");
    std::fs::write(&env_path, "DB_HOST=dotenv-host\n").unwrap();

    unsafe {
        std::env::set_var("DB_HOST", "os-host");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(DotenvFileFeeder::new(&env_path)));
    engine.add_feeder(Box::new(EnvFeeder::with_catalog(catalog)));

    let loaded = engine.load::<DbConfig>().unwrap();
    assert_eq!(loaded.config.host, "os-host");

    let records = engine.tracker().records_for("host");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source_kind, SourceKind::Dotenv);
    assert_eq!(records[0].found_key, "DB_HOST");
    assert_eq!(records[1].source_kind, SourceKind::Env);
    assert_eq!(
        records[1].value,
        modcore::ConfigValue::String("os-host".into())
    );

    unsafe {
        std::env::remove_var("DB_HOST");
    }
}

#[test]
#[serial]
fn dotenv_wins_when_os_env_absent() {
    unsafe {
        std::env::remove_var("DB_HOST");
    }
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");
    std::fs::write(&env_path, "DB_HOST=dotenv-host\n").unwrap();

    let catalog = Arc::new(EnvCatalog::new());
    catalog.load_dotenv(&env_path).unwrap();

    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(EnvFeeder::with_catalog(catalog)));

    let loaded = engine.load::<DbConfig>().unwrap();
    assert_eq!(loaded.config.host, "dotenv-host");
}

#[test]
#[serial]
fn affixed_search_key_composes_double_underscores() {
    unsafe {
        std::env::set_var("PROD__HOST__ENV", "prod.example.com");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let feeder = AffixedEnvFeeder::with_catalog("PROD_", "_ENV", catalog).unwrap();
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(feeder));

    let loaded = engine.load::<HostConfig>().unwrap();
    assert_eq!(loaded.config.host, "prod.example.com");

    unsafe {
        std::env::remove_var("PROD__HOST__ENV");
    }
}

#[test]
#[serial]
fn module_aware_search_prefers_module_key() {
    unsafe {
        std::env::set_var("DATABASE_DB_HOST", "module-host");
        std::env::set_var("DB_HOST", "plain-host");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(EnvFeeder::for_module_with_catalog(
        "database", catalog,
    )));

    let loaded = engine.load::<DbConfig>().unwrap();
    assert_eq!(loaded.config.host, "module-host");

    let records = engine.tracker().records_for("host");
    assert_eq!(
        records[0].search_keys,
        vec!["DATABASE_DB_HOST", "DB_HOST_DATABASE", "DB_HOST"]
    );
    assert_eq!(records[0].found_key, "DATABASE_DB_HOST");

    unsafe {
        std::env::remove_var("DATABASE_DB_HOST");
        std::env::remove_var("DB_HOST");
    }
}

#[test]
#[serial]
fn duration_env_value_parses_composed_grammar() {
    unsafe {
        std::env::set_var("REQUEST_TIMEOUT", "2h30m45s");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(EnvFeeder::with_catalog(catalog)));

    let loaded = engine.load::<TimeoutConfig>().unwrap();
    assert_eq!(loaded.config.request_timeout, Duration::from_secs(9045));

    unsafe {
        std::env::remove_var("REQUEST_TIMEOUT");
    }
}

#[test]
#[serial]
fn invalid_duration_identifies_field_and_value() {
    unsafe {
        std::env::set_var("REQUEST_TIMEOUT", "invalid");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(EnvFeeder::with_catalog(catalog)));

    let err = engine.load::<TimeoutConfig>().unwrap_err();
    match &err {
        Error::CannotConvert { value, path, .. } => {
            assert_eq!(value, "invalid");
            assert_eq!(path, "request_timeout");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(
        err.to_string()
            .contains("cannot convert string 'invalid' to duration")
    );

    unsafe {
        std::env::remove_var("REQUEST_TIMEOUT");
    }
}

#[test]
#[serial]
fn instance_aware_feeder_fans_out_over_map() {
    use std::collections::HashMap;

    unsafe {
        std::env::set_var("CACHE_PRIMARY_HOST", "primary.internal");
        std::env::set_var("CACHE_REPLICA_HOST", "replica.internal");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut feeder = modcore::InstanceAwareEnvFeeder::with_catalog(
        |instance| format!("CACHE_{instance}"),
        catalog,
    );

    let mut instances: HashMap<String, HostConfig> = HashMap::from([
        ("primary".to_string(), HostConfig::default()),
        ("replica".to_string(), HostConfig::default()),
    ]);
    feeder.feed_instances(&mut instances).unwrap();

    assert_eq!(instances["primary"].host, "primary.internal");
    assert_eq!(instances["replica"].host, "replica.internal");

    unsafe {
        std::env::remove_var("CACHE_PRIMARY_HOST");
        std::env::remove_var("CACHE_REPLICA_HOST");
    }
}

#[test]
#[serial]
fn tenant_affixed_feeder_recomputes_per_tenant() {
    unsafe {
        std::env::set_var("ACME_HOST_EU", "acme.eu.example.com");
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut feeder = modcore::TenantAffixedEnvFeeder::with_catalog(
        |tenant| tenant.to_string(),
        |_tenant| "EU".to_string(),
        catalog,
    );

    let mut config = HostConfig::default();
    use modcore::Feeder as _;
    feeder.feed_key("acme", &mut config).unwrap();
    assert_eq!(config.host, "acme.eu.example.com");

    unsafe {
        std::env::remove_var("ACME_HOST_EU");
    }
}

#[test]
fn defaults_fill_unresolved_fields() {
    #[derive(Debug, Default, ConfigShape)]
    struct Defaulted {
        #[field(env = "UNSET_FOR_SURE_XYZ", default = "fallback")]
        name: String,

        #[field(env = "ALSO_UNSET_XYZ", default = "45s")]
        timeout: Duration,
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(EnvFeeder::with_catalog(catalog)));

    let loaded = engine.load::<Defaulted>().unwrap();
    assert_eq!(loaded.config.name, "fallback");
    assert_eq!(loaded.config.timeout, Duration::from_secs(45));

    let records = engine.tracker().records_for("name");
    let default_record = records.iter().find(|r| r.source_kind == SourceKind::Default);
    assert!(default_record.is_some());
}

#[test]
fn duplicate_env_tags_rejected_at_load() {
    #[derive(Debug, Default, ConfigShape)]
    struct Colliding {
        #[field(env = "SAME")]
        first: String,

        #[field(env = "SAME")]
        second: String,
    }

    let catalog = Arc::new(EnvCatalog::new());
    let mut engine = modcore::ConfigEngine::new();
    engine.add_feeder(Box::new(EnvFeeder::with_catalog(catalog)));

    let err = engine.load::<Colliding>().unwrap_err();
    assert!(matches!(err, Error::DuplicateTag { .. }));
}

#[test]
fn schema_exposes_declared_metadata() {
    let schema = DbConfig::schema();
    assert_eq!(schema.record, "DbConfig");
    assert_eq!(schema.fields.len(), 1);
    assert_eq!(schema.fields[0].env, Some("DB_HOST"));
    assert_eq!(schema.fields[0].yaml, Some("host"));
}
