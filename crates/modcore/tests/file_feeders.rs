//! File-format feeding: YAML, JSON, TOML, and `.env` documents.

use std::collections::HashMap;
use std::time::Duration;

use modcore::{ConfigEngine, ConfigShape, Error, FileFeeder, SourceKind};

#[derive(Debug, Default, ConfigShape)]
struct PoolConfig {
    #[field(env = "POOL_SIZE")]
    size: u32,
}

#[derive(Debug, Default, ConfigShape)]
struct ServerConfig {
    #[field(yaml = "listen_host", json = "listenHost", toml = "listen")]
    host: String,

    port: u16,

    #[field(default = "30s")]
    request_timeout: Duration,

    tags: Vec<String>,

    #[field(json = "-")]
    secret_path: String,

    replicas: [String; 2],

    database: PoolConfig,

    pools: HashMap<String, Option<PoolConfig>>,

    fallback: Option<PoolConfig>,
}

fn feed_file(content: &str, extension: &str) -> Result<(ServerConfig, ConfigEngine), Error> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("config.{extension}"));
    std::fs::write(&path, content).unwrap();

    let mut engine = ConfigEngine::new();
    engine.add_feeder(Box::new(FileFeeder::new(&path)));
    let loaded = engine.load::<ServerConfig>()?;
    Ok((loaded.config, engine))
}

#[test]
fn yaml_document_populates_nested_shape() {
    let content = r#"
listen_host: yaml.example.com
port: 8443
request_timeout: 2h30m45s
tags:
  - alpha
  - beta
secret_path: /run/secret
replicas:
  - one
  - two
database:
  size: 12
pools:
  metrics:
    size: 3
  disabled: null
fallback:
  size: 1
"#;
    let (config, engine) = feed_file(content, "yaml").unwrap();

    assert_eq!(config.host, "yaml.example.com");
    assert_eq!(config.port, 8443);
    assert_eq!(config.request_timeout, Duration::from_secs(9045));
    assert_eq!(config.tags, vec!["alpha", "beta"]);
    assert_eq!(config.secret_path, "/run/secret");
    assert_eq!(config.replicas, ["one".to_string(), "two".to_string()]);
    assert_eq!(config.database.size, 12);
    assert_eq!(config.pools["metrics"].as_ref().unwrap().size, 3);
    assert!(config.pools["disabled"].is_none());
    assert_eq!(config.fallback.unwrap().size, 1);

    let record = engine
        .tracker()
        .records_for("host")
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(record.source_kind, SourceKind::Yaml);
    assert_eq!(record.found_key, "listen_host");
}

#[test]
fn json_document_uses_json_tags_and_skips_excluded() {
    let content = r#"
{
  "listenHost": "json.example.com",
  "port": 9000,
  "request_timeout": 90,
  "secret_path": "/should/be/ignored",
  "database": {"size": 4}
}
"#;
    let (config, _) = feed_file(content, "json").unwrap();

    assert_eq!(config.host, "json.example.com");
    assert_eq!(config.port, 9000);
    // Bare numbers are whole seconds.
    assert_eq!(config.request_timeout, Duration::from_secs(90));
    // `json = "-"` removes the field from JSON documents.
    assert_eq!(config.secret_path, "");
    assert_eq!(config.database.size, 4);
}

#[test]
fn toml_document_uses_toml_tags() {
    let content = r#"
listen = "toml.example.com"
port = 7070
request_timeout = "15m"

[database]
size = 2
"#;
    let (config, _) = feed_file(content, "toml").unwrap();

    assert_eq!(config.host, "toml.example.com");
    assert_eq!(config.port, 7070);
    assert_eq!(config.request_timeout, Duration::from_secs(900));
    assert_eq!(config.database.size, 2);
}

#[test]
fn duration_string_failure_names_value() {
    let err = feed_file("request_timeout: nonsense\n", "yaml").unwrap_err();
    assert!(
        err.to_string()
            .contains("cannot convert string 'nonsense' to duration")
    );
}

#[test]
fn overfilled_fixed_array_is_rejected() {
    let content = r#"
replicas:
  - one
  - two
  - three
"#;
    let err = feed_file(content, "yaml").unwrap_err();
    match err {
        Error::ArraySizeExceeded {
            path,
            got,
            capacity,
        } => {
            assert_eq!(path, "replicas");
            assert_eq!(got, 3);
            assert_eq!(capacity, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn type_mismatch_is_a_conversion_error() {
    let err = feed_file("port: not-a-number\n", "yaml").unwrap_err();
    assert!(matches!(err, Error::CannotConvert { .. }));
}

#[test]
fn unknown_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.ini");
    std::fs::write(&path, "a=1\n").unwrap();

    let mut engine = ConfigEngine::new();
    engine.add_feeder(Box::new(FileFeeder::new(&path)));
    let err = engine.load::<ServerConfig>().unwrap_err();
    assert!(matches!(err, Error::UnknownFormat { .. }));
}

#[test]
fn missing_file_surfaces_read_error() {
    let mut engine = ConfigEngine::new();
    engine.add_feeder(Box::new(FileFeeder::new("/nonexistent/config.yaml")));
    let err = engine.load::<ServerConfig>().unwrap_err();
    assert!(matches!(err, Error::FileRead { .. }));
}

#[test]
fn snapshot_round_trips_file_content() {
    let content = r#"
listen_host: round.example.com
port: 8080
request_timeout: 1m30s
tags:
  - a
database:
  size: 7
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, content).unwrap();

    let mut engine = ConfigEngine::new();
    engine.add_feeder(Box::new(FileFeeder::new(&path)));
    let loaded = engine.load::<ServerConfig>().unwrap();

    // Snapshot trees are keyed by field name, not by file tag.
    let exported = loaded.snapshot.to_json();
    assert_eq!(exported["host"], "round.example.com");
    assert_eq!(exported["port"], 8080);
    assert_eq!(exported["request_timeout"], "1m30s");
    assert_eq!(exported["tags"], serde_json::json!(["a"]));
    assert_eq!(exported["database"]["size"], 7);
}

#[test]
fn parse_error_carries_file_path() {
    let err = feed_file("listen_host: [unclosed\n", "yaml").unwrap_err();
    match err {
        Error::FileParse { format, .. } | Error::FileParseNoSpan { format, .. } => {
            assert_eq!(format, "YAML");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
