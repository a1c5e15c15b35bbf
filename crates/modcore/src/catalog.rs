//! Unified environment catalog.
//!
//! [`EnvCatalog`] is the single read path all env-family feeders share: a
//! read-through view of the process environment merged with values loaded
//! from `.env`-style files, with per-key provenance. The OS environment
//! always wins over file sources, and is re-read on every lookup so that
//! runtime changes are observed.
//!
//! A process-wide catalog is available through [`EnvCatalog::global`] so
//! cooperating feeders observe one OS view; feeders also accept a private
//! catalog for test isolation.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::Error;

/// Provenance of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSource {
    /// The process environment.
    OsEnv,

    /// A loaded `.env`-style file.
    Dotenv(String),

    /// A feeder-assigned label.
    Feeder(String),
}

impl Display for EnvSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EnvSource::OsEnv => write!(f, "os_env"),
            EnvSource::Dotenv(path) => write!(f, "dotenv:{path}"),
            EnvSource::Feeder(label) => write!(f, "{label}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    source: EnvSource,
}

/// Read-through view of process environment plus `.env` loads.
#[derive(Debug, Default)]
pub struct EnvCatalog {
    table: RwLock<HashMap<String, Entry>>,
}

static GLOBAL: LazyLock<Arc<EnvCatalog>> = LazyLock::new(|| Arc::new(EnvCatalog::new()));

impl EnvCatalog {
    /// Creates a private catalog (tests, embedded setups).
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide catalog shared by default-constructed feeders.
    pub fn global() -> Arc<EnvCatalog> {
        Arc::clone(&GLOBAL)
    }

    /// Looks up `key`.
    ///
    /// The current OS environment is consulted first; a present, non-empty
    /// OS value wins and is promoted into the cache with source `os_env`.
    /// Otherwise the in-memory table (populated by `.env` loads and feeder
    /// writes) answers.
    pub fn get(&self, key: &str) -> Option<(String, EnvSource)> {
        if let Ok(v) = std::env::var(key)
            && !v.is_empty()
        {
            let mut table = self.table.write();
            table.insert(
                key.to_string(),
                Entry {
                    value: v.clone(),
                    source: EnvSource::OsEnv,
                },
            );
            return Some((v, EnvSource::OsEnv));
        }

        let table = self.table.read();
        table
            .get(key)
            // A cached os_env entry whose variable vanished is stale; file
            // sources still answer.
            .filter(|e| e.source != EnvSource::OsEnv)
            .map(|e| (e.value.clone(), e.source.clone()))
    }

    /// Returns the provenance of `key`, if known.
    pub fn source_of(&self, key: &str) -> Option<EnvSource> {
        self.get(key).map(|(_, source)| source)
    }

    /// Inserts a feeder-assigned entry.
    ///
    /// OS-backed keys are not overwritten; the OS value keeps winning on
    /// the read path regardless.
    pub fn set(&self, key: &str, value: &str, source: EnvSource) {
        let mut table = self.table.write();
        table.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                source,
            },
        );
    }

    /// Loads a `.env`-style file into the catalog.
    ///
    /// Parsed keys are inserted only when the key is absent from the OS
    /// environment and not already in the table, with source
    /// `dotenv:<path>`; existing OS values are never overwritten. The first
    /// file to define a key wins among file sources.
    pub fn load_dotenv(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let pairs = parse_dotenv(&content, path)?;

        let mut table = self.table.write();
        for (key, value) in pairs {
            if std::env::var(&key).map(|v| !v.is_empty()).unwrap_or(false) {
                continue;
            }
            table.entry(key).or_insert_with(|| Entry {
                value,
                source: EnvSource::Dotenv(path.display().to_string()),
            });
        }
        Ok(())
    }

    /// Clears the in-memory table. Test isolation entry point.
    pub fn reset(&self) {
        self.table.write().clear();
    }
}

/// Parses `.env` content into key/value pairs.
///
/// Grammar: one `KEY=VALUE` per line; blank lines and `#`-prefixed lines
/// are skipped; values wrapped in matching single or double quotes are
/// stripped; a non-comment line without `=` is an error carrying its
/// 1-based line number.
pub(crate) fn parse_dotenv(content: &str, path: &Path) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::InvalidDotenvLine {
                path: path.display().to_string(),
                line: idx + 1,
            });
        };
        let key = key.trim().to_string();
        let value = strip_quotes(value.trim()).to_string();
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn strip_quotes(v: &str) -> &str {
    if v.len() >= 2 {
        let bytes = v.as_bytes();
        if (bytes[0] == b'"' && bytes[v.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[v.len() - 1] == b'\'')
        {
            return &v[1..v.len() - 1];
        }
    }
    v
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    #[test]
    fn test_parse_dotenv_grammar() {
        let content = r#"
# comment
DB_HOST=localhost
DB_PORT = 5432
QUOTED="hello world"
SINGLE='v'

TRAILING=  spaced
"#;
        let pairs = parse_dotenv(content, Path::new(".env")).unwrap();
        let map: HashMap<_, _> = pairs.into_iter().collect();
        assert_eq!(map["DB_HOST"], "localhost");
        assert_eq!(map["DB_PORT"], "5432");
        assert_eq!(map["QUOTED"], "hello world");
        assert_eq!(map["SINGLE"], "v");
        assert_eq!(map["TRAILING"], "spaced");
    }

    #[test]
    fn test_parse_dotenv_rejects_line_without_equals() {
        let err = parse_dotenv("A=1\nnot-a-pair\n", Path::new("x.env")).unwrap_err();
        match err {
            Error::InvalidDotenvLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_quotes_kept() {
        let pairs = parse_dotenv("A=\"half\n", Path::new(".env")).unwrap();
        assert_eq!(pairs[0].1, "\"half");
    }

    #[test]
    #[serial]
    fn test_os_env_wins_over_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "CATALOG_TEST_KEY=from-file\n").unwrap();

        unsafe {
            std::env::set_var("CATALOG_TEST_KEY", "from-os");
        }
        let catalog = EnvCatalog::new();
        catalog.load_dotenv(&env_path).unwrap();

        let (value, source) = catalog.get("CATALOG_TEST_KEY").unwrap();
        assert_eq!(value, "from-os");
        assert_eq!(source, EnvSource::OsEnv);

        unsafe {
            std::env::remove_var("CATALOG_TEST_KEY");
        }
    }

    #[test]
    #[serial]
    fn test_dotenv_answers_when_os_absent() {
        unsafe {
            std::env::remove_var("CATALOG_ONLY_FILE");
        }
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "CATALOG_ONLY_FILE=file-value\n").unwrap();

        let catalog = EnvCatalog::new();
        catalog.load_dotenv(&env_path).unwrap();

        let (value, source) = catalog.get("CATALOG_ONLY_FILE").unwrap();
        assert_eq!(value, "file-value");
        assert!(matches!(source, EnvSource::Dotenv(_)));
        assert_eq!(catalog.source_of("CATALOG_ONLY_FILE"), Some(source));
    }

    #[test]
    #[serial]
    fn test_first_dotenv_writer_wins() {
        unsafe {
            std::env::remove_var("CATALOG_LAYERED");
        }
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.env");
        let second = dir.path().join("second.env");
        std::fs::write(&first, "CATALOG_LAYERED=one\n").unwrap();
        std::fs::write(&second, "CATALOG_LAYERED=two\n").unwrap();

        let catalog = EnvCatalog::new();
        catalog.load_dotenv(&first).unwrap();
        catalog.load_dotenv(&second).unwrap();

        assert_eq!(catalog.get("CATALOG_LAYERED").unwrap().0, "one");
    }

    #[test]
    #[serial]
    fn test_reset_clears_table() {
        unsafe {
            std::env::remove_var("CATALOG_RESET_KEY");
        }
        let catalog = EnvCatalog::new();
        catalog.set("CATALOG_RESET_KEY", "v", EnvSource::Feeder("test".into()));
        assert!(catalog.get("CATALOG_RESET_KEY").is_some());
        catalog.reset();
        assert!(catalog.get("CATALOG_RESET_KEY").is_none());
    }
}
