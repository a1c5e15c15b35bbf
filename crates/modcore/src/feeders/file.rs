//! File-based feeders: YAML, JSON, TOML, and `.env` documents.
//!
//! All formats normalize to a [`serde_json::Value`] tree, then walk the
//! target schema in lockstep with the tree using the per-format file tags.
//! Parse failures render with source-code snippets via [`miette`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use miette::{NamedSource, SourceSpan};
use serde_json::Value;
use tracing::debug;

use crate::Error;
use crate::catalog::parse_dotenv;
use crate::schema::{FieldKind, FieldSpec, Schema, ShapedTarget, join_prefixed};
use crate::tracker::{FieldPopulation, SharedTracker, SourceKind};
use crate::value::ConfigValue;

use super::env::{EnvWalkSpec, feed_lookup};
use super::wrap_set_error;

// ============================================================================
// File Format Detection and Parsing
// ============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// YAML format (.yaml, .yml)
    Yaml,
    /// JSON format (.json)
    Json,
    /// TOML format (.toml)
    Toml,
}

impl FileFormat {
    /// Detects the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Some(FileFormat::Yaml),
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }

    /// Format name for diagnostics.
    pub fn display_name(self) -> &'static str {
        match self {
            FileFormat::Yaml => "YAML",
            FileFormat::Json => "JSON",
            FileFormat::Toml => "TOML",
        }
    }

    /// The provenance source kind for this format.
    pub fn source_kind(self) -> SourceKind {
        match self {
            FileFormat::Yaml => SourceKind::Yaml,
            FileFormat::Json => SourceKind::Json,
            FileFormat::Toml => SourceKind::Toml,
        }
    }

    /// The file tag declared for this format.
    pub fn tag_of(self, field: &FieldSpec) -> Option<&'static str> {
        match self {
            FileFormat::Yaml => field.yaml,
            FileFormat::Json => field.json,
            FileFormat::Toml => field.toml,
        }
    }
}

/// Where a parser reported its failure, in whatever coordinates that
/// parser speaks.
enum ParseLocation {
    /// Byte range within the document (TOML).
    Bytes(std::ops::Range<usize>),
    /// 1-indexed line and column (JSON, YAML).
    LineColumn(usize, usize),
    /// No usable position.
    Unknown,
}

/// Builds the crate-level parse error, attaching a source snippet when
/// the parser reported a usable position.
fn file_parse_error(
    format: &'static str,
    path: &Path,
    content: &str,
    location: ParseLocation,
    message: String,
    help: &'static str,
) -> Error {
    let span = match location {
        ParseLocation::Bytes(range) => {
            Some(SourceSpan::new(range.start.into(), range.len().max(1)))
        }
        ParseLocation::LineColumn(line, column) => Some(highlight_at(
            content,
            document_offset(content, line, column),
        )),
        ParseLocation::Unknown => None,
    };

    match span {
        Some(span) => Error::FileParse {
            format,
            path: path.display().to_string(),
            src: NamedSource::new(path.display().to_string(), content.to_string()),
            span,
            message,
            help: help.to_string(),
        },
        None => Error::FileParseNoSpan {
            format,
            path: path.display().to_string(),
            message,
        },
    }
}

/// Byte offset of a 1-indexed line/column position.
fn document_offset(content: &str, line: usize, column: usize) -> usize {
    let line_start: usize = content
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(content.len())
}

/// Highlights from `offset` to the end of its line, capped so the label
/// stays readable in terminal output.
fn highlight_at(content: &str, offset: usize) -> SourceSpan {
    const MAX_HIGHLIGHT: usize = 40;
    let offset = offset.min(content.len().saturating_sub(1));
    let rest = &content[offset..];
    let len = rest.find('\n').unwrap_or(rest.len()).clamp(1, MAX_HIGHLIGHT);
    SourceSpan::new(offset.into(), len)
}

/// Scans an error message for `line <N>` and `column <N>` word pairs.
///
/// YAML errors carry their position only in prose; the words are scanned
/// rather than the exact phrasing matched so minor wording changes in the
/// parser keep working.
fn yaml_location(message: &str) -> Option<(usize, usize)> {
    let mut line = None;
    let mut column = None;

    let mut words = message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty());
    while let Some(word) = words.next() {
        match word {
            "line" if line.is_none() => line = words.next().and_then(|n| n.parse().ok()),
            "column" if column.is_none() => column = words.next().and_then(|n| n.parse().ok()),
            _ => {}
        }
    }

    Some((line?, column?))
}

/// Parses a configuration file into a JSON tree.
pub(crate) fn parse_file(path: &Path, format: FileFormat) -> Result<Value, Error> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    parse_content(&content, format, path)
}

pub(crate) fn parse_content(content: &str, format: FileFormat, path: &Path) -> Result<Value, Error> {
    match format {
        FileFormat::Json => serde_json::from_str(content).map_err(|e| {
            file_parse_error(
                "JSON",
                path,
                content,
                ParseLocation::LineColumn(e.line(), e.column()),
                e.to_string(),
                "check for missing commas, quotes, or brackets",
            )
        }),
        FileFormat::Toml => {
            let document: toml::Value = toml::from_str(content).map_err(|e| {
                let location = e.span().map_or(ParseLocation::Unknown, ParseLocation::Bytes);
                file_parse_error(
                    "TOML",
                    path,
                    content,
                    location,
                    e.message().to_string(),
                    "check for missing quotes, invalid values, or syntax errors",
                )
            })?;
            Ok(toml_tree_to_json(document))
        }
        FileFormat::Yaml => serde_saphyr::from_str(content).map_err(|e| {
            let message = e.to_string();
            let location = yaml_location(&message)
                .map_or(ParseLocation::Unknown, |(line, column)| {
                    ParseLocation::LineColumn(line, column)
                });
            file_parse_error(
                "YAML",
                path,
                content,
                location,
                message,
                "check indentation and ensure proper YAML syntax",
            )
        }),
    }
}

/// Normalizes a parsed TOML document into the JSON tree the walk uses.
///
/// Datetimes become their display strings; a non-finite float has no
/// JSON number and becomes null.
fn toml_tree_to_json(node: toml::Value) -> Value {
    use toml::Value as Toml;

    match node {
        Toml::Table(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, entry) in entries {
                object.insert(key, toml_tree_to_json(entry));
            }
            Value::Object(object)
        }
        Toml::Array(items) => Value::Array(items.into_iter().map(toml_tree_to_json).collect()),
        Toml::String(text) => Value::String(text),
        Toml::Integer(number) => Value::from(number),
        Toml::Float(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Toml::Boolean(flag) => Value::Bool(flag),
        Toml::Datetime(stamp) => Value::String(stamp.to_string()),
    }
}

// ============================================================================
// Schema-Lockstep Tree Walk
// ============================================================================

/// Parameters shared by every file-tree walk.
pub(super) struct TreeWalkSpec<'a> {
    pub feeder: &'a str,
    pub source_kind: SourceKind,
    pub tracker: Option<&'a SharedTracker>,
    pub verbose: bool,
    pub instance_key: &'a str,
}

/// Walks `schema` and `tree` in lockstep, writing converted leaf values
/// into `target`. `keys_of` yields the candidate document keys for a field
/// (empty = field skipped for this source).
pub(super) fn feed_tree(
    spec: &TreeWalkSpec<'_>,
    target: &mut dyn ShapedTarget,
    tree: &Value,
    keys_of: &dyn Fn(&FieldSpec) -> Vec<&'static str>,
) -> Result<(), Error> {
    let schema = target.schema();
    let mut segments: Vec<String> = Vec::new();
    walk_record(spec, schema, tree, &mut segments, target, keys_of)
}

fn walk_record(
    spec: &TreeWalkSpec<'_>,
    schema: &'static Schema,
    tree: &Value,
    segments: &mut Vec<String>,
    target: &mut dyn ShapedTarget,
    keys_of: &dyn Fn(&FieldSpec) -> Vec<&'static str>,
) -> Result<(), Error> {
    for field in schema.fields {
        let keys = keys_of(field);
        if keys.is_empty() {
            continue;
        }
        let path = join_prefixed(&segments.join("."), field.name);
        let hit = keys
            .iter()
            .find_map(|key| tree.get(*key).map(|value| (*key, value)));

        match field.kind {
            FieldKind::Record(nested) => {
                let Some((_, sub)) = hit else { continue };
                match sub {
                    Value::Object(_) => {
                        segments.push(field.name.to_string());
                        walk_record(spec, nested(), sub, segments, target, keys_of)?;
                        segments.pop();
                    }
                    Value::Null => {}
                    other => {
                        return Err(convert_error(spec, &path, other, "record"));
                    }
                }
            }
            FieldKind::RecordMap(nested) => {
                let Some((_, sub)) = hit else { continue };
                let Value::Object(entries) = sub else {
                    if sub.is_null() {
                        continue;
                    }
                    return Err(convert_error(spec, &path, sub, "record map"));
                };
                for (entry_key, entry_value) in entries {
                    let entry_path = format!("{path}.{entry_key}");
                    match entry_value {
                        // JSON null populates a nil pointer entry.
                        Value::Null => {
                            let mut full: Vec<&str> =
                                segments.iter().map(String::as_str).collect();
                            full.push(field.name);
                            full.push(entry_key.as_str());
                            target
                                .set_value(&full, ConfigValue::None)
                                .map_err(|e| wrap_set_error(&entry_path, e))?;
                        }
                        Value::Object(_) => {
                            segments.push(field.name.to_string());
                            segments.push(entry_key.clone());
                            walk_record(spec, nested(), entry_value, segments, target, keys_of)?;
                            segments.pop();
                            segments.pop();
                        }
                        other => {
                            return Err(convert_error(spec, &entry_path, other, "record"));
                        }
                    }
                }
            }
            _ => {
                let search: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                match hit {
                    Some((found_key, raw)) if !raw.is_null() => {
                        if spec.verbose {
                            debug!(feeder = spec.feeder, field = %path, key = found_key, "found value");
                        }
                        let value =
                            field.kind.parse_json(raw).map_err(|e| Error::CannotConvert {
                                value: e.value,
                                target: e.expected.to_string(),
                                path: path.clone(),
                                origin: spec.source_kind,
                            })?;

                        let mut full: Vec<&str> = segments.iter().map(String::as_str).collect();
                        full.push(field.name);
                        target
                            .set_value(&full, value.clone())
                            .map_err(|e| wrap_set_error(&path, e))?;

                        track(
                            spec,
                            &path,
                            field,
                            search,
                            found_key.to_string(),
                            value,
                        );
                    }
                    _ => {
                        track(spec, &path, field, search, String::new(), ConfigValue::None);
                    }
                }
            }
        }
    }
    Ok(())
}

fn convert_error(spec: &TreeWalkSpec<'_>, path: &str, raw: &Value, expected: &str) -> Error {
    Error::CannotConvert {
        value: raw.to_string(),
        target: expected.to_string(),
        path: path.to_string(),
        origin: spec.source_kind,
    }
}

fn track(
    spec: &TreeWalkSpec<'_>,
    path: &str,
    field: &FieldSpec,
    search_keys: Vec<String>,
    found_key: String,
    value: ConfigValue,
) {
    let Some(tracker) = spec.tracker else { return };
    let source_key = if found_key.is_empty() {
        search_keys.first().cloned().unwrap_or_default()
    } else {
        found_key.clone()
    };
    tracker.record(FieldPopulation {
        path: path.to_string(),
        field_type: field.type_name.to_string(),
        feeder: spec.feeder.to_string(),
        source_kind: spec.source_kind,
        source_key,
        search_keys,
        found_key,
        instance_key: spec.instance_key.to_string(),
        value,
    });
}

// ============================================================================
// File Feeder
// ============================================================================

/// Feeds a target from one YAML, JSON, or TOML document.
///
/// The format is detected from the file extension; fields are matched by
/// the tag declared for that format (falling back to the field name, with
/// `"-"` removing the field from the format). A missing file is an error
/// for this feeder; use [`LayeredFeeder`](super::LayeredFeeder) for
/// optional layers.
pub struct FileFeeder {
    path: PathBuf,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl FileFeeder {
    /// Creates a feeder for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracker: None,
            verbose: false,
        }
    }
}

impl super::Feeder for FileFeeder {
    fn name(&self) -> &str {
        "file"
    }

    fn feed(&mut self, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let format = FileFormat::from_path(&self.path).ok_or_else(|| Error::UnknownFormat {
            extension: self
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string(),
        })?;
        let tree = parse_file(&self.path, format)?;

        let spec = TreeWalkSpec {
            feeder: "file",
            source_kind: format.source_kind(),
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key: "",
        };
        feed_tree(&spec, target, &tree, &|field| {
            format.tag_of(field).into_iter().collect()
        })
    }

    fn set_tracker(&mut self, tracker: SharedTracker) {
        self.tracker = Some(tracker);
    }

    fn set_verbose_debug(&mut self, enabled: bool) {
        self.verbose = enabled;
    }
}

// ============================================================================
// Dotenv File Feeder
// ============================================================================

/// Feeds a target from one `.env`-style file.
///
/// The file parses into a flat key/value table; leaves are matched by
/// their env tag (uppercased). Unlike the env feeders this reads the file
/// directly, so an OS variable with the same name does not interfere —
/// compose with an [`EnvFeeder`](super::EnvFeeder) afterwards when OS
/// precedence is wanted.
pub struct DotenvFileFeeder {
    path: PathBuf,
    tracker: Option<SharedTracker>,
    verbose: bool,
}

impl DotenvFileFeeder {
    /// Creates a feeder for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracker: None,
            verbose: false,
        }
    }
}

impl super::Feeder for DotenvFileFeeder {
    fn name(&self) -> &str {
        "dotenv"
    }

    fn feed(&mut self, target: &mut dyn ShapedTarget) -> Result<(), Error> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| Error::FileRead {
            path: self.path.display().to_string(),
            source,
        })?;
        let pairs: HashMap<String, String> =
            parse_dotenv(&content, &self.path)?.into_iter().collect();

        let spec = EnvWalkSpec {
            feeder: "dotenv",
            source_kind: SourceKind::Dotenv,
            tracker: self.tracker.as_ref(),
            verbose: self.verbose,
            instance_key: "",
        };
        feed_lookup(
            &spec,
            target,
            &|tag| vec![tag.to_ascii_uppercase()],
            &|key| pairs.get(key).cloned(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_detection_priority_list() {
        assert_eq!(
            FileFormat::from_path(Path::new("config.yaml")),
            Some(FileFormat::Yaml)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("config.yml")),
            Some(FileFormat::Yaml)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("config.json")),
            Some(FileFormat::Json)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("config.toml")),
            Some(FileFormat::Toml)
        );
        assert_eq!(FileFormat::from_path(Path::new("config.txt")), None);
    }

    #[test]
    fn test_parse_content_toml_normalizes_to_json() {
        let content = r#"
name = "test"
port = 8080

[database]
host = "localhost"
"#;
        let value = parse_content(content, FileFormat::Toml, Path::new("t.toml")).unwrap();
        assert_eq!(value["name"], "test");
        assert_eq!(value["port"], 8080);
        assert_eq!(value["database"]["host"], "localhost");
    }

    #[test]
    fn test_parse_content_yaml() {
        let content = "name: test\nport: 8080\n";
        let value = parse_content(content, FileFormat::Yaml, Path::new("t.yaml")).unwrap();
        assert_eq!(value["name"], "test");
        assert_eq!(value["port"], 8080);
    }

    #[test]
    fn test_parse_content_json_error_has_span() {
        let err = parse_content("{\"a\": }", FileFormat::Json, Path::new("t.json")).unwrap_err();
        assert!(matches!(err, Error::FileParse { format: "JSON", .. }));
    }

    #[test]
    fn test_yaml_location_scans_words() {
        assert_eq!(
            yaml_location("mapping values at line 5 column 10"),
            Some((5, 10))
        );
        assert_eq!(yaml_location("line 3, column 7: bad indent"), Some((3, 7)));
        assert_eq!(yaml_location("no position here"), None);
        assert_eq!(yaml_location("line only, line 4"), None);
    }

    #[test]
    fn test_document_offset_counts_full_lines() {
        let content = "first\nsecond\nthird\n";
        assert_eq!(document_offset(content, 1, 1), 0);
        assert_eq!(document_offset(content, 2, 1), 6);
        assert_eq!(document_offset(content, 3, 3), 15);
        // Out-of-range positions clamp to the document end.
        assert_eq!(document_offset(content, 99, 99), content.len());
    }

    #[test]
    fn test_highlight_runs_to_end_of_line() {
        let content = "key: oops\nnext: 1\n";
        let span = highlight_at(content, 5);
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 4);
    }
}
