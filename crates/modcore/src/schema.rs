//! Static configuration schemas.
//!
//! Every configuration target carries a [`Schema`]: the declarative
//! description of its shape that feeders walk instead of runtime
//! reflection. Schemas are generated at compile time by
//! `#[derive(ConfigShape)]` from field types and `#[field(...)]` tags,
//! together with a typed writer ([`ConfigShape::set_value`]) and a generic
//! snapshot ([`ConfigShape::to_tree`]).
//!
//! Feeders work against [`ShapedTarget`], the object-safe view of any
//! `ConfigShape` type, so heterogeneous feeder lists can share one target.

use std::collections::HashSet;
use std::time::Duration;

use crate::value::{self, ConfigValue, ConvertError};

/// Function returning the schema of a nested record type.
///
/// Stored as a plain function pointer so that [`FieldKind`] stays `const`
/// constructible inside the generated `static` schemas.
pub type SchemaRef = fn() -> &'static Schema;

/// The declared kind of a schema field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// UTF-8 string leaf.
    String,
    /// Signed integer leaf (any width up to 64 bits).
    Int,
    /// Unsigned integer leaf (any width up to 64 bits).
    Uint,
    /// Floating-point leaf.
    Float,
    /// Boolean leaf.
    Bool,
    /// Duration leaf (`ns/us/µs/ms/s/m/h` grammar).
    Duration,
    /// String array leaf; `capacity` is set for fixed-size arrays.
    StringList {
        /// Maximum element count for `[String; N]` fields, `None` for `Vec`.
        capacity: Option<usize>,
    },
    /// Nested record.
    Record(SchemaRef),
    /// Map of string keys to nested records.
    RecordMap(SchemaRef),
}

impl FieldKind {
    /// True for kinds populated directly from a single external value.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, FieldKind::Record(_) | FieldKind::RecordMap(_))
    }

    /// Human name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "integer",
            FieldKind::Uint => "unsigned integer",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Duration => "duration",
            FieldKind::StringList { .. } => "string list",
            FieldKind::Record(_) => "record",
            FieldKind::RecordMap(_) => "record map",
        }
    }

    /// Converts a raw string (env var, `.env` entry, default literal) to a
    /// value of this kind.
    ///
    /// String lists split on commas with trimmed elements. Record kinds
    /// cannot be produced from a single string and fail.
    pub fn parse_str(&self, raw: &str) -> Result<ConfigValue, ConvertError> {
        match self {
            FieldKind::String => Ok(ConfigValue::String(raw.to_string())),
            FieldKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Integer)
                .map_err(|_| ConvertError {
                    value: raw.to_string(),
                    expected: "integer",
                }),
            FieldKind::Uint => raw
                .trim()
                .parse::<u64>()
                .map(ConfigValue::UnsignedInteger)
                .map_err(|_| ConvertError {
                    value: raw.to_string(),
                    expected: "unsigned integer",
                }),
            FieldKind::Float => raw
                .trim()
                .parse::<f64>()
                .map(ConfigValue::Float)
                .map_err(|_| ConvertError {
                    value: raw.to_string(),
                    expected: "float",
                }),
            FieldKind::Bool => value::parse_bool(raw).map(ConfigValue::Boolean),
            FieldKind::Duration => value::parse_duration(raw).map(ConfigValue::Duration),
            FieldKind::StringList { .. } => Ok(ConfigValue::List(
                raw.split(',')
                    .map(|item| ConfigValue::String(item.trim().to_string()))
                    .collect(),
            )),
            FieldKind::Record(_) | FieldKind::RecordMap(_) => Err(ConvertError {
                value: raw.to_string(),
                expected: "record",
            }),
        }
    }

    /// Converts a parsed file-tree value to a value of this kind.
    ///
    /// Conversion rules mirror [`parse_str`](Self::parse_str): native typed
    /// values are accepted directly, and string values fall back to the env
    /// grammar, so `timeout: "2h30m45s"` and `timeout: 9045` are both valid
    /// durations.
    pub fn parse_json(&self, raw: &serde_json::Value) -> Result<ConfigValue, ConvertError> {
        use serde_json::Value;

        let mismatch = |expected: &'static str| ConvertError {
            value: json_scalar_repr(raw),
            expected,
        };

        match self {
            FieldKind::String => match raw {
                Value::String(s) => Ok(ConfigValue::String(s.clone())),
                _ => Err(mismatch("string")),
            },
            FieldKind::Int => match raw {
                Value::Number(n) if n.as_i64().is_some() => {
                    Ok(ConfigValue::Integer(n.as_i64().unwrap()))
                }
                Value::String(s) => self.parse_str(s),
                _ => Err(mismatch("integer")),
            },
            FieldKind::Uint => match raw {
                Value::Number(n) if n.as_u64().is_some() => {
                    Ok(ConfigValue::UnsignedInteger(n.as_u64().unwrap()))
                }
                Value::String(s) => self.parse_str(s),
                _ => Err(mismatch("unsigned integer")),
            },
            FieldKind::Float => match raw {
                Value::Number(n) => Ok(ConfigValue::Float(n.as_f64().unwrap_or(0.0))),
                Value::String(s) => self.parse_str(s),
                _ => Err(mismatch("float")),
            },
            FieldKind::Bool => match raw {
                Value::Bool(b) => Ok(ConfigValue::Boolean(*b)),
                Value::String(s) => self.parse_str(s),
                _ => Err(mismatch("bool")),
            },
            FieldKind::Duration => match raw {
                // Bare numbers are whole seconds; strings use the grammar.
                Value::Number(n) => {
                    if let Some(secs) = n.as_u64() {
                        Ok(ConfigValue::Duration(Duration::from_secs(secs)))
                    } else if let Some(secs) = n.as_f64()
                        && secs >= 0.0
                    {
                        Duration::try_from_secs_f64(secs)
                            .map(ConfigValue::Duration)
                            .map_err(|_| mismatch("duration"))
                    } else {
                        Err(mismatch("duration"))
                    }
                }
                Value::String(s) => value::parse_duration(s).map(ConfigValue::Duration),
                _ => Err(mismatch("duration")),
            },
            FieldKind::StringList { .. } => match raw {
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => out.push(ConfigValue::String(s.clone())),
                            _ => return Err(mismatch("string list")),
                        }
                    }
                    Ok(ConfigValue::List(out))
                }
                Value::String(s) => self.parse_str(s),
                _ => Err(mismatch("string list")),
            },
            FieldKind::Record(_) | FieldKind::RecordMap(_) => Err(mismatch("record")),
        }
    }
}

fn json_scalar_repr(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Metadata for one field of a configuration record.
///
/// File keys default to the field name; an explicit `"-"` tag clears them
/// to `None`, which removes the field from that format. `env` is `None`
/// unless the field declares an env tag, in which case the env-family
/// feeders consider it.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Rust field name; one segment of the dotted path.
    pub name: &'static str,

    /// Declared kind.
    pub kind: FieldKind,

    /// True for `Option<...>` fields, allocated on first assignment.
    pub optional: bool,

    /// Canonical environment variable tag.
    pub env: Option<&'static str>,

    /// YAML document key.
    pub yaml: Option<&'static str>,

    /// JSON document key.
    pub json: Option<&'static str>,

    /// TOML document key.
    pub toml: Option<&'static str>,

    /// Default literal applied when no feeder populated the field.
    pub default: Option<&'static str>,

    /// True when the path may change across a runtime reload.
    pub dynamic: bool,

    /// Declared Rust type, for provenance records.
    pub type_name: &'static str,
}

/// The declarative shape of one configuration record.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    /// Record type name.
    pub record: &'static str,

    /// Fields in declaration order.
    pub fields: &'static [FieldSpec],
}

impl Schema {
    /// Validates the schema tree.
    ///
    /// Rejects duplicate env tags and duplicate per-format file keys within
    /// a record; nested records are validated recursively. Ensures the
    /// invariant that every leaf is reachable by a unique dotted path.
    pub fn validate(&'static self) -> Result<(), crate::Error> {
        self.validate_at("", 0)
    }

    fn validate_at(&'static self, prefix: &str, depth: usize) -> Result<(), crate::Error> {
        // Record maps allow self-referential shapes; bound the descent
        // instead of looping.
        const MAX_DEPTH: usize = 128;
        if depth > MAX_DEPTH {
            return Err(crate::Error::TreeTooDeep { depth: MAX_DEPTH });
        }

        let mut env_tags: HashSet<&str> = HashSet::new();
        let mut file_keys: [HashSet<&str>; 3] = [HashSet::new(), HashSet::new(), HashSet::new()];

        for field in self.fields {
            let path = join_prefixed(prefix, field.name);

            if let Some(tag) = field.env
                && !env_tags.insert(tag)
            {
                return Err(crate::Error::DuplicateTag {
                    record: self.record,
                    tag: format!("env:{tag}"),
                    path,
                });
            }
            for (slot, key) in [(0, field.yaml), (1, field.json), (2, field.toml)] {
                const FORMATS: [&str; 3] = ["yaml", "json", "toml"];
                if let Some(key) = key
                    && !file_keys[slot].insert(key)
                {
                    return Err(crate::Error::DuplicateTag {
                        record: self.record,
                        tag: format!("{}:{key}", FORMATS[slot]),
                        path,
                    });
                }
            }

            match field.kind {
                FieldKind::Record(nested) => nested().validate_at(&path, depth + 1)?,
                FieldKind::RecordMap(nested) => nested().validate_at(&path, depth + 1)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Collects the dotted paths declared `dynamic`.
    ///
    /// A `dynamic` tag on a record or record-map field marks the whole
    /// subtree; the reload manager treats set entries as path prefixes.
    pub fn dynamic_paths(&'static self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_dynamic("", &mut out);
        out
    }

    fn collect_dynamic(&'static self, prefix: &str, out: &mut Vec<String>) {
        for field in self.fields {
            let path = join_prefixed(prefix, field.name);
            if field.dynamic {
                out.push(path.clone());
            }
            if let FieldKind::Record(nested) = field.kind {
                nested().collect_dynamic(&path, out);
            }
        }
    }
}

/// Joins a dotted prefix with one more segment.
pub fn join_prefixed(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

// ============================================================================
// Typed Targets
// ============================================================================

/// A typed configuration target with a generated schema.
///
/// Implemented by `#[derive(ConfigShape)]`. `set_value` resolves a path
/// relative to this record and writes a converted value, allocating
/// `Option` records and map entries on the way down. `to_tree` captures a
/// deep generic snapshot for diffing.
pub trait ConfigShape: Default {
    /// The static schema of this record type.
    fn schema() -> &'static Schema;

    /// Writes `value` at `path` (segments relative to this record).
    fn set_value(&mut self, path: &[&str], value: ConfigValue) -> Result<(), SetError>;

    /// Captures the current contents as a generic tree.
    fn to_tree(&self) -> ConfigValue;
}

/// Object-safe view of a [`ConfigShape`] target.
///
/// Feeders are trait objects and cannot be generic over the target type,
/// so they operate on this erased surface instead.
pub trait ShapedTarget {
    /// The schema of the underlying record.
    fn schema(&self) -> &'static Schema;

    /// See [`ConfigShape::set_value`].
    fn set_value(&mut self, path: &[&str], value: ConfigValue) -> Result<(), SetError>;

    /// See [`ConfigShape::to_tree`].
    fn to_tree(&self) -> ConfigValue;
}

impl<T: ConfigShape> ShapedTarget for T {
    fn schema(&self) -> &'static Schema {
        T::schema()
    }

    fn set_value(&mut self, path: &[&str], value: ConfigValue) -> Result<(), SetError> {
        ConfigShape::set_value(self, path, value)
    }

    fn to_tree(&self) -> ConfigValue {
        ConfigShape::to_tree(self)
    }
}

/// A failed write into a typed target.
#[derive(Debug, thiserror::Error)]
pub enum SetError {
    /// The path does not name a field of the record.
    #[error("unknown field '{path}'")]
    UnknownField {
        /// Offending path, relative to the record the write entered.
        path: String,
    },

    /// The value variant does not match the declared kind.
    #[error("field '{path}' expects {expected}, got {got}")]
    KindMismatch {
        /// Offending path.
        path: String,
        /// Declared kind name.
        expected: &'static str,
        /// Supplied value variant.
        got: &'static str,
    },

    /// The value does not fit the concrete integer width.
    #[error("value {value} out of range for field '{path}'")]
    OutOfRange {
        /// Offending path.
        path: String,
        /// Rendered value.
        value: String,
    },

    /// More elements than a fixed-size array field can hold.
    #[error("array field '{path}' holds at most {capacity} items, got {len}")]
    ArraySize {
        /// Offending path.
        path: String,
        /// Supplied element count.
        len: usize,
        /// Declared capacity.
        capacity: usize,
    },
}

// ----------------------------------------------------------------------------
// Support functions for generated `set_value` bodies.
// ----------------------------------------------------------------------------

/// Unwraps a string value.
pub fn take_string(path: &str, v: ConfigValue) -> Result<String, SetError> {
    match v {
        ConfigValue::String(s) => Ok(s),
        other => Err(kind_mismatch(path, "string", &other)),
    }
}

/// Unwraps a signed integer, accepting unsigned values that fit.
pub fn take_i64(path: &str, v: ConfigValue) -> Result<i64, SetError> {
    match v {
        ConfigValue::Integer(i) => Ok(i),
        ConfigValue::UnsignedInteger(u) => i64::try_from(u).map_err(|_| SetError::OutOfRange {
            path: path.to_string(),
            value: u.to_string(),
        }),
        other => Err(kind_mismatch(path, "integer", &other)),
    }
}

/// Unwraps an unsigned integer, accepting non-negative signed values.
pub fn take_u64(path: &str, v: ConfigValue) -> Result<u64, SetError> {
    match v {
        ConfigValue::UnsignedInteger(u) => Ok(u),
        ConfigValue::Integer(i) => u64::try_from(i).map_err(|_| SetError::OutOfRange {
            path: path.to_string(),
            value: i.to_string(),
        }),
        other => Err(kind_mismatch(path, "unsigned integer", &other)),
    }
}

/// Unwraps a float, widening integers.
pub fn take_f64(path: &str, v: ConfigValue) -> Result<f64, SetError> {
    v.as_f64()
        .ok_or_else(|| kind_mismatch(path, "float", &v))
}

/// Unwraps a boolean.
pub fn take_bool(path: &str, v: ConfigValue) -> Result<bool, SetError> {
    match v {
        ConfigValue::Boolean(b) => Ok(b),
        other => Err(kind_mismatch(path, "bool", &other)),
    }
}

/// Unwraps a duration.
pub fn take_duration(path: &str, v: ConfigValue) -> Result<Duration, SetError> {
    match v {
        ConfigValue::Duration(d) => Ok(d),
        other => Err(kind_mismatch(path, "duration", &other)),
    }
}

/// Unwraps a string list.
pub fn take_string_list(path: &str, v: ConfigValue) -> Result<Vec<String>, SetError> {
    match v {
        ConfigValue::List(items) => items
            .into_iter()
            .map(|item| take_string(path, item))
            .collect(),
        other => Err(kind_mismatch(path, "string list", &other)),
    }
}

/// Narrows an `i64` into a concrete signed width.
pub fn narrow_i<T: TryFrom<i64>>(path: &str, raw: i64) -> Result<T, SetError> {
    T::try_from(raw).map_err(|_| SetError::OutOfRange {
        path: path.to_string(),
        value: raw.to_string(),
    })
}

/// Narrows a `u64` into a concrete unsigned width.
pub fn narrow_u<T: TryFrom<u64>>(path: &str, raw: u64) -> Result<T, SetError> {
    T::try_from(raw).map_err(|_| SetError::OutOfRange {
        path: path.to_string(),
        value: raw.to_string(),
    })
}

fn kind_mismatch(path: &str, expected: &'static str, got: &ConfigValue) -> SetError {
    SetError::KindMismatch {
        path: path.to_string(),
        expected,
        got: got.type_name(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
