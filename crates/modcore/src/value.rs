//! Type-erased configuration values.
//!
//! [`ConfigValue`] is the generic tree every subsystem speaks: feeders
//! produce it, snapshots store it, and the diff engine walks it. It carries
//! enough variants to represent a full configuration record without
//! compile-time type information.
//!
//! # Supported Types
//!
//! | Variant | Rust Types |
//! |---------|------------|
//! | `String` | `String`, `&str` |
//! | `Integer` | `i8`, `i16`, `i32`, `i64`, `isize` |
//! | `UnsignedInteger` | `u8`, `u16`, `u32`, `u64`, `usize` |
//! | `Float` | `f32`, `f64` |
//! | `Boolean` | `bool` |
//! | `Duration` | `std::time::Duration` |
//! | `List` | `Vec<String>`, `[String; N]` |
//! | `Map` | records, maps of records |
//! | `None` | unset `Option` leaves, null map entries |

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// A type-erased configuration value.
///
/// Maps use [`BTreeMap`] so that snapshots, diffs, and rendered output are
/// deterministic regardless of insertion order.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    /// A string value.
    String(String),

    /// A signed integer value (stored as i64 for maximum range).
    Integer(i64),

    /// An unsigned integer value (stored as u64 for maximum range).
    UnsignedInteger(u64),

    /// A floating-point value (stored as f64 for maximum precision).
    Float(f64),

    /// A boolean value.
    Boolean(bool),

    /// A duration value, parsed from the `ns/us/µs/ms/s/m/h` grammar.
    Duration(Duration),

    /// A list of values (string arrays in configuration targets).
    List(Vec<ConfigValue>),

    /// A map of string keys to values (records and record maps).
    Map(BTreeMap<String, ConfigValue>),

    /// No value (unset optional leaves, JSON `null` map entries).
    None,
}

impl ConfigValue {
    /// Returns the variant name used in conversion diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::UnsignedInteger(_) => "unsigned integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Duration(_) => "duration",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
            ConfigValue::None => "none",
        }
    }

    /// Returns the string contents, if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the signed integer contents, widening unsigned values that fit.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            ConfigValue::UnsignedInteger(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Returns the unsigned integer contents, accepting non-negative signed values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConfigValue::UnsignedInteger(u) => Some(*u),
            ConfigValue::Integer(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Returns the float contents, widening integer values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::UnsignedInteger(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Returns the boolean contents, if this is a `Boolean` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the duration contents, if this is a `Duration` value.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ConfigValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the map contents, if this is a `Map` value.
    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// True for `None` (unset) values.
    pub fn is_none(&self) -> bool {
        matches!(self, ConfigValue::None)
    }

    /// Converts this value to a [`serde_json::Value`].
    ///
    /// Durations render as canonical duration strings (e.g. `"2h30m45s"`)
    /// so that exported snapshots round-trip through the same grammar.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::Integer(i) => Value::Number((*i).into()),
            ConfigValue::UnsignedInteger(u) => Value::Number((*u).into()),
            ConfigValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ConfigValue::Boolean(b) => Value::Bool(*b),
            ConfigValue::Duration(d) => Value::String(format_duration(*d)),
            ConfigValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ConfigValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ConfigValue::None => Value::Null,
        }
    }
}

impl Display for ConfigValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => write!(f, "{s}"),
            ConfigValue::Integer(i) => write!(f, "{i}"),
            ConfigValue::UnsignedInteger(u) => write!(f, "{u}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Boolean(b) => write!(f, "{b}"),
            ConfigValue::Duration(d) => write!(f, "{}", format_duration(*d)),
            ConfigValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ConfigValue::Map(_) => write!(f, "{}", self.to_json()),
            ConfigValue::None => write!(f, "<none>"),
        }
    }
}

// ============================================================================
// String Conversion
// ============================================================================

/// A failed string-to-value conversion, reported without field context.
///
/// Callers attach the dotted path and source kind when wrapping this into
/// the crate error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertError {
    /// The raw input that failed to convert.
    pub value: String,

    /// Human name of the expected type.
    pub expected: &'static str,
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot convert string '{}' to {}",
            self.value, self.expected
        )
    }
}

impl std::error::Error for ConvertError {}

impl ConvertError {
    fn new(value: &str, expected: &'static str) -> Self {
        Self {
            value: value.to_string(),
            expected,
        }
    }
}

/// Parses a boolean from the accepted spellings.
///
/// Accepts `true`/`false`, `1`/`0`, and `yes`/`no`, case-insensitive.
pub fn parse_bool(raw: &str) -> Result<bool, ConvertError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConvertError::new(raw, "bool")),
    }
}

/// Parses a duration from the composable `<N><unit>` grammar.
///
/// Units are `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`, and terms concatenate:
/// `2h30m45s` is 9045 seconds. Numbers may carry a decimal fraction
/// (`1.5h`). Signs are rejected; configuration durations are non-negative.
pub fn parse_duration(raw: &str) -> Result<Duration, ConvertError> {
    let src = raw.trim();
    if src.is_empty() {
        return Err(ConvertError::new(raw, "duration"));
    }

    let mut rest = src;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(ConvertError::new(raw, "duration"));
        }
        let number: f64 = rest[..digits]
            .parse()
            .map_err(|_| ConvertError::new(raw, "duration"))?;
        rest = &rest[digits..];

        // Two-character units before their one-character prefixes.
        let (secs_per_unit, unit_len) = if rest.starts_with("ns") {
            (1e-9, 2)
        } else if rest.starts_with("us") {
            (1e-6, 2)
        } else if rest.starts_with("µs") {
            (1e-6, "µs".len())
        } else if rest.starts_with("ms") {
            (1e-3, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return Err(ConvertError::new(raw, "duration"));
        };
        rest = &rest[unit_len..];

        total += Duration::try_from_secs_f64(number * secs_per_unit)
            .map_err(|_| ConvertError::new(raw, "duration"))?;
    }

    Ok(total)
}

/// Renders a duration in the same grammar [`parse_duration`] accepts.
///
/// Non-zero components print largest-first (`2h30m45s`, `1s500ms`); the
/// zero duration prints as `0s`.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let secs = d.as_secs();
    let nanos = d.subsec_nanos();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let (millis, micros, ns) = (nanos / 1_000_000, (nanos / 1_000) % 1_000, nanos % 1_000);

    let mut out = String::new();
    for (amount, unit) in [
        (hours, "h"),
        (minutes, "m"),
        (seconds, "s"),
        (u64::from(millis), "ms"),
        (u64::from(micros), "us"),
        (u64::from(ns), "ns"),
    ] {
        if amount > 0 {
            out.push_str(&amount.to_string());
            out.push_str(unit);
        }
    }
    out
}

// ============================================================================
// Unit Tests
// ============================================================================
