//! # modcore_macro
//!
//! This crate provides the `#[derive(ConfigShape)]` procedural macro.
//! It is a proc-macro crate, meaning it can only export procedural macros.
//!
//! ## Module Structure
//!
//! - `parse` - Attribute parsing for `#[field(...)]`
//! - `expand` - Schema and trait implementation generation

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod expand;
mod parse;

/// Derive macro generating the `ConfigShape` implementation for a
/// configuration record.
///
/// The macro produces the static schema (field catalog with per-source
/// tags), the typed path writer `set_value`, and the generic snapshot
/// `to_tree`. The deriving type must also implement `Default`.
///
/// # Field Attributes
///
/// - `#[field(env = "NAME")]` - canonical environment variable tag
/// - `#[field(yaml = "key")]` / `json` / `toml` - per-format file keys
///   (default: the field name; `"-"` removes the field from that format)
/// - `#[field(default = "value")]` - default literal applied when no
///   feeder populated the field
/// - `#[field(dynamic)]` - the path may change across a runtime reload
/// - `#[field(skip)]` - invisible to the configuration machinery
///
/// # Supported Field Types
///
/// `String`, signed/unsigned integers, `f32`/`f64`, `bool`,
/// `std::time::Duration`, `Vec<String>`, `[String; N]`, `Option` of any
/// leaf, nested `ConfigShape` records, `Option<Record>`, and
/// `HashMap<String, Record>` / `HashMap<String, Option<Record>>`.
///
/// # Example
///
/// ```ignore
/// #[derive(Default, ConfigShape)]
/// struct ServerConfig {
///     #[field(env = "HTTP_HOST", default = "127.0.0.1")]
///     host: String,
///
///     #[field(env = "HTTP_PORT", default = "8080", dynamic)]
///     port: u16,
///
///     #[field(yaml = "db")]
///     database: DatabaseConfig,
/// }
/// ```
#[proc_macro_derive(ConfigShape, attributes(field))]
pub fn derive_config_shape(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand::expand(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
