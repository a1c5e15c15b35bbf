//! Attribute parsing for `#[field(...)]`.

use syn::spanned::Spanned;
use syn::{Attribute, Expr, ExprLit, Lit};

/// Parsed `#[field(...)]` metadata for one struct field.
#[derive(Default)]
pub struct FieldAttrs {
    /// `env = "NAME"` - canonical environment variable tag.
    pub env: Option<String>,

    /// `yaml = "key"` - YAML document key (`"-"` skips).
    pub yaml: Option<String>,

    /// `json = "key"` - JSON document key (`"-"` skips).
    pub json: Option<String>,

    /// `toml = "key"` - TOML document key (`"-"` skips).
    pub toml: Option<String>,

    /// `default = "literal"`.
    pub default: Option<String>,

    /// `dynamic` - path is reloadable.
    pub dynamic: bool,

    /// `skip` - invisible to the configuration machinery.
    pub skip: bool,
}

impl FieldAttrs {
    /// Extracts `#[field(...)]` metadata from a field's attributes.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = FieldAttrs::default();

        for attr in attrs {
            if !attr.path().is_ident("field") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("env") {
                    out.env = Some(string_value(&meta)?);
                } else if meta.path.is_ident("yaml") {
                    out.yaml = Some(string_value(&meta)?);
                } else if meta.path.is_ident("json") {
                    out.json = Some(string_value(&meta)?);
                } else if meta.path.is_ident("toml") {
                    out.toml = Some(string_value(&meta)?);
                } else if meta.path.is_ident("default") {
                    out.default = Some(string_value(&meta)?);
                } else if meta.path.is_ident("dynamic") {
                    out.dynamic = true;
                } else if meta.path.is_ident("skip") {
                    out.skip = true;
                } else {
                    return Err(meta.error(
                        "unknown field attribute; expected one of: \
                         env, yaml, json, toml, default, dynamic, skip",
                    ));
                }
                Ok(())
            })?;
        }

        Ok(out)
    }
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let value: Expr = meta.value()?.parse()?;
    match &value {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        other => Err(syn::Error::new(
            other.span(),
            "expected a string literal",
        )),
    }
}
