//! Schema and trait implementation generation.
//!
//! For each deriving struct this module emits one `ConfigShape`
//! implementation with three parts:
//!
//! 1. `schema()` - a `static` field catalog built from the declared field
//!    types and `#[field(...)]` tags;
//! 2. `set_value()` - a path-resolving writer matching on field names,
//!    delegating into nested records and allocating `Option` records and
//!    map entries on the way down;
//! 3. `to_tree()` - a deep generic snapshot of the current contents.

use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Expr, Field, Fields, GenericArgument, PathArguments, Type};

use crate::parse::FieldAttrs;

/// Expands the derive input into the trait implementation.
pub fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            input.ident.span(),
            "ConfigShape can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            input.ident.span(),
            "ConfigShape requires named struct fields",
        ));
    };

    let mut specs = Vec::new();
    let mut set_arms = Vec::new();
    let mut tree_inserts = Vec::new();

    for field in &fields.named {
        if let Some(generator) = FieldGenerator::analyze(field)? {
            specs.push(generator.spec_tokens());
            set_arms.push(generator.set_arm_tokens());
            tree_inserts.push(generator.tree_tokens());
        }
    }

    let struct_name = &input.ident;
    let record_name = struct_name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::modcore::schema::ConfigShape for #struct_name #ty_generics #where_clause {
            fn schema() -> &'static ::modcore::schema::Schema {
                static FIELDS: &[::modcore::schema::FieldSpec] = &[
                    #(#specs),*
                ];
                static SCHEMA: ::modcore::schema::Schema = ::modcore::schema::Schema {
                    record: #record_name,
                    fields: FIELDS,
                };
                &SCHEMA
            }

            fn set_value(
                &mut self,
                path: &[&str],
                value: ::modcore::value::ConfigValue,
            ) -> ::core::result::Result<(), ::modcore::schema::SetError> {
                let ::core::option::Option::Some((head, rest)) = path.split_first() else {
                    return ::core::result::Result::Err(
                        ::modcore::schema::SetError::UnknownField {
                            path: ::std::string::String::new(),
                        },
                    );
                };
                match *head {
                    #(#set_arms)*
                    _ => ::core::result::Result::Err(
                        ::modcore::schema::SetError::UnknownField {
                            path: path.join("."),
                        },
                    ),
                }
            }

            fn to_tree(&self) -> ::modcore::value::ConfigValue {
                let mut map = ::std::collections::BTreeMap::new();
                #(#tree_inserts)*
                ::modcore::value::ConfigValue::Map(map)
            }
        }
    })
}

// ============================================================================
// Field Classification
// ============================================================================

/// Leaf kinds the schema layer understands.
enum Leaf {
    Str,
    Int(Type),
    Uint(Type),
    Float(Type),
    Bool,
    Duration,
    VecString,
    ArrString(Expr),
}

/// Shape category of one struct field.
enum Category {
    Leaf(Leaf),
    OptionalLeaf(Leaf),
    Record(Type),
    OptionalRecord(Type),
    RecordMap(Type),
    OptionalEntryMap(Type),
}

struct FieldGenerator {
    ident: syn::Ident,
    name: String,
    attrs: FieldAttrs,
    category: Category,
    type_name: String,
}

impl FieldGenerator {
    /// Analyzes one struct field; `None` when the field is skipped.
    fn analyze(field: &Field) -> syn::Result<Option<Self>> {
        let attrs = FieldAttrs::from_attrs(&field.attrs)?;
        if attrs.skip {
            return Ok(None);
        }

        let ident = field.ident.clone().expect("named field");
        let name = ident.to_string().trim_start_matches("r#").to_string();
        let category = classify(&field.ty)?;

        if matches!(
            category,
            Category::Record(_)
                | Category::OptionalRecord(_)
                | Category::RecordMap(_)
                | Category::OptionalEntryMap(_)
        ) {
            if attrs.env.is_some() {
                return Err(syn::Error::new(
                    field.ty.span(),
                    "env tags apply to leaf fields only",
                ));
            }
            if attrs.default.is_some() {
                return Err(syn::Error::new(
                    field.ty.span(),
                    "default literals apply to leaf fields only",
                ));
            }
        }

        let type_name = field.ty.to_token_stream().to_string().replace(' ', "");
        Ok(Some(Self {
            ident,
            name,
            attrs,
            category,
            type_name,
        }))
    }

    /// The `FieldSpec` literal for the static schema.
    fn spec_tokens(&self) -> TokenStream {
        let name = &self.name;
        let kind = self.kind_tokens();
        let optional = matches!(
            self.category,
            Category::OptionalLeaf(_) | Category::OptionalRecord(_)
        );
        let env = opt_str(&self.attrs.env);
        let yaml = opt_str(&file_tag(&self.attrs.yaml, &self.name));
        let json = opt_str(&file_tag(&self.attrs.json, &self.name));
        let toml = opt_str(&file_tag(&self.attrs.toml, &self.name));
        let default = opt_str(&self.attrs.default);
        let dynamic = self.attrs.dynamic;
        let type_name = &self.type_name;

        quote! {
            ::modcore::schema::FieldSpec {
                name: #name,
                kind: #kind,
                optional: #optional,
                env: #env,
                yaml: #yaml,
                json: #json,
                toml: #toml,
                default: #default,
                dynamic: #dynamic,
                type_name: #type_name,
            }
        }
    }

    fn kind_tokens(&self) -> TokenStream {
        fn leaf_kind(leaf: &Leaf) -> TokenStream {
            match leaf {
                Leaf::Str => quote!(::modcore::schema::FieldKind::String),
                Leaf::Int(_) => quote!(::modcore::schema::FieldKind::Int),
                Leaf::Uint(_) => quote!(::modcore::schema::FieldKind::Uint),
                Leaf::Float(_) => quote!(::modcore::schema::FieldKind::Float),
                Leaf::Bool => quote!(::modcore::schema::FieldKind::Bool),
                Leaf::Duration => quote!(::modcore::schema::FieldKind::Duration),
                Leaf::VecString => quote!(::modcore::schema::FieldKind::StringList {
                    capacity: ::core::option::Option::None
                }),
                Leaf::ArrString(len) => quote!(::modcore::schema::FieldKind::StringList {
                    capacity: ::core::option::Option::Some(#len)
                }),
            }
        }

        match &self.category {
            Category::Leaf(leaf) | Category::OptionalLeaf(leaf) => leaf_kind(leaf),
            Category::Record(ty) | Category::OptionalRecord(ty) => quote!(
                ::modcore::schema::FieldKind::Record(
                    <#ty as ::modcore::schema::ConfigShape>::schema
                )
            ),
            Category::RecordMap(ty) | Category::OptionalEntryMap(ty) => quote!(
                ::modcore::schema::FieldKind::RecordMap(
                    <#ty as ::modcore::schema::ConfigShape>::schema
                )
            ),
        }
    }

    /// One `match` arm of the generated `set_value`.
    fn set_arm_tokens(&self) -> TokenStream {
        let name = &self.name;
        let ident = &self.ident;

        match &self.category {
            Category::Leaf(Leaf::ArrString(len)) => quote! {
                #name => {
                    if !rest.is_empty() {
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::UnknownField { path: path.join(".") },
                        );
                    }
                    let items = ::modcore::schema::take_string_list(#name, value)?;
                    if items.len() > #len {
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::ArraySize {
                                path: #name.to_string(),
                                len: items.len(),
                                capacity: #len,
                            },
                        );
                    }
                    for (slot, item) in self.#ident.iter_mut().zip(items) {
                        *slot = item;
                    }
                    ::core::result::Result::Ok(())
                }
            },
            Category::Leaf(leaf) => {
                let take = leaf_take_expr(leaf, name);
                quote! {
                    #name => {
                        if !rest.is_empty() {
                            return ::core::result::Result::Err(
                                ::modcore::schema::SetError::UnknownField { path: path.join(".") },
                            );
                        }
                        self.#ident = #take;
                        ::core::result::Result::Ok(())
                    }
                }
            }
            Category::OptionalLeaf(leaf) => {
                let take = leaf_take_expr(leaf, name);
                quote! {
                    #name => {
                        if !rest.is_empty() {
                            return ::core::result::Result::Err(
                                ::modcore::schema::SetError::UnknownField { path: path.join(".") },
                            );
                        }
                        if value.is_none() {
                            self.#ident = ::core::option::Option::None;
                        } else {
                            self.#ident = ::core::option::Option::Some(#take);
                        }
                        ::core::result::Result::Ok(())
                    }
                }
            }
            Category::Record(_) => quote! {
                #name => {
                    if rest.is_empty() {
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::KindMismatch {
                                path: #name.to_string(),
                                expected: "record path",
                                got: value.type_name(),
                            },
                        );
                    }
                    ::modcore::schema::ConfigShape::set_value(&mut self.#ident, rest, value)
                }
            },
            Category::OptionalRecord(_) => quote! {
                #name => {
                    if rest.is_empty() {
                        if value.is_none() {
                            self.#ident = ::core::option::Option::None;
                            return ::core::result::Result::Ok(());
                        }
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::KindMismatch {
                                path: #name.to_string(),
                                expected: "record path",
                                got: value.type_name(),
                            },
                        );
                    }
                    let inner = self.#ident.get_or_insert_with(::core::default::Default::default);
                    ::modcore::schema::ConfigShape::set_value(inner, rest, value)
                }
            },
            Category::RecordMap(_) => quote! {
                #name => {
                    let ::core::option::Option::Some((entry_key, tail)) = rest.split_first() else {
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::KindMismatch {
                                path: #name.to_string(),
                                expected: "map entry path",
                                got: value.type_name(),
                            },
                        );
                    };
                    if tail.is_empty() {
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::KindMismatch {
                                path: path.join("."),
                                expected: "record",
                                got: value.type_name(),
                            },
                        );
                    }
                    let entry = self
                        .#ident
                        .entry((*entry_key).to_string())
                        .or_insert_with(::core::default::Default::default);
                    ::modcore::schema::ConfigShape::set_value(entry, tail, value)
                }
            },
            Category::OptionalEntryMap(_) => quote! {
                #name => {
                    let ::core::option::Option::Some((entry_key, tail)) = rest.split_first() else {
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::KindMismatch {
                                path: #name.to_string(),
                                expected: "map entry path",
                                got: value.type_name(),
                            },
                        );
                    };
                    if tail.is_empty() {
                        if value.is_none() {
                            self.#ident
                                .insert((*entry_key).to_string(), ::core::option::Option::None);
                            return ::core::result::Result::Ok(());
                        }
                        return ::core::result::Result::Err(
                            ::modcore::schema::SetError::KindMismatch {
                                path: path.join("."),
                                expected: "record",
                                got: value.type_name(),
                            },
                        );
                    }
                    let slot = self
                        .#ident
                        .entry((*entry_key).to_string())
                        .or_insert_with(|| {
                            ::core::option::Option::Some(::core::default::Default::default())
                        });
                    let inner = slot.get_or_insert_with(::core::default::Default::default);
                    ::modcore::schema::ConfigShape::set_value(inner, tail, value)
                }
            },
        }
    }

    /// One insert of the generated `to_tree`.
    fn tree_tokens(&self) -> TokenStream {
        let name = &self.name;
        let ident = &self.ident;

        match &self.category {
            Category::Leaf(leaf) => {
                let access = quote!(&self.#ident);
                let tree = leaf_tree_expr(leaf, &access);
                quote! {
                    map.insert(#name.to_string(), #tree);
                }
            }
            Category::OptionalLeaf(leaf) => {
                let access = quote!(inner);
                let tree = leaf_tree_expr(leaf, &access);
                quote! {
                    map.insert(
                        #name.to_string(),
                        match &self.#ident {
                            ::core::option::Option::Some(inner) => #tree,
                            ::core::option::Option::None => ::modcore::value::ConfigValue::None,
                        },
                    );
                }
            }
            Category::Record(_) => quote! {
                map.insert(
                    #name.to_string(),
                    ::modcore::schema::ConfigShape::to_tree(&self.#ident),
                );
            },
            Category::OptionalRecord(_) => quote! {
                map.insert(
                    #name.to_string(),
                    match &self.#ident {
                        ::core::option::Option::Some(inner) => {
                            ::modcore::schema::ConfigShape::to_tree(inner)
                        }
                        ::core::option::Option::None => ::modcore::value::ConfigValue::None,
                    },
                );
            },
            Category::RecordMap(_) => quote! {
                map.insert(
                    #name.to_string(),
                    ::modcore::value::ConfigValue::Map(
                        self.#ident
                            .iter()
                            .map(|(key, entry)| {
                                (key.clone(), ::modcore::schema::ConfigShape::to_tree(entry))
                            })
                            .collect(),
                    ),
                );
            },
            Category::OptionalEntryMap(_) => quote! {
                map.insert(
                    #name.to_string(),
                    ::modcore::value::ConfigValue::Map(
                        self.#ident
                            .iter()
                            .map(|(key, entry)| {
                                let tree = match entry {
                                    ::core::option::Option::Some(inner) => {
                                        ::modcore::schema::ConfigShape::to_tree(inner)
                                    }
                                    ::core::option::Option::None => {
                                        ::modcore::value::ConfigValue::None
                                    }
                                };
                                (key.clone(), tree)
                            })
                            .collect(),
                    ),
                );
            },
        }
    }
}

/// Expression converting `value` into the concrete leaf type.
fn leaf_take_expr(leaf: &Leaf, name: &str) -> TokenStream {
    match leaf {
        Leaf::Str => quote!(::modcore::schema::take_string(#name, value)?),
        Leaf::Int(ty) => quote!({
            let raw = ::modcore::schema::take_i64(#name, value)?;
            ::modcore::schema::narrow_i::<#ty>(#name, raw)?
        }),
        Leaf::Uint(ty) => quote!({
            let raw = ::modcore::schema::take_u64(#name, value)?;
            ::modcore::schema::narrow_u::<#ty>(#name, raw)?
        }),
        Leaf::Float(ty) => quote!((::modcore::schema::take_f64(#name, value)? as #ty)),
        Leaf::Bool => quote!(::modcore::schema::take_bool(#name, value)?),
        Leaf::Duration => quote!(::modcore::schema::take_duration(#name, value)?),
        Leaf::VecString => quote!(::modcore::schema::take_string_list(#name, value)?),
        Leaf::ArrString(_) => unreachable!("fixed arrays are special-cased"),
    }
}

/// Expression rendering a leaf reference as a `ConfigValue`.
fn leaf_tree_expr(leaf: &Leaf, access: &TokenStream) -> TokenStream {
    match leaf {
        Leaf::Str => quote!(::modcore::value::ConfigValue::String((#access).clone())),
        Leaf::Int(_) => quote!(::modcore::value::ConfigValue::Integer(*(#access) as i64)),
        Leaf::Uint(_) => {
            quote!(::modcore::value::ConfigValue::UnsignedInteger(*(#access) as u64))
        }
        Leaf::Float(_) => quote!(::modcore::value::ConfigValue::Float(*(#access) as f64)),
        Leaf::Bool => quote!(::modcore::value::ConfigValue::Boolean(*(#access))),
        Leaf::Duration => quote!(::modcore::value::ConfigValue::Duration(*(#access))),
        Leaf::VecString | Leaf::ArrString(_) => quote!(
            ::modcore::value::ConfigValue::List(
                (#access)
                    .iter()
                    .map(|item| ::modcore::value::ConfigValue::String(item.clone()))
                    .collect(),
            )
        ),
    }
}

fn classify(ty: &Type) -> syn::Result<Category> {
    match ty {
        Type::Path(type_path) if type_path.qself.is_none() => {
            let segment = type_path
                .path
                .segments
                .last()
                .ok_or_else(|| syn::Error::new(ty.span(), "empty type path"))?;

            match segment.ident.to_string().as_str() {
                "String" => Ok(Category::Leaf(Leaf::Str)),
                "i8" | "i16" | "i32" | "i64" | "isize" => {
                    Ok(Category::Leaf(Leaf::Int(ty.clone())))
                }
                "u8" | "u16" | "u32" | "u64" | "usize" => {
                    Ok(Category::Leaf(Leaf::Uint(ty.clone())))
                }
                "f32" | "f64" => Ok(Category::Leaf(Leaf::Float(ty.clone()))),
                "bool" => Ok(Category::Leaf(Leaf::Bool)),
                "Duration" => Ok(Category::Leaf(Leaf::Duration)),
                "Vec" => {
                    let inner = single_generic_arg(segment, ty)?;
                    if is_string(inner) {
                        Ok(Category::Leaf(Leaf::VecString))
                    } else {
                        Err(syn::Error::new(
                            ty.span(),
                            "only Vec<String> lists are supported",
                        ))
                    }
                }
                "Option" => {
                    let inner = single_generic_arg(segment, ty)?;
                    match classify(inner)? {
                        Category::Leaf(Leaf::ArrString(_)) => Err(syn::Error::new(
                            ty.span(),
                            "fixed-size arrays cannot be optional",
                        )),
                        Category::Leaf(leaf) => Ok(Category::OptionalLeaf(leaf)),
                        Category::Record(record) => Ok(Category::OptionalRecord(record)),
                        _ => Err(syn::Error::new(
                            ty.span(),
                            "Option is supported around leaves and records only",
                        )),
                    }
                }
                "HashMap" => {
                    let (key, val) = two_generic_args(segment, ty)?;
                    if !is_string(key) {
                        return Err(syn::Error::new(ty.span(), "map keys must be String"));
                    }
                    match classify(val)? {
                        Category::Record(record) => Ok(Category::RecordMap(record)),
                        Category::OptionalRecord(record) => {
                            Ok(Category::OptionalEntryMap(record))
                        }
                        _ => Err(syn::Error::new(
                            ty.span(),
                            "map values must be nested records (or Option of one)",
                        )),
                    }
                }
                _ => Ok(Category::Record(ty.clone())),
            }
        }
        Type::Array(array) => {
            if is_string(&array.elem) {
                Ok(Category::Leaf(Leaf::ArrString(array.len.clone())))
            } else {
                Err(syn::Error::new(
                    ty.span(),
                    "only [String; N] arrays are supported",
                ))
            }
        }
        other => Err(syn::Error::new(other.span(), "unsupported field type")),
    }
}

fn is_string(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Path(tp) if tp.qself.is_none()
            && tp.path.segments.last().is_some_and(|s| {
                s.ident == "String" && matches!(s.arguments, PathArguments::None)
            })
    )
}

fn single_generic_arg<'a>(
    segment: &'a syn::PathSegment,
    ty: &Type,
) -> syn::Result<&'a Type> {
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return Err(syn::Error::new(ty.span(), "expected one type parameter"));
    };
    let mut types = args.args.iter().filter_map(|arg| match arg {
        GenericArgument::Type(t) => Some(t),
        _ => None,
    });
    match (types.next(), types.next()) {
        (Some(first), None) => Ok(first),
        _ => Err(syn::Error::new(ty.span(), "expected one type parameter")),
    }
}

fn two_generic_args<'a>(
    segment: &'a syn::PathSegment,
    ty: &Type,
) -> syn::Result<(&'a Type, &'a Type)> {
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return Err(syn::Error::new(ty.span(), "expected two type parameters"));
    };
    let mut types = args.args.iter().filter_map(|arg| match arg {
        GenericArgument::Type(t) => Some(t),
        _ => None,
    });
    match (types.next(), types.next(), types.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        _ => Err(syn::Error::new(ty.span(), "expected two type parameters")),
    }
}

fn file_tag(attr: &Option<String>, field_name: &str) -> Option<String> {
    match attr.as_deref() {
        Some("-") => None,
        Some(tag) => {
            // Only the first comma-separated token names the key
            // (`field,omitempty` style tags).
            Some(tag.split(',').next().unwrap_or(tag).to_string())
        }
        None => Some(field_name.to_string()),
    }
}

fn opt_str(value: &Option<String>) -> TokenStream {
    match value {
        Some(s) => quote!(::core::option::Option::Some(#s)),
        None => quote!(::core::option::Option::None),
    }
}
