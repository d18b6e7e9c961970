//! Derive macros for workflow state types.
//!
//! - [`GraphState`] — compile-time check that a type satisfies the bound every
//!   node in a compiled graph requires.
//! - [`MergeableState`] — generates a `merge()` implementation field by field,
//!   so that parallel branches converging on the same successor node combine
//!   their updates instead of one silently clobbering the other.
//!
//! # Example
//!
//! ```ignore
//! use insightql_derive::{GraphState, MergeableState};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize, GraphState, MergeableState)]
//! struct MyState {
//!     reasoning_steps: Vec<String>,
//!     retry_count: u32,
//!     #[merge(skip)]
//!     conversation_id: String,
//! }
//! ```
//!
//! # Merge strategies
//!
//! `#[merge(...)]` on a field overrides the type-based default:
//!
//! - `skip` — keep `self`'s value unchanged
//! - `replace` — take `other`'s value if it is non-empty
//! - `take_if_empty` — take `other`'s value only if `self`'s is empty
//! - `recursive` — call `.merge()` on a nested `MergeableState` field
//!
//! Without an attribute: `Vec`/`VecDeque`/`HashSet`/`BTreeSet`/`HashMap`/`BTreeMap`
//! extend, `Option` takes `other` when `self` is `None`, numeric fields take the
//! max, `String` concatenates with a newline separator, `bool` is OR'd, and any
//! other type keeps `self` unchanged.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStrategy {
    Default,
    Skip,
    Replace,
    TakeIfEmpty,
    Recursive,
}

fn parse_merge_attribute(attrs: &[Attribute]) -> MergeStrategy {
    for attr in attrs {
        if attr.path().is_ident("merge") {
            if let Ok(list) = attr.meta.require_list() {
                let tokens = list.tokens.to_string();
                if tokens.contains("skip") {
                    return MergeStrategy::Skip;
                } else if tokens.contains("replace") {
                    return MergeStrategy::Replace;
                } else if tokens.contains("take_if_empty") {
                    return MergeStrategy::TakeIfEmpty;
                } else if tokens.contains("recursive") {
                    return MergeStrategy::Recursive;
                }
            }
        }
    }
    MergeStrategy::Default
}

/// Asserts at compile time that the annotated type satisfies `GraphState`'s bound
/// (`Clone + Serialize + DeserializeOwned`); expands to nothing at runtime.
#[proc_macro_derive(GraphState)]
pub fn derive_graph_state(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let expanded = quote! {
        const _: () = {
            fn assert_graph_state<T>()
            where
                T: Clone + serde::Serialize + for<'de> serde::Deserialize<'de>,
            {
            }

            fn assert_impl() {
                assert_graph_state::<#name>();
            }
        };
    };

    TokenStream::from(expanded)
}

/// Generates a [`MergeableState`](../insightql_core/state/trait.MergeableState.html)
/// implementation, honoring per-field `#[merge(...)]` overrides.
#[proc_macro_derive(MergeableState, attributes(merge))]
pub fn derive_mergeable_state(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(
                    name,
                    "MergeableState can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(name, "MergeableState can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let merge_fields = fields.iter().map(|field| {
        #[allow(clippy::unwrap_used)]
        let field_name = field.ident.as_ref().unwrap();
        let field_type = &field.ty;
        let merge_attr = parse_merge_attribute(&field.attrs);
        let type_str = quote!(#field_type).to_string();

        match merge_attr {
            MergeStrategy::Skip => {
                return quote! {};
            }
            MergeStrategy::Replace => {
                let is_string = type_str == "String" || type_str == "std :: string :: String";
                let is_vec = type_str.starts_with("Vec <") || type_str.contains("::Vec<");
                let is_option = type_str.starts_with("Option <") || type_str.contains("::Option<");

                if is_string || is_vec {
                    return quote! {
                        if !other.#field_name.is_empty() {
                            self.#field_name = other.#field_name.clone();
                        }
                    };
                } else if is_option {
                    return quote! {
                        if other.#field_name.is_some() {
                            self.#field_name = other.#field_name.clone();
                        }
                    };
                }
                return quote! {
                    self.#field_name = other.#field_name.clone();
                };
            }
            MergeStrategy::TakeIfEmpty => {
                let is_string = type_str == "String" || type_str == "std :: string :: String";
                let is_vec = type_str.starts_with("Vec <") || type_str.contains("::Vec<");
                let is_option = type_str.starts_with("Option <") || type_str.contains("::Option<");

                if is_string || is_vec {
                    return quote! {
                        if self.#field_name.is_empty() && !other.#field_name.is_empty() {
                            self.#field_name = other.#field_name.clone();
                        }
                    };
                } else if is_option {
                    return quote! {
                        if self.#field_name.is_none() {
                            self.#field_name = other.#field_name.clone();
                        }
                    };
                }
                return quote! {};
            }
            MergeStrategy::Recursive => {
                return quote! {
                    self.#field_name.merge(&other.#field_name);
                };
            }
            MergeStrategy::Default => {}
        }

        let is_extendable = type_str.starts_with("Vec <")
            || type_str.contains("::Vec<")
            || type_str.starts_with("VecDeque <")
            || type_str.contains("::VecDeque<")
            || type_str.starts_with("HashSet <")
            || type_str.contains("::HashSet<")
            || type_str.starts_with("BTreeSet <")
            || type_str.contains("::BTreeSet<")
            || type_str.starts_with("HashMap <")
            || type_str.contains("::HashMap<")
            || type_str.starts_with("BTreeMap <")
            || type_str.contains("::BTreeMap<");

        if is_extendable {
            quote! {
                self.#field_name.extend(other.#field_name.clone());
            }
        } else if type_str.starts_with("Option <") || type_str.contains("::Option<") {
            quote! {
                if self.#field_name.is_none() {
                    self.#field_name = other.#field_name.clone();
                }
            }
        } else if type_str == "String" || type_str == "std :: string :: String" {
            quote! {
                if !other.#field_name.is_empty() {
                    if !self.#field_name.is_empty() {
                        self.#field_name.push('\n');
                    }
                    self.#field_name.push_str(&other.#field_name);
                }
            }
        } else if [
            "i32", "u32", "i64", "u64", "f32", "f64", "usize", "isize", "i8", "u8", "i16", "u16",
        ]
        .iter()
        .any(|&t| type_str == t)
        {
            quote! {
                self.#field_name = self.#field_name.max(other.#field_name);
            }
        } else if type_str == "bool" {
            quote! {
                self.#field_name = self.#field_name || other.#field_name;
            }
        } else {
            quote! {}
        }
    });

    let expanded = quote! {
        impl insightql_core::state::MergeableState for #name {
            fn merge(&mut self, other: &Self) {
                #( #merge_fields )*
            }
        }
    };

    TokenStream::from(expanded)
}
