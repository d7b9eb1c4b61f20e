//! `#[derive(Error)]` for enums and structs.
//!
//! ```ignore
//! #[derive(Debug, Error)]
//! pub enum StoreError {
//!     #[error("snapshot i/o failed: {0}")]
//!     Io(#[from] std::io::Error),
//!     #[error("height {height} is behind {tip}")]
//!     Behind { height: u64, tip: u64 },
//!     #[error("store is closed")]
//!     Closed,
//! }
//! ```
//!
//! Positional placeholders (`{0}`) are rewritten to named bindings so a single
//! `write!` call covers every field shape. A field marked `#[from]` must be the
//! only field of its variant; it becomes the error `source()` and gets a
//! `From` impl.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Type, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// A variant (or the struct itself) flattened into what codegen needs.
struct Case {
    path: TokenStream2,
    pattern: TokenStream2,
    message: String,
    bindings: Vec<syn::Ident>,
    named: bool,
    from: Option<(syn::Ident, Type)>,
}

impl Case {
    /// Bindings the message actually interpolates; unused named arguments
    /// are rejected by `format_args!`.
    fn referenced(&self) -> Vec<&syn::Ident> {
        self.bindings
            .iter()
            .filter(|ident| {
                let plain = format!("{{{}}}", ident);
                let with_spec = format!("{{{}:", ident);
                self.message.contains(&plain) || self.message.contains(&with_spec)
            })
            .collect()
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let cases = match &input.data {
        Data::Enum(data) => data
            .variants
            .iter()
            .map(|variant| {
                let message = message_attr(&variant.attrs, &variant.ident)?;
                let ident = &variant.ident;
                build_case(quote!(Self::#ident), &variant.fields, message)
            })
            .collect::<syn::Result<Vec<_>>>()?,
        Data::Struct(data) => {
            let message = message_attr(&input.attrs, &input.ident)?;
            vec![build_case(quote!(Self), &data.fields, message)?]
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    let display_arms = cases.iter().map(|case| {
        let pattern = &case.pattern;
        let message = &case.message;
        let bindings = case.referenced();
        quote! {
            #pattern => write!(f, #message #(, #bindings = #bindings)*),
        }
    });

    let source_arms = cases.iter().filter_map(|case| {
        let (binding, _) = case.from.as_ref()?;
        let pattern = &case.pattern;
        Some(quote! {
            #pattern => Some(#binding as &(dyn ::std::error::Error + 'static)),
        })
    });

    let from_impls = cases.iter().filter_map(|case| {
        let (_, ty) = case.from.as_ref()?;
        let constructor = from_constructor(case);
        Some(quote! {
            impl #impl_generics ::std::convert::From<#ty> for #name #ty_generics #where_clause {
                fn from(source: #ty) -> Self {
                    #constructor
                }
            }
        })
    });

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {
            #[allow(unreachable_patterns, unused_variables)]
            fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
                match self {
                    #(#source_arms)*
                    _ => None,
                }
            }
        }

        #(#from_impls)*
    })
}

fn build_case(path: TokenStream2, fields: &Fields, message: String) -> syn::Result<Case> {
    let from_fields: Vec<_> = fields
        .iter()
        .enumerate()
        .filter(|(_, field)| field.attrs.iter().any(|a| a.path().is_ident("from")))
        .collect();
    if !from_fields.is_empty() && fields.len() != 1 {
        return Err(syn::Error::new_spanned(
            fields,
            "#[from] is only supported on single-field variants",
        ));
    }

    let case = match fields {
        Fields::Unit => Case {
            pattern: path.clone(),
            path,
            message,
            bindings: Vec::new(),
            named: false,
            from: None,
        },
        Fields::Unnamed(unnamed) => {
            let bindings: Vec<_> = (0..unnamed.unnamed.len())
                .map(|i| format_ident!("f{}", i))
                .collect();
            let message = positional_to_named(&message, bindings.len());
            let from = from_fields
                .first()
                .map(|(i, field)| (bindings[*i].clone(), field.ty.clone()));
            Case {
                pattern: quote!(#path(#(#bindings),*)),
                path,
                message,
                bindings,
                named: false,
                from,
            }
        }
        Fields::Named(named) => {
            let bindings: Vec<_> = named
                .named
                .iter()
                .filter_map(|field| field.ident.clone())
                .collect();
            let from = from_fields.first().and_then(|(_, field)| {
                field.ident.clone().map(|ident| (ident, field.ty.clone()))
            });
            Case {
                pattern: quote!(#path { #(#bindings),* }),
                path,
                message,
                bindings,
                named: true,
                from,
            }
        }
    };
    Ok(case)
}

/// Builds `Self::Variant(source)` or `Self::Variant { field: source }`.
fn from_constructor(case: &Case) -> TokenStream2 {
    let path = &case.path;
    match (&case.from, case.named) {
        (Some((binding, _)), true) => quote!(#path { #binding: source }),
        _ => quote!(#path(source)),
    }
}

fn message_attr<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<String> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(target, "missing #[error(\"...\")] display message")
        })?;
    let message: LitStr = attr.parse_args().map_err(|_| {
        syn::Error::new_spanned(attr, "expected a string literal, e.g. #[error(\"bad input: {0}\")]")
    })?;
    Ok(message.value())
}

fn positional_to_named(message: &str, field_count: usize) -> String {
    (0..field_count).rev().fold(message.to_string(), |acc, i| {
        acc.replace(&format!("{{{}}}", i), &format!("{{f{}}}", i))
            .replace(&format!("{{{}:", i), &format!("{{f{}:", i))
    })
}
