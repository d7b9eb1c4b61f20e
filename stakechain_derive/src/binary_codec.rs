//! `#[derive(BinaryCodec)]`: deterministic binary `Encode`/`Decode`.
//!
//! Fields are written in declaration order with no padding or tags. Enums
//! are prefixed with a `u8` discriminant that follows Rust's numbering rules
//! (explicit `= n` values are honoured, later variants count up from them).
//! The exact layout of each primitive lives in `crate::types::encoding`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DataEnum, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => {
            let (pattern, writes) = destructure(quote!(Self), &data.fields);
            let construct = construct(quote!(Self), &data.fields);
            (
                quote! {
                    let #pattern = self;
                    #(#writes)*
                },
                quote!(Ok(#construct)),
            )
        }
        Data::Enum(data) => enum_bodies(data)?,
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}

fn enum_bodies(data: &DataEnum) -> syn::Result<(TokenStream2, TokenStream2)> {
    let discriminants = discriminants(data)?;
    let mut encode_arms = Vec::with_capacity(data.variants.len());
    let mut decode_arms = Vec::with_capacity(data.variants.len());

    for (variant, tag) in data.variants.iter().zip(discriminants) {
        let ident = &variant.ident;
        let (pattern, writes) = destructure(quote!(Self::#ident), &variant.fields);
        let construct = construct(quote!(Self::#ident), &variant.fields);
        encode_arms.push(quote! {
            #pattern => {
                crate::types::encoding::Encode::encode(&#tag, out);
                #(#writes)*
            }
        });
        decode_arms.push(quote! {
            #tag => Ok(#construct),
        });
    }

    Ok((
        quote! {
            match self {
                #(#encode_arms)*
            }
        },
        quote! {
            let tag: u8 = crate::types::encoding::Decode::decode(input)?;
            match tag {
                #(#decode_arms)*
                _ => Err(crate::types::encoding::DecodeError::InvalidValue),
            }
        },
    ))
}

/// Returns a pattern binding every field by reference plus the encode calls.
fn destructure(path: TokenStream2, fields: &Fields) -> (TokenStream2, Vec<TokenStream2>) {
    let bindings: Vec<_> = match fields {
        Fields::Named(named) => named.named.iter().filter_map(|f| f.ident.clone()).collect(),
        Fields::Unnamed(unnamed) => (0..unnamed.unnamed.len())
            .map(|i| format_ident!("f{}", i))
            .collect(),
        Fields::Unit => Vec::new(),
    };
    let writes = bindings
        .iter()
        .map(|b| quote!(crate::types::encoding::Encode::encode(#b, out);))
        .collect();
    let pattern = match fields {
        Fields::Named(_) => quote!(#path { #(#bindings),* }),
        Fields::Unnamed(_) => quote!(#path(#(#bindings),*)),
        Fields::Unit => path,
    };
    (pattern, writes)
}

fn construct(path: TokenStream2, fields: &Fields) -> TokenStream2 {
    match fields {
        Fields::Named(named) => {
            let idents = named.named.iter().map(|f| &f.ident);
            quote!(#path { #(#idents: crate::types::encoding::Decode::decode(input)?,)* })
        }
        Fields::Unnamed(unnamed) => {
            let reads = unnamed
                .unnamed
                .iter()
                .map(|_| quote!(crate::types::encoding::Decode::decode(input)?));
            quote!(#path(#(#reads),*))
        }
        Fields::Unit => path,
    }
}

fn discriminants(data: &DataEnum) -> syn::Result<Vec<u8>> {
    let mut next: u16 = 0;
    let mut out = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        let value = match &variant.discriminant {
            Some((_, syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Int(lit),
                ..
            }))) => lit.base10_parse::<u8>()? as u16,
            Some((_, expr)) => {
                return Err(syn::Error::new_spanned(
                    expr,
                    "BinaryCodec discriminants must be integer literals",
                ));
            }
            None => next,
        };
        let tag = u8::try_from(value).map_err(|_| {
            syn::Error::new_spanned(variant, "BinaryCodec enums are limited to 256 variants")
        })?;
        out.push(tag);
        next = value + 1;
    }
    Ok(out)
}
