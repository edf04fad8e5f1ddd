use std::collections::HashSet;

use proc_macro::TokenStream;
use proc_macro2::{Literal, TokenStream as TokenStream2};
use quote::{format_ident, quote, ToTokens};
use syn::{
    parse_macro_input, parse_quote, Attribute, Data, DataEnum, DeriveInput, Error, Expr, Field,
    Fields, Generics, Ident, Lit, Meta, NestedMeta, Result, Type,
};

struct TlvArgs {
    start: Option<u32>,
    list: bool,
    strict: bool,
}

#[derive(Default)]
struct FieldArgs {
    tag: Option<u32>,
    class: Option<String>,
    vendor: Option<u32>,
    profile: Option<u32>,
    optional: bool,
    default: Option<Expr>,
    skip: bool,
}

struct FieldSpec {
    member: TokenStream2,
    binding: Ident,
    ty: Type,
    tag: TokenStream2,
    optional: bool,
    default: Option<Expr>,
    // Runtime-only state: never written, decoded as its default
    skip: bool,
}

fn meta_items(attrs: &[Attribute], name: &str) -> Result<Vec<NestedMeta>> {
    let mut items = Vec::new();
    for attr in attrs.iter().filter(|a| a.path.is_ident(name)) {
        match attr.parse_meta()? {
            Meta::List(list) => items.extend(list.nested.into_iter()),
            other => {
                return Err(Error::new_spanned(
                    other,
                    format!("expected #[{}(...)]", name),
                ))
            }
        }
    }
    Ok(items)
}

fn lit_u32(lit: &Lit) -> Result<u32> {
    match lit {
        Lit::Int(i) => i.base10_parse::<u32>(),
        other => Err(Error::new_spanned(other, "expected an integer")),
    }
}

fn lit_u64(lit: &Lit) -> Result<u64> {
    match lit {
        Lit::Int(i) => i.base10_parse::<u64>(),
        other => Err(Error::new_spanned(other, "expected an integer")),
    }
}

fn lit_str(lit: &Lit) -> Result<String> {
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(Error::new_spanned(other, "expected a string")),
    }
}

fn parse_tlvargs(ast: &DeriveInput) -> Result<TlvArgs> {
    let mut tlvargs = TlvArgs {
        start: None,
        list: false,
        strict: false,
    };

    for item in meta_items(&ast.attrs, "tlvargs")? {
        match item {
            NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("start") => {
                tlvargs.start = Some(lit_u32(&nv.lit)?);
            }
            NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("datatype") => {
                tlvargs.list = match lit_str(&nv.lit)?.as_str() {
                    "struct" => false,
                    "list" => true,
                    _ => {
                        return Err(Error::new_spanned(
                            nv.lit,
                            "datatype must be \"struct\" or \"list\"",
                        ))
                    }
                };
            }
            NestedMeta::Meta(Meta::Path(p)) if p.is_ident("strict") => tlvargs.strict = true,
            other => return Err(Error::new_spanned(other, "unknown tlvargs option")),
        }
    }
    Ok(tlvargs)
}

fn parse_field_args(field: &Field) -> Result<FieldArgs> {
    let mut args = FieldArgs::default();

    for item in meta_items(&field.attrs, "tlv")? {
        match item {
            NestedMeta::Meta(Meta::NameValue(nv)) => {
                if nv.path.is_ident("tag") {
                    args.tag = Some(lit_u32(&nv.lit)?);
                } else if nv.path.is_ident("class") {
                    args.class = Some(lit_str(&nv.lit)?);
                } else if nv.path.is_ident("vendor") {
                    args.vendor = Some(lit_u32(&nv.lit)?);
                } else if nv.path.is_ident("profile") {
                    args.profile = Some(lit_u32(&nv.lit)?);
                } else if nv.path.is_ident("default") {
                    args.default = Some(syn::parse_str::<Expr>(&lit_str(&nv.lit)?)?);
                } else {
                    return Err(Error::new_spanned(nv.path, "unknown tlv field option"));
                }
            }
            NestedMeta::Meta(Meta::Path(p)) if p.is_ident("optional") => args.optional = true,
            NestedMeta::Meta(Meta::Path(p)) if p.is_ident("skip") => args.skip = true,
            other => return Err(Error::new_spanned(other, "unknown tlv field option")),
        }
    }
    if args.skip
        && (args.tag.is_some()
            || args.class.is_some()
            || args.vendor.is_some()
            || args.profile.is_some()
            || args.optional)
    {
        return Err(Error::new_spanned(field, "skip only combines with default"));
    }
    Ok(args)
}

fn parse_discriminant(attrs: &[Attribute], index: usize) -> Result<u64> {
    for item in meta_items(attrs, "tlv")? {
        match item {
            NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("discriminant") => {
                return lit_u64(&nv.lit);
            }
            other => return Err(Error::new_spanned(other, "unknown tlv variant option")),
        }
    }
    Ok(index as u64)
}

// Builds the Tag expression for a field and a key identifying the tag,
// used to reject two fields that share a tag
fn tag_tokens(
    args: &FieldArgs,
    number: u32,
    field: &Field,
) -> Result<(TokenStream2, (u8, u32, u32, u32))> {
    let n = Literal::u32_unsuffixed(number);
    let class = args.class.as_deref().unwrap_or("context");
    if class != "full" && (args.vendor.is_some() || args.profile.is_some()) {
        return Err(Error::new_spanned(
            field,
            "vendor and profile are only valid with class = \"full\"",
        ));
    }
    let tokens = match class {
        "context" => {
            if number > u8::MAX as u32 {
                return Err(Error::new_spanned(field, "context tags must be below 256"));
            }
            let n = Literal::u8_unsuffixed(number as u8);
            (quote!(::matter_tlv::tlv_common::Tag::context(#n)), (1, 0, 0, number))
        }
        "common" => (quote!(::matter_tlv::tlv_common::Tag::common(#n)), (2, 0, 0, number)),
        "implicit" => (quote!(::matter_tlv::tlv_common::Tag::implicit(#n)), (3, 0, 0, number)),
        "full" => {
            let (vendor, profile) = match (args.vendor, args.profile) {
                (Some(v), Some(p)) if v <= u16::MAX as u32 && p <= u16::MAX as u32 => (v, p),
                _ => {
                    return Err(Error::new_spanned(
                        field,
                        "class = \"full\" needs 16-bit vendor and profile",
                    ))
                }
            };
            let v = Literal::u16_unsuffixed(vendor as u16);
            let p = Literal::u16_unsuffixed(profile as u16);
            (
                quote!(::matter_tlv::tlv_common::Tag::fully_qualified(#v, #p, #n)),
                (4, vendor, profile, number),
            )
        }
        _ => {
            return Err(Error::new_spanned(
                field,
                "class must be \"context\", \"common\", \"implicit\" or \"full\"",
            ))
        }
    };
    Ok(tokens)
}

fn field_specs(fields: &Fields, start: u32, reserved: Option<u32>) -> Result<Vec<FieldSpec>> {
    let list: Vec<&Field> = match fields {
        Fields::Named(named) => named.named.iter().collect(),
        Fields::Unnamed(unnamed) => unnamed.unnamed.iter().collect(),
        Fields::Unit => Vec::new(),
    };

    let mut seen = HashSet::new();
    if let Some(r) = reserved {
        seen.insert((1, 0, 0, r));
    }

    let mut specs = Vec::new();
    // Skipped fields do not take a number from the automatic sequence
    let mut auto = start;
    for (i, field) in list.into_iter().enumerate() {
        let args = parse_field_args(field)?;
        let tag = if args.skip {
            TokenStream2::new()
        } else {
            let number = args.tag.unwrap_or(auto);
            auto += 1;
            let (tag, key) = tag_tokens(&args, number, field)?;
            if !seen.insert(key) {
                return Err(Error::new_spanned(field, "tag is already in use"));
            }
            tag
        };
        let member = match &field.ident {
            Some(ident) => ident.to_token_stream(),
            None => syn::Index::from(i).to_token_stream(),
        };
        specs.push(FieldSpec {
            member,
            binding: format_ident!("__f{}", i),
            ty: field.ty.clone(),
            tag,
            optional: args.optional,
            default: args.default,
            skip: args.skip,
        });
    }
    Ok(specs)
}

// `path { a: __f0, .. }`, `path(__f0, ..)` or `path`, usable both as a
// pattern and as a constructor
fn bind_fields(path: TokenStream2, fields: &Fields, specs: &[FieldSpec]) -> TokenStream2 {
    let members = specs.iter().map(|s| &s.member);
    let bindings = specs.iter().map(|s| &s.binding);
    match fields {
        Fields::Named(_) => quote!(#path { #(#members: #bindings),* }),
        Fields::Unnamed(_) => quote!(#path ( #(#bindings),* )),
        Fields::Unit => path,
    }
}

fn decode_fields(specs: &[FieldSpec]) -> TokenStream2 {
    let lets = specs.iter().map(|s| {
        let binding = &s.binding;
        let ty = &s.ty;
        let tag = &s.tag;
        let lookup = if s.skip {
            match &s.default {
                Some(default) => quote!(#default),
                None => quote!(::core::default::Default::default()),
            }
        } else if let Some(default) = &s.default {
            quote!(__fields.or_else(#tag, || #default)?)
        } else if s.optional {
            quote!(__fields.optional(#tag)?)
        } else {
            quote!(__fields.required(#tag)?)
        };
        quote!(let #binding: #ty = #lookup;)
    });
    quote!(#(#lets)*)
}

fn container_tokens(tlvargs: &TlvArgs) -> TokenStream2 {
    if tlvargs.list {
        quote!(::matter_tlv::tlv_common::ContainerType::List)
    } else {
        quote!(::matter_tlv::tlv_common::ContainerType::Structure)
    }
}

fn add_bounds(mut generics: Generics, bound: TokenStream2) -> Generics {
    for param in generics.type_params_mut() {
        param.bounds.push(parse_quote!(#bound));
    }
    generics
}

fn enum_variants<'a>(
    data: &'a DataEnum,
    tlvargs: &TlvArgs,
) -> Result<Vec<(u64, &'a syn::Variant, Vec<FieldSpec>)>> {
    if data.variants.is_empty() {
        return Err(Error::new_spanned(
            &data.variants,
            "a tagged union needs at least one variant",
        ));
    }
    let start = tlvargs.start.unwrap_or(1);
    // In the structure form context tag 0 carries the discriminant
    let reserved = if tlvargs.list { None } else { Some(0) };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (i, variant) in data.variants.iter().enumerate() {
        let disc = parse_discriminant(&variant.attrs, i)?;
        if !seen.insert(disc) {
            return Err(Error::new_spanned(variant, "discriminant is already in use"));
        }
        out.push((disc, variant, field_specs(&variant.fields, start, reserved)?));
    }
    Ok(out)
}

fn expand_totlv(ast: DeriveInput) -> Result<TokenStream2> {
    let name = &ast.ident;
    let tlvargs = parse_tlvargs(&ast)?;
    let container = container_tokens(&tlvargs);
    let generics = add_bounds(ast.generics.clone(), quote!(::matter_tlv::tlv::ToTLV));
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let body = match &ast.data {
        Data::Struct(data) => {
            let specs = field_specs(&data.fields, tlvargs.start.unwrap_or(0), None)?;
            let puts = specs.iter().filter(|s| !s.skip).map(|s| {
                let member = &s.member;
                let tag = &s.tag;
                let optional = s.optional;
                quote! {
                    ::matter_tlv::tlv::put_field(tw, #tag, &self.#member, #optional)?;
                }
            });
            quote! {
                tw.start_container(tag, #container)?;
                #(#puts)*
                tw.end_container()
            }
        }
        Data::Enum(data) => {
            let disc_tag = if tlvargs.list {
                quote!(::matter_tlv::tlv_common::Tag::anonymous())
            } else {
                quote!(::matter_tlv::tlv_common::Tag::context(0))
            };
            let mut arms = Vec::new();
            for (disc, variant, specs) in enum_variants(data, &tlvargs)? {
                let ident = &variant.ident;
                let pattern = bind_fields(quote!(Self::#ident), &variant.fields, &specs);
                let disc = Literal::u64_unsuffixed(disc);
                let puts = specs.iter().filter(|s| !s.skip).map(|s| {
                    let binding = &s.binding;
                    let tag = &s.tag;
                    let optional = s.optional;
                    quote! {
                        ::matter_tlv::tlv::put_field(tw, #tag, #binding, #optional)?;
                    }
                });
                arms.push(quote! {
                    #pattern => {
                        tw.start_container(tag, #container)?;
                        tw.put_unsigned(#disc_tag, #disc)?;
                        #(#puts)*
                        tw.end_container()
                    }
                });
            }
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                &ast.ident,
                "Derive ToTLV - Only supported for structs and enums",
            ))
        }
    };

    Ok(quote! {
        impl #impl_generics ::matter_tlv::tlv::ToTLV for #name #ty_generics #where_clause {
            fn to_tlv(
                &self,
                tw: &mut ::matter_tlv::tlv::TLVWriter,
                tag: ::matter_tlv::tlv_common::Tag,
            ) -> ::core::result::Result<(), ::matter_tlv::error::Error> {
                #body
            }
        }
    })
}

fn expand_fromtlv(ast: DeriveInput) -> Result<TokenStream2> {
    let name = &ast.ident;
    let tlvargs = parse_tlvargs(&ast)?;
    let container = container_tokens(&tlvargs);
    let strict = tlvargs.strict;
    let generics = add_bounds(ast.generics.clone(), quote!(::matter_tlv::tlv::FromTLV));
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let body = match &ast.data {
        Data::Struct(data) => {
            let specs = field_specs(&data.fields, tlvargs.start.unwrap_or(0), None)?;
            let tags = specs.iter().filter(|s| !s.skip).map(|s| &s.tag);
            let lets = decode_fields(&specs);
            let construct = bind_fields(quote!(Self), &data.fields, &specs);
            quote! {
                __fields.ignore_unknown(&[#(#tags),*]);
                #lets
                Ok(#construct)
            }
        }
        Data::Enum(data) => {
            let mut arms = Vec::new();
            for (disc, variant, specs) in enum_variants(data, &tlvargs)? {
                let ident = &variant.ident;
                let tags = specs.iter().filter(|s| !s.skip).map(|s| &s.tag);
                let lets = decode_fields(&specs);
                let construct = bind_fields(quote!(Self::#ident), &variant.fields, &specs);
                let disc = Literal::u64_unsuffixed(disc);
                arms.push(quote! {
                    #disc => {
                        __fields.ignore_unknown(&[
                            ::matter_tlv::tlv_common::Tag::context(0),
                            #(#tags),*
                        ]);
                        #lets
                        Ok(#construct)
                    }
                });
            }
            quote! {
                match __fields.discriminant()? {
                    #(#arms)*
                    _ => Err(::matter_tlv::error::Error::MalformedTlv {
                        reason: "unknown union discriminant",
                    }),
                }
            }
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                &ast.ident,
                "Derive FromTLV - Only supported for structs and enums",
            ))
        }
    };

    Ok(quote! {
        impl #impl_generics ::matter_tlv::tlv::FromTLV for #name #ty_generics #where_clause {
            fn from_tlv(
                element: &::matter_tlv::tlv::Element,
            ) -> ::core::result::Result<Self, ::matter_tlv::error::Error> {
                let __fields = ::matter_tlv::tlv::StructReader::new(element, #container, #strict)?;
                #body
            }
        }
    })
}

/// Derive ToTLV Macro
///
/// For a structure, this creates an implementation of the ToTLV trait that
/// writes all the members, in declaration order, into a TLV structure. By
/// default member N gets the Context tag `start + N`.
///
/// For an enum, this creates a tagged union: a structure whose Context tag 0
/// carries the variant's discriminant, followed by the variant's fields
/// (numbered from 1 by default).
///
/// Container attributes: #[tlvargs(start = 1, datatype = "list", strict)]
///
/// start: The tag from which the automatic numbering starts (Default: 0 for
///        structs, 1 for enum variants)
/// datatype: "struct" or "list" (Default: struct). For enums, "list" puts
///        the discriminant first as an anonymous element of a list.
/// strict: Duplicate tags on decode fail with DuplicateField instead of
///        using the first occurrence.
///
/// Field attributes: #[tlv(tag = 3, class = "full", vendor = 0xfff1,
///        profile = 1, optional, default = "expr", skip)]
///
/// tag: The tag number for this field.
/// class: "context" (Default), "common", "implicit" or "full". "full" also
///        needs vendor and profile.
/// optional: An absent value (None) is not written; a missing tag decodes
///        to None.
/// default: A missing tag decodes to the given expression.
/// skip: The field is not part of the TLV encoding. It is never written,
///        takes no tag from the automatic numbering, and decodes to
///        `Default::default()` (or to `default` when given).
///
/// Variant attributes: #[tlv(discriminant = 5)] (Default: variant index)
#[proc_macro_derive(ToTLV, attributes(tlvargs, tlv))]
pub fn derive_totlv(item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    expand_totlv(ast)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive FromTLV Macro
///
/// The decoding counterpart of ToTLV, taking the same attributes. Fields are
/// looked up by tag, so the order on the wire does not matter, and tags that
/// match no field are ignored.
#[proc_macro_derive(FromTLV, attributes(tlvargs, tlv))]
pub fn derive_fromtlv(item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    expand_fromtlv(ast)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
