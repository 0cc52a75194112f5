use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;
use syn::{Data, DeriveInput, Fields, Member, Result};

/// Capability accessor suffixes paired with their trait names.
const CAPABILITIES: [(&str, &str); 10] = [
    ("before_insert", "BeforeInsert"),
    ("after_insert", "AfterInsert"),
    ("before_update", "BeforeUpdate"),
    ("after_update", "AfterUpdate"),
    ("before_query", "BeforeQuery"),
    ("after_query", "AfterQuery"),
    ("before_remove", "BeforeRemove"),
    ("after_remove", "AfterRemove"),
    ("before_upsert", "BeforeUpsert"),
    ("after_upsert", "AfterUpsert"),
];

fn own_capabilities(input: &DeriveInput) -> Result<Vec<String>> {
    let mut own = Vec::new();
    for attr in &input.attrs {
        if attr.path().is_ident("hooks") {
            attr.parse_nested_meta(|meta| {
                let known = CAPABILITIES
                    .iter()
                    .find(|(suffix, _)| meta.path.is_ident(suffix));
                match known {
                    Some((suffix, _)) => {
                        own.push(suffix.to_string());
                        Ok(())
                    }
                    None => Err(meta.error("unknown hook capability")),
                }
            })?;
        }
    }
    Ok(own)
}

fn delegate_field(input: &DeriveInput) -> Result<Option<Member>> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Hooks can only be derived for structs",
        ));
    };

    let mut delegate = None;
    for (index, field) in data.fields.iter().enumerate() {
        for attr in &field.attrs {
            if !attr.path().is_ident("hooks") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("delegate") {
                    Ok(())
                } else {
                    Err(meta.error("unknown field hook attribute"))
                }
            })?;
            if delegate.is_some() {
                return Err(syn::Error::new_spanned(
                    attr,
                    "only one field can be a hook delegate",
                ));
            }
            delegate = Some(match (&data.fields, &field.ident) {
                (Fields::Named(_), Some(ident)) => Member::Named(ident.clone()),
                _ => Member::Unnamed(index.into()),
            });
        }
    }
    Ok(delegate)
}

pub(crate) fn expand(input: &DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let own = own_capabilities(input)?;
    let delegate = delegate_field(input)?;

    let accessors = CAPABILITIES.iter().filter_map(|(suffix, trait_name)| {
        let accessor = Ident::new(&format!("as_{suffix}"), Span::call_site());
        let capability = Ident::new(trait_name, Span::call_site());

        if own.iter().any(|s| s == suffix) {
            Some(quote! {
                fn #accessor(&mut self) -> ::core::option::Option<&mut dyn ::mgolayer::hooks::#capability> {
                    ::core::option::Option::Some(self)
                }
            })
        } else {
            delegate.as_ref().map(|member| {
                quote! {
                    fn #accessor(&mut self) -> ::core::option::Option<&mut dyn ::mgolayer::hooks::#capability> {
                        ::mgolayer::hooks::Hooks::#accessor(&mut self.#member)
                    }
                }
            })
        }
    });

    Ok(quote! {
        impl #impl_generics ::mgolayer::hooks::Hooks for #name #ty_generics #where_clause {
            #(#accessors)*
        }
    })
}
