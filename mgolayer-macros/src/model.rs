use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, Result};

pub(crate) fn expand(input: &DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut collection = name.to_string().to_lowercase();
    for attr in &input.attrs {
        if attr.path().is_ident("model") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("collection") {
                    let value: LitStr = meta.value()?.parse()?;
                    if value.value().is_empty() {
                        return Err(syn::Error::new_spanned(
                            value,
                            "collection name must not be empty",
                        ));
                    }
                    collection = value.value();
                    Ok(())
                } else {
                    Err(meta.error("unknown model attribute"))
                }
            })?;
        }
    }

    Ok(quote! {
        impl #impl_generics ::mgolayer::model::Model for #name #ty_generics #where_clause {
            fn collection_name() -> &'static str {
                #collection
            }
        }
    })
}
