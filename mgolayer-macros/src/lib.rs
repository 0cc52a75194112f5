//! Procedural macros for the mgolayer project.
//!
//! ## Macros
//!
//! ### `Model`
//!
//! Implements `Model` for a struct, naming the collection it is stored in.
//!
//! - **Container attribute**: `#[model(collection = "...")]`, defaulting to the lowercased type name
//!
//! ### `Hooks`
//!
//! Implements `Hooks` for a struct, exposing the lifecycle capabilities it implements.
//!
//! - **Container attribute**: `#[hooks(before_insert, after_update, ...)]` lists the capability
//!   traits the type implements itself
//! - **Field attribute**: `#[hooks(delegate)]` forwards every capability not listed on the
//!   container to that field
//!
//! # Examples
//!
//! ```rust,ignore
//! use mgolayer::prelude::*;
//!
//! #[derive(Serialize, Deserialize, Model, Hooks)]
//! #[model(collection = "posts")]
//! #[hooks(after_query)]
//! pub struct Post {
//!     #[serde(flatten)]
//!     #[hooks(delegate)]
//!     pub base: BaseModel,
//!     pub title: String,
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mgolayer_macros;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod hooks;
mod model;

#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    model::expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_derive(Hooks, attributes(hooks))]
pub fn derive_hooks(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    hooks::expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
