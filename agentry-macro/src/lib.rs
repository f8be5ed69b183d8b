/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![forbid(unsafe_code)]

//! Agentry Macro Library
//!
//! Procedural macros for the Agentry multi-agent runtime.
//!
//! # Message Content Macro
//!
//! [`agentry_message`] turns a plain struct into typed message content that
//! can be attached to a `Message` and recovered on the receiving side:
//!
//! ```ignore
//! #[agentry_message]
//! pub struct RequestMsg {
//!     pub x: i32,
//! }
//!
//! // Override the class name carried on the wire.
//! #[agentry_message(class = "shell.ExecReq")]
//! pub struct ShellExecReq {
//!     pub cmd: String,
//! }
//! ```
//!
//! # Main Entry Point
//!
//! [`agentry_main`] wraps an async `main` in a Tokio runtime:
//!
//! ```ignore
//! use agentry::prelude::*;
//!
//! #[agentry_main]
//! async fn main() {
//!     let platform = Platform::real_time();
//!     // ... containers and agents
//!     platform.shutdown().await;
//! }
//! ```

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, DeriveInput, ItemFn};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(trait_name) {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

/// Configuration options parsed from `#[agentry_message(...)]` attributes.
#[derive(Default)]
struct MessageConfig {
    /// Class name override. Defaults to the struct identifier.
    class: Option<String>,
}

impl MessageConfig {
    /// Parse configuration from attribute tokens.
    fn parse(attr: &TokenStream) -> Self {
        let mut config = Self::default();

        let attr_string = attr.to_string();
        for part in attr_string.split(',') {
            let mut kv = part.splitn(2, '=');
            let key = kv.next().map(str::trim).unwrap_or_default();
            if key == "class" {
                if let Some(value) = kv.next() {
                    let value = value.trim().trim_matches('"').to_string();
                    if !value.is_empty() {
                        config.class = Some(value);
                    }
                }
            }
        }

        config
    }
}

/// Declares a struct as typed message content.
///
/// This expands to:
/// - `#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]` (only the ones not already present)
/// - an implementation of `agentry::prelude::MessageContent` whose `CLASS` is the
///   struct name, or the value given with `class = "..."`
///
/// **Note:** the generated derives refer to `::serde`, so the crate using the
/// macro needs `serde` as a dependency.
#[proc_macro_attribute]
pub fn agentry_message(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = MessageConfig::parse(&attr);

    let input = parse_macro_input!(item as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let derives = {
        let mut traits = Vec::new();
        if !has_derive(&input, "Clone") {
            traits.push(quote!(Clone));
        }
        if !has_derive(&input, "Debug") {
            traits.push(quote!(Debug));
        }
        if !has_derive(&input, "Serialize") {
            traits.push(quote!(::serde::Serialize));
        }
        if !has_derive(&input, "Deserialize") {
            traits.push(quote!(::serde::Deserialize));
        }
        if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        }
    };

    let class = config.class.unwrap_or_else(|| name.to_string());

    let expanded = quote! {
        #derives
        #input

        impl #impl_generics ::agentry::prelude::MessageContent for #name #ty_generics #where_clause {
            const CLASS: &'static str = #class;
        }
    };

    TokenStream::from(expanded)
}

/// Entry point macro for Agentry applications.
///
/// Marks an async `main` as the application entry point and builds the Tokio
/// runtime around it.
///
/// - `flavor`: `"multi_thread"` (default) or `"current_thread"`
/// - `worker_threads`: number of worker threads for the multi-threaded runtime
///
/// ```ignore
/// #[agentry_main(worker_threads = 4)]
/// async fn main() { }
/// ```
#[proc_macro_attribute]
pub fn agentry_main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            sig.fn_token,
            "the async keyword is missing from the function declaration",
        )
        .to_compile_error()
        .into();
    }

    if sig.ident != "main" {
        return syn::Error::new_spanned(
            &sig.ident,
            "agentry_main can only be applied to the main function",
        )
        .to_compile_error()
        .into();
    }

    let attr_string = attr.to_string();
    let use_current_thread = attr_string.contains("current_thread");

    let worker_threads: Option<usize> = attr_string
        .split(',')
        .find(|s| s.contains("worker_threads"))
        .and_then(|s| s.split('=').nth(1).and_then(|v| v.trim().parse().ok()));

    let runtime_builder = if use_current_thread {
        quote! {
            ::agentry::prelude::tokio::runtime::Builder::new_current_thread()
        }
    } else if let Some(threads) = worker_threads {
        quote! {
            ::agentry::prelude::tokio::runtime::Builder::new_multi_thread()
                .worker_threads(#threads)
        }
    } else {
        quote! {
            ::agentry::prelude::tokio::runtime::Builder::new_multi_thread()
        }
    };

    let fn_name = &sig.ident;
    let fn_inputs = &sig.inputs;
    let fn_output = &sig.output;

    let expanded = quote! {
        #(#attrs)*
        #vis fn #fn_name(#fn_inputs) #fn_output {
            #runtime_builder
                .enable_all()
                .build()
                .expect("Failed to build Agentry runtime")
                .block_on(async #body)
        }
    };

    TokenStream::from(expanded)
}
