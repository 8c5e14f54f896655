extern crate proc_macro;
mod entity;
mod field_parser;
mod macro_utils;

use proc_macro::TokenStream;
use proc_macro_error::proc_macro_error;
use syn::{parse_macro_input, DeriveInput};

/// Implements `binmap::Entity` for a struct with named fields.
///
/// Struct attribute `#[entity(namespace = "...", set = "...")]` marks the type as storable, `set`
/// defaulting to the type name. Field attributes: `#[key]` (the first one is the primary key),
/// `#[transient]` (never stored) and `#[index(name = "...", kind = "numeric" | "string")]`.
/// `i32`, `i64`, `String` and `Vec<u8>` are stored natively, every other type goes through the codec
/// and must implement serde's `Serialize` and `Deserialize`.
#[proc_macro_derive(Entity, attributes(entity, key, transient, index))]
#[proc_macro_error]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let def = match field_parser::parse_entity(&ast) {
        Ok(def) => def,
        Err(e) => return e.to_compile_error().into(),
    };
    let stream = entity::expand(&def);
    macro_utils::submit_struct_to_stream(stream, "entity", &def.ident, "_derive.rs")
}
