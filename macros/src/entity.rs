use crate::field_parser::{EntityDef, FieldDef, IndexKind};
use crate::macro_utils::DeclaredKind;
use proc_macro2::{Literal, TokenStream};
use quote::quote;

fn opt_str(value: Option<&str>) -> TokenStream {
    match value {
        Some(v) => quote! { Some(#v) },
        None => quote! { None },
    }
}

fn declared_tokens(field: &FieldDef) -> TokenStream {
    match field.declared {
        DeclaredKind::Int => quote! { ::binmap::DeclaredType::Int },
        DeclaredKind::Long => quote! { ::binmap::DeclaredType::Long },
        DeclaredKind::Text => quote! { ::binmap::DeclaredType::Text },
        DeclaredKind::Bytes => quote! { ::binmap::DeclaredType::Bytes },
        DeclaredKind::Object => {
            let tpe = &field.tpe;
            quote! { ::binmap::DeclaredType::Object { rust_type: stringify!(#tpe) } }
        }
    }
}

fn index_tokens(field: &FieldDef) -> TokenStream {
    match &field.index {
        None => quote! { None },
        Some(index) => {
            let name = &index.name;
            let kind = match index.kind {
                None => quote! { None },
                Some(IndexKind::Numeric) => quote! { Some(::binmap::IndexType::Numeric) },
                Some(IndexKind::String) => quote! { Some(::binmap::IndexType::String) },
            };
            quote! { Some(::binmap::IndexDecl { name: #name, kind: #kind }) }
        }
    }
}

fn field_decls(def: &EntityDef) -> Vec<TokenStream> {
    def.fields
        .iter()
        .enumerate()
        .map(|(slot, field)| {
            let name = field.name.to_string();
            let declared = declared_tokens(field);
            let key = field.key;
            let transient = field.transient;
            let index = index_tokens(field);
            quote! {
                ::binmap::FieldDecl { name: #name, declared: #declared, slot: #slot, key: #key, transient: #transient, index: #index }
            }
        })
        .collect()
}

/// Slot literal, name and type of every stored field matching `native`.
fn stored(def: &EntityDef, native: bool) -> impl Iterator<Item = (Literal, &FieldDef)> {
    def.fields
        .iter()
        .enumerate()
        .filter(move |(_, f)| !f.transient && f.declared.is_native() == native)
        .map(|(slot, f)| (Literal::usize_unsuffixed(slot), f))
}

fn native_accessors(def: &EntityDef) -> TokenStream {
    let struct_name = def.ident.to_string();
    let getters = stored(def, true).map(|(slot, f)| {
        let name = &f.name;
        quote! { #slot => Some(::binmap::NativeValue::to_value(&self.#name)), }
    });
    let setters = stored(def, true).map(|(slot, f)| {
        let name = &f.name;
        let tpe = &f.tpe;
        let field_name = name.to_string();
        quote! {
            #slot => {
                self.#name = <#tpe as ::binmap::NativeValue>::from_value(value, #field_name)?;
                Ok(())
            }
        }
    });
    quote! {
        fn native_value(&self, slot: usize) -> Option<::binmap::Value> {
            match slot {
                #(#getters)*
                _ => None,
            }
        }

        fn set_native(&mut self, slot: usize, value: ::binmap::Value) -> Result<(), ::binmap::AppError> {
            match slot {
                #(#setters)*
                _ => Err(::binmap::AppError::Custom(format!("cannot assign {} value to slot {} of {}", value.kind(), slot, #struct_name))),
            }
        }
    }
}

fn codec_accessors(def: &EntityDef) -> TokenStream {
    let struct_name = def.ident.to_string();
    let encoders = stored(def, false).map(|(slot, f)| {
        let name = &f.name;
        quote! { #slot => codec.encode(&self.#name), }
    });
    let decoders = stored(def, false).map(|(slot, f)| {
        let name = &f.name;
        quote! {
            #slot => {
                self.#name = codec.decode(bytes)?;
                Ok(())
            }
        }
    });
    quote! {
        #[allow(unused_variables)]
        fn encode_field<C: ::binmap::ByteCodec>(&self, slot: usize, codec: &C) -> Result<Vec<u8>, ::binmap::SerializationError> {
            match slot {
                #(#encoders)*
                _ => Err(::binmap::SerializationError::Custom(format!("slot {} of {} is not encoded", slot, #struct_name))),
            }
        }

        #[allow(unused_variables)]
        fn decode_field<C: ::binmap::ByteCodec>(&mut self, slot: usize, bytes: &[u8], codec: &C) -> Result<(), ::binmap::SerializationError> {
            match slot {
                #(#decoders)*
                _ => Err(::binmap::SerializationError::Custom(format!("slot {} of {} is not decoded", slot, #struct_name))),
            }
        }
    }
}

fn key_items(def: &EntityDef) -> TokenStream {
    match def.key_field() {
        Some(key) if key.declared.is_native() => {
            let tpe = &key.tpe;
            quote! {
                type Key = #tpe;
                fn native_key(key: &Self::Key) -> Option<::binmap::Value> {
                    Some(::binmap::NativeValue::to_value(key))
                }
            }
        }
        Some(key) => {
            let tpe = &key.tpe;
            quote! {
                type Key = #tpe;
                fn native_key(_key: &Self::Key) -> Option<::binmap::Value> {
                    None
                }
            }
        }
        None => quote! {
            type Key = ::binmap::NoKey;
            fn native_key(key: &Self::Key) -> Option<::binmap::Value> {
                match *key {}
            }
        },
    }
}

pub fn expand(def: &EntityDef) -> TokenStream {
    let ident = &def.ident;
    let (marker, namespace, set) = match &def.marker {
        Some(m) => {
            let namespace = &m.namespace;
            let set = opt_str(m.set.as_deref());
            (quote! { Some(::binmap::EntityMarker { namespace: #namespace, set: #set }) }, quote! { Some(#namespace) }, set)
        }
        None => (quote! { None }, quote! { None }, quote! { None }),
    };
    let decls = field_decls(def);
    let natives = native_accessors(def);
    let codecs = codec_accessors(def);
    let keys = key_items(def);

    quote! {
        impl ::binmap::Entity for #ident {
            #keys

            fn descriptor() -> &'static ::binmap::TypeDescriptor {
                static DESCRIPTOR: ::binmap::TypeDescriptor = ::binmap::TypeDescriptor {
                    type_name: concat!(module_path!(), "::", stringify!(#ident)),
                    marker: #marker,
                    fields: &[#(#decls),*],
                };
                &DESCRIPTOR
            }

            #natives

            #codecs
        }

        ::binmap::inventory::submit! {
            ::binmap::EntityInfo {
                type_name: concat!(module_path!(), "::", stringify!(#ident)),
                namespace: #namespace,
                set: #set,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_parser::parse_entity;
    use syn::{parse_quote, DeriveInput};

    fn expand_str(ast: DeriveInput) -> String {
        expand(&parse_entity(&ast).unwrap()).to_string()
    }

    #[test]
    fn keyless_entity_uses_the_uninhabited_key() {
        let out = expand_str(parse_quote! { #[entity(namespace = "n")] struct Note { text: String } });
        assert!(out.contains("type Key = :: binmap :: NoKey"));
    }

    #[test]
    fn object_fields_go_through_the_codec_and_transient_fields_nowhere() {
        let out = expand_str(parse_quote! {
            #[entity(namespace = "n")]
            struct Doc { #[key] id: i32, tags: Vec<String>, #[transient] scratch: u8 }
        });
        assert!(out.contains("codec . encode (& self . tags)"));
        assert!(!out.contains("self . scratch"));
        assert!(out.contains("type Key = i32"));
    }

    #[test]
    fn unmarked_type_registers_without_namespace() {
        let out = expand_str(parse_quote! { struct Plain { a: i64 } });
        assert!(out.contains("marker : None"));
        assert!(out.contains("namespace : None"));
    }
}
