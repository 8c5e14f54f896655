use proc_macro::TokenStream;
use proc_macro2::Ident;
use quote::quote;
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use syn::{PathArguments, Type};

/// How a field is stored, decided from the type as written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclaredKind {
    Int,
    Long,
    Text,
    Bytes,
    Object,
}

impl DeclaredKind {
    pub fn is_native(&self) -> bool {
        !matches!(self, DeclaredKind::Object)
    }
}

fn is_plain(ty: &Type, name: &str) -> bool {
    matches!(ty, Type::Path(tp) if tp.qself.is_none() && tp.path.segments.last().is_some_and(|seg| {
        seg.ident == name && matches!(seg.arguments, PathArguments::None)
    }))
}

pub fn is_string(ty: &Type) -> bool {
    is_plain(ty, "String")
}

pub fn is_vec_u8(ty: &Type) -> bool {
    matches!(ty, Type::Path(tp) if {
        tp.path.segments.last().is_some_and(|seg| {
            seg.ident == "Vec" && matches!(&seg.arguments, PathArguments::AngleBracketed(args) if {
                args.args.len() == 1 && args.args.iter().all(|arg| matches!(arg,
                    syn::GenericArgument::Type(Type::Path(p)) if p.path.is_ident("u8")))
            })
        })
    })
}

pub fn classify(ty: &Type) -> DeclaredKind {
    if is_plain(ty, "i32") {
        DeclaredKind::Int
    } else if is_plain(ty, "i64") {
        DeclaredKind::Long
    } else if is_string(ty) {
        DeclaredKind::Text
    } else if is_vec_u8(ty) {
        DeclaredKind::Bytes
    } else {
        DeclaredKind::Object
    }
}

pub fn write_to_local_file(lines: Vec<String>, dir_name: &str, file_name: &str) {
    let Ok(current_dir) = env::current_dir() else {
        return;
    };
    let dir_path = current_dir.join("target").join("macros").join(dir_name);
    if let Err(e) = std::fs::create_dir_all(&dir_path) {
        eprintln!("Failed to create directory {:?}: {}", dir_path, e);
        return;
    }
    let full_path = dir_path.join(file_name);

    #[cfg(not(test))]
    {
        if let Err(e) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&full_path)
            .and_then(|mut file| file.write_all(lines.join("\n").as_bytes()))
        {
            eprintln!("Failed to write to {:?}: {}", full_path, e);
        }
    }
}

/// Dumps the pretty-printed expansion under `target/macros/<dir>/` and hands the stream to the compiler.
pub fn submit_struct_to_stream(stream: proc_macro2::TokenStream, dir: &str, struct_ident: &Ident, suffix: &str) -> TokenStream {
    let formatted_token_stream =
        match syn::parse2::<syn::File>(stream.clone()) {
            Ok(ast) => prettyplease::unparse(&ast),
            Err(_) => stream.to_string(),
        };

    write_to_local_file(vec![formatted_token_stream], dir, &format!("{}{}", struct_ident, suffix));

    quote! {
        #stream
    }.into()
}
