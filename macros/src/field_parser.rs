use crate::macro_utils::{self, DeclaredKind};
use proc_macro2::Ident;
use syn::spanned::Spanned;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Type};

/// `#[entity(namespace = "...", set = "...")]`
#[derive(Clone, Debug)]
pub struct EntityAttr {
    pub namespace: String,
    pub set: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Numeric,
    String,
}

/// `#[index(name = "...", kind = "numeric" | "string")]`
#[derive(Clone, Debug)]
pub struct IndexAttr {
    pub name: String,
    pub kind: Option<IndexKind>,
}

#[derive(Clone)]
pub struct FieldDef {
    pub name: Ident,
    pub tpe: Type,
    pub declared: DeclaredKind,
    pub key: bool,
    pub transient: bool,
    pub index: Option<IndexAttr>,
}

pub struct EntityDef {
    pub ident: Ident,
    pub marker: Option<EntityAttr>,
    /// In declaration order; the position is the accessor slot.
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    pub fn key_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key && !f.transient)
    }
}

fn parse_entity_attr(attr: &Attribute) -> syn::Result<EntityAttr> {
    let mut namespace = None;
    let mut set = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("namespace") {
            let lit: LitStr = meta.value()?.parse()?;
            namespace = Some(lit.value());
            Ok(())
        } else if meta.path.is_ident("set") {
            let lit: LitStr = meta.value()?.parse()?;
            set = Some(lit.value());
            Ok(())
        } else {
            Err(meta.error("unsupported entity property, expected `namespace` or `set`"))
        }
    })?;
    match namespace {
        Some(namespace) if !namespace.trim().is_empty() => Ok(EntityAttr { namespace, set }),
        _ => Err(syn::Error::new(attr.span(), "#[entity] requires a non-empty `namespace = \"...\"`")),
    }
}

fn parse_index_attr(attr: &Attribute) -> syn::Result<IndexAttr> {
    let mut name = None;
    let mut kind = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("name") {
            let lit: LitStr = meta.value()?.parse()?;
            name = Some(lit.value());
            Ok(())
        } else if meta.path.is_ident("kind") {
            let lit: LitStr = meta.value()?.parse()?;
            kind = Some(match lit.value().as_str() {
                "numeric" => IndexKind::Numeric,
                "string" => IndexKind::String,
                other => return Err(syn::Error::new(lit.span(), format!("unknown index kind `{}`, expected \"numeric\" or \"string\"", other))),
            });
            Ok(())
        } else {
            Err(meta.error("unsupported index property, expected `name` or `kind`"))
        }
    })?;
    match name {
        Some(name) if !name.trim().is_empty() => Ok(IndexAttr { name, kind }),
        _ => Err(syn::Error::new(attr.span(), "#[index] requires a non-empty `name = \"...\"`")),
    }
}

fn parse_field(field: &syn::Field) -> syn::Result<FieldDef> {
    let name = field.ident.clone().ok_or_else(|| syn::Error::new(field.span(), "Unnamed fields not supported"))?;
    let mut def = FieldDef {
        name,
        tpe: field.ty.clone(),
        declared: macro_utils::classify(&field.ty),
        key: false,
        transient: false,
        index: None,
    };
    for attr in &field.attrs {
        if attr.path().is_ident("key") {
            attr.meta.require_path_only()?;
            def.key = true;
        } else if attr.path().is_ident("transient") {
            attr.meta.require_path_only()?;
            def.transient = true;
        } else if attr.path().is_ident("index") {
            if def.index.is_some() {
                return Err(syn::Error::new(attr.span(), "a field carries at most one #[index]"));
            }
            def.index = Some(parse_index_attr(attr)?);
        }
    }
    if def.transient && (def.key || def.index.is_some()) {
        return Err(syn::Error::new(field.span(), "#[transient] fields cannot be #[key] or #[index]"));
    }
    Ok(def)
}

pub fn parse_entity(ast: &DeriveInput) -> syn::Result<EntityDef> {
    if !ast.generics.params.is_empty() {
        return Err(syn::Error::new(ast.generics.span(), "`#[derive(Entity)]` does not support generic types"));
    }
    let named = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => return Err(syn::Error::new(ast.span(), "`#[derive(Entity)]` only supports structs with named fields.")),
        },
        _ => return Err(syn::Error::new(ast.span(), "`#[derive(Entity)]` only supports structs with named fields.")),
    };
    let mut marker = None;
    for attr in ast.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        if marker.is_some() {
            return Err(syn::Error::new(attr.span(), "duplicate #[entity] attribute"));
        }
        marker = Some(parse_entity_attr(attr)?);
    }
    let fields = named.iter().map(parse_field).collect::<syn::Result<Vec<_>>>()?;
    Ok(EntityDef { ident: ast.ident.clone(), marker, fields })
}
