//! Static, declarative description of a persistable type, emitted once per type by `#[derive(Entity)]`.
//! It plays the role of runtime reflection: the structure reader walks it exactly once per type.

use crate::codec::{ByteCodec, SerializationError};
use crate::{AppError, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// `#[entity(namespace = "...", set = "...")]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityMarker {
    pub namespace: &'static str,
    pub set: Option<&'static str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    Numeric,
    String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexDecl {
    pub name: &'static str,
    /// `None` when the attribute left the kind to be inferred from the declared type.
    pub kind: Option<IndexType>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclaredType {
    Int,
    Long,
    Text,
    Bytes,
    /// Any other type; `rust_type` is the type as written in the struct.
    Object { rust_type: &'static str },
}

impl DeclaredType {
    pub fn is_native(&self) -> bool {
        !matches!(self, DeclaredType::Object { .. })
    }

    pub fn default_index_type(&self) -> Option<IndexType> {
        match self {
            DeclaredType::Int | DeclaredType::Long => Some(IndexType::Numeric),
            DeclaredType::Text => Some(IndexType::String),
            DeclaredType::Bytes | DeclaredType::Object { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: &'static str,
    pub declared: DeclaredType,
    /// Accessor slot understood by the type's `Entity` implementation.
    pub slot: usize,
    pub key: bool,
    pub transient: bool,
    pub index: Option<IndexDecl>,
}

#[derive(Debug)]
pub struct TypeDescriptor {
    pub type_name: &'static str,
    pub marker: Option<EntityMarker>,
    /// In declaration order.
    pub fields: &'static [FieldDecl],
}

/// Implemented by `#[derive(Entity)]`.
pub trait Entity: Default + Sized + Send + Sync + 'static {
    /// Type of the first `#[key]` field, [`NoKey`] when there is none.
    type Key: Serialize + DeserializeOwned + Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn descriptor() -> &'static TypeDescriptor;

    /// `None` when the slot does not hold a native (i32, i64, String, Vec<u8>) field.
    fn native_value(&self, slot: usize) -> Option<Value>;

    fn set_native(&mut self, slot: usize, value: Value) -> Result<(), AppError>;

    fn encode_field<C: ByteCodec>(&self, slot: usize, codec: &C) -> Result<Vec<u8>, SerializationError>;

    fn decode_field<C: ByteCodec>(&mut self, slot: usize, bytes: &[u8], codec: &C) -> Result<(), SerializationError>;

    /// Store key for a native key value, `None` for keys that go through the codec.
    fn native_key(key: &Self::Key) -> Option<Value>;
}

/// Key type of entities that declare no `#[key]` field. Uninhabited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoKey {}

pub struct EntityInfo {
    pub type_name: &'static str,
    pub namespace: Option<&'static str>,
    pub set: Option<&'static str>,
}

impl EntityInfo {
    pub fn effective_set(&self) -> &'static str {
        match self.set {
            Some(set) if !set.is_empty() => set,
            _ => self.type_name,
        }
    }
}

inventory::collect!(EntityInfo);

/// Every type in the binary that derives `Entity`.
pub fn registered_entities() -> impl Iterator<Item = &'static EntityInfo> {
    inventory::iter::<EntityInfo>.into_iter()
}
