//! binmap maps plain structs onto records of a schemaless key-value store.
//!
//! `#[derive(Entity)]` describes a struct once at compile time. On first use the description is read
//! into an [`EntityStructure`] (namespace, set, primary key, bin names no longer than 14 bytes,
//! secondary indexes, per-class policies) and cached for the life of the process. Every later read or
//! write goes through that cached structure, and the first write of a type provisions its secondary
//! indexes in the store exactly once, even across restarts.
//!
//! ```ignore
//! #[derive(Entity, Default)]
//! #[entity(namespace = "shop", set = "orders")]
//! struct Order {
//!     #[key]
//!     id: i64,
//!     #[index(name = "order_customer")]
//!     customer: String,
//! }
//!
//! let ops = Operations::with_transport(Arc::new(MemoryTransport::new()));
//! ops.put(&Order { id: 1, customer: "ann".into() })?;
//! let orders: Vec<Order> = ops.query("customer", "ann")?;
//! ```

extern crate self as binmap;

pub mod cache;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod mapper;
pub mod operations;
pub mod policy;
pub mod provisioner;
pub mod reader;
pub mod structure;
pub mod transport;
pub mod value;

pub use cache::{RejectionReason, StructureCache};
pub use codec::{BincodeCodec, ByteCodec, JsonCodec, SerializationError};
pub use descriptor::{registered_entities, DeclaredType, Entity, EntityInfo, EntityMarker, FieldDecl, IndexDecl, IndexType, NoKey, TypeDescriptor};
pub use error::AppError;
pub use field::FieldDescriptor;
pub use inventory;
pub use macros::Entity;
pub use mapper::{FieldFailurePolicy, RecordMapper};
pub use operations::Operations;
pub use policy::{BatchPolicy, ConfigPolicySource, DefaultPolicySource, GenerationPolicy, Policies, PolicySource, Priority, ReadPolicy, RecordExistsAction, WritePolicy};
pub use provisioner::IndexProvisioner;
pub use reader::{AnnotationReader, StructureReader};
pub use structure::{EntityStructure, Index, IndexState, SchemaState};
pub use transport::{CallCounts, Filter, IndexDefinition, MemoryTransport, RecordSet, RedbTransport, Statement, Transport};
pub use value::{Bin, Key, NativeValue, Record, Value, BIN_NAME_MAX};
