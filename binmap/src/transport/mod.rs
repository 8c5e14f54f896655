//! The store boundary. Everything above it speaks keys, bins and policies; the two transports below
//! differ only in where records live.

pub mod memory;
pub mod redb_store;

use crate::descriptor::IndexType;
use crate::policy::{BatchPolicy, GenerationPolicy, ReadPolicy, RecordExistsAction, WritePolicy};
use crate::value::BIN_NAME_MAX;
use crate::{AppError, Bin, Key, Record, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::{CallCounts, MemoryTransport};
pub use redb_store::RedbTransport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Equal { bin: String, value: Value },
    /// Inclusive on both ends.
    Range { bin: String, begin: i64, end: i64 },
}

impl Filter {
    pub fn equal(bin: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equal { bin: bin.into(), value: value.into() }
    }

    pub fn range(bin: impl Into<String>, begin: i64, end: i64) -> Self {
        Filter::Range { bin: bin.into(), begin, end }
    }

    pub fn bin(&self) -> &str {
        match self {
            Filter::Equal { bin, .. } | Filter::Range { bin, .. } => bin,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Equal { bin, value } => record.get(bin) == Some(value),
            Filter::Range { bin, begin, end } => record.get_int(bin).is_some_and(|v| *begin <= v && v <= *end),
        }
    }

    fn required_index_type(&self) -> IndexType {
        match self {
            Filter::Equal { value: Value::Str(_), .. } => IndexType::String,
            _ => IndexType::Numeric,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub namespace: String,
    pub set: String,
    pub filter: Filter,
}

impl Statement {
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, filter: Filter) -> Self {
        Self { namespace: namespace.into(), set: set.into(), filter }
    }

    fn covers(&self, key: &Key) -> bool {
        key.namespace == self.namespace && key.set == self.set
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} where {:?}", self.namespace, self.set, self.filter)
    }
}

/// A secondary index as the store knows it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub namespace: String,
    pub set: String,
    pub name: String,
    pub bin: String,
    pub kind: IndexType,
}

pub type RecordSet = Box<dyn Iterator<Item = Result<Record, AppError>> + Send>;

/// Opaque client of the key-value store. Retries, timeouts and connection handling live behind it.
pub trait Transport: Send + Sync {
    fn get(&self, policy: &ReadPolicy, key: &Key) -> Result<Option<Record>, AppError>;

    /// One slot per key, `None` for misses.
    fn get_many(&self, policy: &BatchPolicy, keys: &[Key]) -> Result<Vec<Option<Record>>, AppError>;

    fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), AppError>;

    /// True when a record was removed.
    fn delete(&self, policy: &WritePolicy, key: &Key) -> Result<bool, AppError>;

    fn exists(&self, policy: &ReadPolicy, key: &Key) -> Result<bool, AppError>;

    fn query(&self, policy: &ReadPolicy, statement: &Statement) -> Result<RecordSet, AppError>;

    /// Repeating the same definition succeeds.
    fn create_index(&self, policy: &ReadPolicy, namespace: &str, set: &str, index_name: &str, bin_name: &str, kind: IndexType) -> Result<(), AppError>;

    fn is_connected(&self) -> bool;
}

/// Merges `bins` into the current record under `policy`. `Ok(None)` means the record is gone.
pub(crate) fn apply_write(existing: Option<&Record>, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<Option<Record>, AppError> {
    if let Some(bin) = bins.iter().find(|b| b.name.len() > BIN_NAME_MAX) {
        return Err(AppError::Store(format!("bin name `{}` exceeds {} bytes", bin.name, BIN_NAME_MAX)));
    }
    let current_generation = existing.map(|r| r.generation).unwrap_or(0);
    match policy.generation_policy {
        GenerationPolicy::None => {}
        GenerationPolicy::ExpectGenEqual if policy.generation == current_generation => {}
        GenerationPolicy::ExpectGenGt if policy.generation > current_generation => {}
        _ => return Err(AppError::Store(format!("generation error on {}: record is at {}, policy carries {}", key, current_generation, policy.generation))),
    }
    let base = match (policy.record_exists_action, existing) {
        (RecordExistsAction::CreateOnly, Some(_)) => return Err(AppError::Store(format!("key {} already exists", key))),
        (RecordExistsAction::UpdateOnly | RecordExistsAction::ReplaceOnly, None) => {
            return Err(AppError::Store(format!("key {} not found", key)))
        }
        (RecordExistsAction::Update | RecordExistsAction::UpdateOnly, Some(record)) => record.bins.clone(),
        _ => Default::default(),
    };
    let mut record = Record { bins: base, generation: current_generation + 1 };
    for bin in bins {
        if bin.value.is_nil() {
            record.bins.remove(&bin.name);
        } else {
            record.bins.insert(bin.name.clone(), bin.value.clone());
        }
    }
    Ok(if record.bins.is_empty() { None } else { Some(record) })
}

/// Adds `definition` unless an identical one exists. A different definition under the same name fails.
pub(crate) fn register_index(definitions: &mut Vec<IndexDefinition>, definition: IndexDefinition) -> Result<bool, AppError> {
    match definitions.iter().find(|d| d.namespace == definition.namespace && d.name == definition.name) {
        Some(existing) if *existing == definition => Ok(false),
        Some(existing) => Err(AppError::Store(format!("index `{}` already exists on {}:{}.{}", existing.name, existing.namespace, existing.set, existing.bin))),
        None => {
            definitions.push(definition);
            Ok(true)
        }
    }
}

/// Fails unless an index of the right kind covers the filtered bin.
pub(crate) fn check_indexed<'a>(definitions: impl IntoIterator<Item = &'a IndexDefinition>, statement: &Statement) -> Result<(), AppError> {
    let bin = statement.filter.bin();
    let wanted = statement.filter.required_index_type();
    let found = definitions.into_iter().find(|d| d.namespace == statement.namespace && d.set == statement.set && d.bin == bin);
    match found {
        Some(d) if d.kind == wanted => Ok(()),
        Some(d) => Err(AppError::Store(format!("index `{}` is {:?}, filter needs {:?}", d.name, d.kind, wanted))),
        None => Err(AppError::Store(format!("no secondary index on bin `{}` of {}:{}", bin, statement.namespace, statement.set))),
    }
}

pub(crate) fn select<'a>(records: impl IntoIterator<Item = (&'a Key, &'a Record)>, statement: &Statement) -> Vec<Record> {
    records
        .into_iter()
        .filter(|(key, record)| statement.covers(key) && statement.filter.matches(record))
        .map(|(_, record)| record.clone())
        .collect()
}
