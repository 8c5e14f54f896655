use crate::descriptor::IndexType;
use crate::field::FieldDescriptor;
use crate::policy::{BatchPolicy, Policies, PolicySource, ReadPolicy, WritePolicy};
use crate::value::BIN_NAME_MAX;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub kind: IndexType,
}

/// {Uninitialized -> Initialized}, flipped once under the cache creation lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaState {
    Uninitialized = 0,
    Initialized = 1,
}

/// {NotProvisioned -> Provisioning -> Provisioned}. Racy by design: several first writers may be
/// provisioning at once, the store side is idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexState {
    NotProvisioned = 0,
    Provisioning = 1,
    Provisioned = 2,
}

impl IndexState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IndexState::Provisioning,
            2 => IndexState::Provisioned,
            _ => IndexState::NotProvisioned,
        }
    }
}

/// Cached schema of one entity type.
#[derive(Debug)]
pub struct EntityStructure {
    class_name: &'static str,
    namespace: String,
    set: String,
    primary_key: Option<FieldDescriptor>,
    fields: Vec<FieldDescriptor>,
    short_names: HashMap<&'static str, String>,
    /// Reverse of `short_names`.
    long_names: HashMap<String, &'static str>,
    indexes: BTreeMap<&'static str, Index>,
    policies: RwLock<Policies>,
    schema_state: AtomicU8,
    index_state: AtomicU8,
}

impl EntityStructure {
    pub(crate) fn new(class_name: &'static str, namespace: String, set: String) -> Self {
        Self {
            class_name,
            namespace,
            set,
            primary_key: None,
            fields: Vec::new(),
            short_names: HashMap::new(),
            long_names: HashMap::new(),
            indexes: BTreeMap::new(),
            policies: RwLock::new(Policies::default()),
            schema_state: AtomicU8::new(SchemaState::Uninitialized as u8),
            index_state: AtomicU8::new(IndexState::NotProvisioned as u8),
        }
    }

    pub(crate) fn push_field(&mut self, field: FieldDescriptor) {
        self.fields.push(field);
    }

    pub(crate) fn set_primary_key(&mut self, field: FieldDescriptor) {
        self.primary_key = Some(field);
    }

    pub(crate) fn put_short_name(&mut self, field: &'static str, short: String) {
        self.long_names.insert(short.clone(), field);
        self.short_names.insert(field, short);
    }

    pub(crate) fn put_index(&mut self, field: &'static str, index: Index) {
        self.indexes.insert(field, index);
    }

    pub(crate) fn set_policies(&self, policies: Policies) {
        match self.policies.write() {
            Ok(mut guard) => *guard = policies,
            Err(poisoned) => *poisoned.into_inner() = policies,
        }
    }

    pub fn refresh_policies(&self, source: &dyn PolicySource) {
        self.set_policies(Policies::fetch(source, self.class_name));
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.primary_key.as_ref()
    }

    pub fn persistable_fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn short_names(&self) -> &HashMap<&'static str, String> {
        &self.short_names
    }

    /// Name of the bin holding `field`, the generated short name for long field names.
    pub fn bin_name<'a>(&'a self, field: &'a str) -> &'a str {
        match self.short_names.get(field) {
            Some(short) => short.as_str(),
            None => field,
        }
    }

    /// Reverse of [`bin_name`](Self::bin_name).
    pub fn field_name<'a>(&'a self, bin: &'a str) -> &'a str {
        self.long_names.get(bin).copied().unwrap_or(bin)
    }

    pub fn secondary_indexes(&self) -> &BTreeMap<&'static str, Index> {
        &self.indexes
    }

    pub fn policies(&self) -> Policies {
        match self.policies.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.policies().read
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.policies().write
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        self.policies().batch
    }

    pub fn schema_state(&self) -> SchemaState {
        if self.schema_state.load(Ordering::Acquire) == SchemaState::Initialized as u8 {
            SchemaState::Initialized
        } else {
            SchemaState::Uninitialized
        }
    }

    pub fn is_schema_initialized(&self) -> bool {
        self.schema_state() == SchemaState::Initialized
    }

    pub(crate) fn mark_schema_initialized(&self) {
        self.schema_state.store(SchemaState::Initialized as u8, Ordering::Release);
    }

    pub fn index_state(&self) -> IndexState {
        IndexState::from_u8(self.index_state.load(Ordering::Acquire))
    }

    pub fn is_indexes_initialized(&self) -> bool {
        self.index_state() == IndexState::Provisioned
    }

    /// Moves NotProvisioned -> Provisioning. Returns false when another caller already started.
    pub(crate) fn begin_provisioning(&self) -> bool {
        self.index_state
            .compare_exchange(IndexState::NotProvisioned as u8, IndexState::Provisioning as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish_provisioning(&self) {
        self.index_state.store(IndexState::Provisioned as u8, Ordering::Release);
    }

    /// Provisioning -> NotProvisioned after a failed attempt, a concurrent success is kept.
    pub(crate) fn abort_provisioning(&self) {
        let _ = self.index_state.compare_exchange(IndexState::Provisioning as u8, IndexState::NotProvisioned as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn all_bin_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| self.bin_name(f.name()))
    }

    pub(crate) fn bin_names_fit(&self) -> bool {
        self.all_bin_names().all(|b| b.len() <= BIN_NAME_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_state_moves_forward_once() {
        let s = EntityStructure::new("t::T", "ns".into(), "t::T".into());
        assert_eq!(s.index_state(), IndexState::NotProvisioned);
        assert!(s.begin_provisioning());
        assert!(!s.begin_provisioning());
        assert_eq!(s.index_state(), IndexState::Provisioning);
        s.finish_provisioning();
        assert!(s.is_indexes_initialized());
        s.abort_provisioning();
        assert_eq!(s.index_state(), IndexState::Provisioned);
    }

    #[test]
    fn aborted_provisioning_can_be_retried() {
        let s = EntityStructure::new("t::T", "ns".into(), "t::T".into());
        assert!(s.begin_provisioning());
        s.abort_provisioning();
        assert!(s.begin_provisioning());
    }

    #[test]
    fn schema_state_is_independent_of_index_state() {
        let s = EntityStructure::new("t::T", "ns".into(), "t::T".into());
        s.mark_schema_initialized();
        assert!(s.is_schema_initialized());
        assert_eq!(s.index_state(), IndexState::NotProvisioned);
    }

    #[test]
    fn short_names_resolve_both_ways() {
        let mut s = EntityStructure::new("t::T", "ns".into(), "t::T".into());
        s.put_short_name("a_really_long_name", "a_really_lo_1".to_string());
        assert_eq!(s.bin_name("a_really_long_name"), "a_really_lo_1");
        assert_eq!(s.field_name("a_really_lo_1"), "a_really_long_name");
        assert_eq!(s.bin_name("short"), "short");
        assert_eq!(s.field_name("short"), "short");
    }
}
