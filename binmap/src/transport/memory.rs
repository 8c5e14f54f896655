use super::{apply_write, check_indexed, register_index, select, IndexDefinition, RecordSet, Statement, Transport};
use crate::descriptor::IndexType;
use crate::policy::{BatchPolicy, ReadPolicy, WritePolicy};
use crate::{AppError, Bin, Key, Record};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Counters {
    get: AtomicUsize,
    get_many: AtomicUsize,
    put: AtomicUsize,
    delete: AtomicUsize,
    exists: AtomicUsize,
    query: AtomicUsize,
    create_index: AtomicUsize,
}

/// Snapshot of how often each operation reached the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub get_many: usize,
    pub put: usize,
    pub delete: usize,
    pub exists: usize,
    pub query: usize,
    pub create_index: usize,
}

/// In-process store. Records vanish with the value.
pub struct MemoryTransport {
    records: DashMap<Key, Record>,
    indexes: RwLock<Vec<IndexDefinition>>,
    counters: Counters,
    connected: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self { records: DashMap::new(), indexes: RwLock::new(Vec::new()), counters: Counters::default(), connected: AtomicBool::new(true) }
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            get: c.get.load(Ordering::SeqCst),
            get_many: c.get_many.load(Ordering::SeqCst),
            put: c.put.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
            exists: c.exists.load(Ordering::SeqCst),
            query: c.query.load(Ordering::SeqCst),
            create_index: c.create_index.load(Ordering::SeqCst),
        }
    }

    /// While disconnected every operation fails with a store error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn indexes(&self) -> Vec<IndexDefinition> {
        match self.indexes.read() {
            Ok(defs) => defs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn enter(&self, counter: &AtomicUsize) -> Result<(), AppError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::Store("transport is not connected".to_string()))
        }
    }
}

impl Transport for MemoryTransport {
    fn get(&self, _policy: &ReadPolicy, key: &Key) -> Result<Option<Record>, AppError> {
        self.enter(&self.counters.get)?;
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn get_many(&self, _policy: &BatchPolicy, keys: &[Key]) -> Result<Vec<Option<Record>>, AppError> {
        self.enter(&self.counters.get_many)?;
        Ok(keys.iter().map(|key| self.records.get(key).map(|r| r.value().clone())).collect())
    }

    fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), AppError> {
        self.enter(&self.counters.put)?;
        match self.records.entry(key.clone()) {
            Entry::Occupied(mut entry) => match apply_write(Some(entry.get()), policy, key, bins)? {
                Some(record) => {
                    entry.insert(record);
                }
                None => {
                    entry.remove();
                }
            },
            Entry::Vacant(entry) => {
                if let Some(record) = apply_write(None, policy, key, bins)? {
                    entry.insert(record);
                }
            }
        }
        debug!(key = %key, bins = bins.len(), "put");
        Ok(())
    }

    fn delete(&self, _policy: &WritePolicy, key: &Key) -> Result<bool, AppError> {
        self.enter(&self.counters.delete)?;
        Ok(self.records.remove(key).is_some())
    }

    fn exists(&self, _policy: &ReadPolicy, key: &Key) -> Result<bool, AppError> {
        self.enter(&self.counters.exists)?;
        Ok(self.records.contains_key(key))
    }

    fn query(&self, _policy: &ReadPolicy, statement: &Statement) -> Result<RecordSet, AppError> {
        self.enter(&self.counters.query)?;
        check_indexed(self.indexes.read()?.iter(), statement)?;
        let snapshot: Vec<(Key, Record)> = self.records.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let selected = select(snapshot.iter().map(|(k, r)| (k, r)), statement);
        Ok(Box::new(selected.into_iter().map(Ok)))
    }

    fn create_index(&self, _policy: &ReadPolicy, namespace: &str, set: &str, index_name: &str, bin_name: &str, kind: IndexType) -> Result<(), AppError> {
        self.enter(&self.counters.create_index)?;
        let definition = IndexDefinition { namespace: namespace.to_string(), set: set.to_string(), name: index_name.to_string(), bin: bin_name.to_string(), kind };
        register_index(&mut *self.indexes.write()?, definition)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
