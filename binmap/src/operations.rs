use crate::cache::StructureCache;
use crate::codec::{BincodeCodec, ByteCodec};
use crate::descriptor::IndexType;
use crate::mapper::RecordMapper;
use crate::policy::DefaultPolicySource;
use crate::provisioner::IndexProvisioner;
use crate::structure::EntityStructure;
use crate::transport::{Filter, Statement, Transport};
use crate::{AppError, Bin, Entity, Key, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Store calls slower than this are logged at warn level.
const SLOW_CALL: Duration = Duration::from_millis(500);

fn timed<R>(op: &'static str, class: &str, call: impl FnOnce() -> Result<R, AppError>) -> Result<R, AppError> {
    let start = Instant::now();
    let result = call();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    if elapsed_ms >= SLOW_CALL.as_millis() as u64 {
        warn!(op, class, elapsed_ms, "Slow store call");
    } else {
        debug!(op, class, elapsed_ms, "Store call");
    }
    result
}

/// Typed entry point: resolves structures, maps entities and talks to the transport.
pub struct Operations<C: ByteCodec = BincodeCodec> {
    cache: Arc<StructureCache>,
    mapper: RecordMapper<C>,
    provisioner: IndexProvisioner,
    transport: Arc<dyn Transport>,
}

impl Operations<BincodeCodec> {
    /// Built-in policies and the bincode codec.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::new(Arc::new(StructureCache::new(Arc::new(DefaultPolicySource))), RecordMapper::default(), transport)
    }
}

impl<C: ByteCodec> Operations<C> {
    pub fn new(cache: Arc<StructureCache>, mapper: RecordMapper<C>, transport: Arc<dyn Transport>) -> Self {
        let provisioner = IndexProvisioner::new(Arc::clone(&transport));
        Self { cache, mapper, provisioner, transport }
    }

    pub fn cache(&self) -> &Arc<StructureCache> {
        &self.cache
    }

    pub fn mapper(&self) -> &RecordMapper<C> {
        &self.mapper
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn structure<T: Entity>(&self) -> Result<Arc<EntityStructure>, AppError> {
        self.cache.resolve::<T>()
    }

    pub fn put<T: Entity>(&self, entity: &T) -> Result<(), AppError> {
        let structure = self.structure::<T>()?;
        self.write(&structure, structure.namespace(), structure.set(), entity)
    }

    /// Writes `entity` into an explicit namespace and set instead of the declared ones.
    pub fn put_in<T: Entity>(&self, namespace: &str, set: &str, entity: &T) -> Result<(), AppError> {
        let structure = self.structure::<T>()?;
        self.write(&structure, namespace, set, entity)
    }

    /// Writes raw bins under the write policy of `T`.
    pub fn put_bins<T: Entity>(&self, namespace: &str, set: &str, key: impl Into<Value>, bins: &[Bin]) -> Result<(), AppError> {
        let structure = self.structure::<T>()?;
        self.provisioner.ensure_indexes(&structure)?;
        let key = Key::new(namespace, set, key);
        timed("put_bins", structure.class_name(), || self.transport.put(&structure.write_policy(), &key, bins))
    }

    fn write<T: Entity>(&self, structure: &EntityStructure, namespace: &str, set: &str, entity: &T) -> Result<(), AppError> {
        let key = Key::new(namespace, set, self.mapper.primary_key(structure, entity)?);
        let bins = self.mapper.to_bins(structure, entity)?;
        self.provisioner.ensure_indexes(structure)?;
        timed("put", structure.class_name(), || self.transport.put(&structure.write_policy(), &key, &bins))
    }

    fn key<T: Entity>(&self, structure: &EntityStructure, key: &T::Key) -> Result<Key, AppError> {
        Ok(Key::new(structure.namespace(), structure.set(), self.mapper.key_value::<T>(key)?))
    }

    pub fn get<T: Entity>(&self, key: &T::Key) -> Result<Option<T>, AppError> {
        let structure = self.structure::<T>()?;
        let key = self.key::<T>(&structure, key)?;
        let record = timed("get", structure.class_name(), || self.transport.get(&structure.read_policy(), &key))?;
        self.mapper.from_record(&structure, record)
    }

    pub fn get_from<T: Entity>(&self, namespace: &str, set: &str, key: &T::Key) -> Result<Option<T>, AppError> {
        let structure = self.structure::<T>()?;
        let key = Key::new(namespace, set, self.mapper.key_value::<T>(key)?);
        let record = timed("get_from", structure.class_name(), || self.transport.get(&structure.read_policy(), &key))?;
        self.mapper.from_record(&structure, record)
    }

    pub fn get_many<T: Entity>(&self, keys: &[T::Key]) -> Result<HashMap<T::Key, T>, AppError> {
        let structure = self.structure::<T>()?;
        let store_keys = keys.iter().map(|k| self.key::<T>(&structure, k)).collect::<Result<Vec<_>, _>>()?;
        let records = timed("get_many", structure.class_name(), || self.transport.get_many(&structure.batch_policy(), &store_keys))?;
        self.mapper.from_records(&structure, keys, records)
    }

    pub fn query<T: Entity>(&self, field: &str, value: impl Into<Value>) -> Result<Vec<T>, AppError> {
        let structure = self.structure::<T>()?;
        let bin = self.indexed_bin(&structure, field)?;
        self.run(&structure, Filter::equal(bin, value))
    }

    /// Inclusive on both ends.
    pub fn query_range<T: Entity>(&self, field: &str, begin: i64, end: i64) -> Result<Vec<T>, AppError> {
        let structure = self.structure::<T>()?;
        let bin = self.indexed_bin(&structure, field)?;
        self.run(&structure, Filter::range(bin, begin, end))
    }

    fn indexed_bin<'s>(&self, structure: &'s EntityStructure, field: &'s str) -> Result<&'s str, AppError> {
        if structure.secondary_indexes().contains_key(field) {
            Ok(structure.bin_name(field))
        } else {
            warn!(field = field, class = structure.class_name(), "Query on a field without a secondary index");
            Err(AppError::FieldNotIndexed { class: structure.class_name().to_string(), field: field.to_string() })
        }
    }

    fn run<T: Entity>(&self, structure: &EntityStructure, filter: Filter) -> Result<Vec<T>, AppError> {
        let statement = Statement::new(structure.namespace(), structure.set(), filter);
        timed("query", structure.class_name(), || {
            let records = self.transport.query(&structure.read_policy(), &statement)?;
            self.mapper.from_record_set(structure, records)
        })
    }

    pub fn remove<T: Entity>(&self, key: &T::Key) -> Result<bool, AppError> {
        let structure = self.structure::<T>()?;
        let key = self.key::<T>(&structure, key)?;
        timed("remove", structure.class_name(), || self.transport.delete(&structure.write_policy(), &key))
    }

    pub fn exists<T: Entity>(&self, key: &T::Key) -> Result<bool, AppError> {
        let structure = self.structure::<T>()?;
        let key = self.key::<T>(&structure, key)?;
        timed("exists", structure.class_name(), || self.transport.exists(&structure.read_policy(), &key))
    }

    /// Creates an index outside the declared ones, on the bin that holds `field`.
    pub fn add_index<T: Entity>(&self, field: &str, index_name: &str, kind: IndexType) -> Result<(), AppError> {
        let structure = self.structure::<T>()?;
        let bin = structure.bin_name(field);
        timed("add_index", structure.class_name(), || {
            self.transport.create_index(&structure.read_policy(), structure.namespace(), structure.set(), index_name, bin, kind)
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn timed_calls_run_once_and_pass_results_through() {
        let runs = Cell::new(0);
        let ok = timed("exists", "t::T", || {
            runs.set(runs.get() + 1);
            Ok(true)
        });
        assert!(ok.unwrap());
        let err: Result<(), AppError> = timed("remove", "t::T", || Err(AppError::Store("offline".to_string())));
        assert!(matches!(err, Err(AppError::Store(_))));
        assert_eq!(runs.get(), 1);
    }
}
