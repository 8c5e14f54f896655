use crate::descriptor::Entity;
use crate::policy::PolicySource;
use crate::reader::{AnnotationReader, StructureReader};
use crate::structure::EntityStructure;
use crate::AppError;
use dashmap::DashMap;
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    NotAnEntity,
    ParseFailure,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NotAnEntity => write!(f, "not an entity"),
            RejectionReason::ParseFailure => write!(f, "failed in parsing"),
        }
    }
}

/// Process-wide map from entity type to its structure. Hits are lock-free, structure creation is
/// serialized by a single lock and double-checked. Failed types are remembered and never re-read.
pub struct StructureCache<R: StructureReader = AnnotationReader> {
    structures: DashMap<TypeId, Arc<EntityStructure>>,
    rejections: DashMap<TypeId, RejectionReason>,
    creation_lock: Mutex<()>,
    reader: R,
}

impl StructureCache<AnnotationReader> {
    pub fn new(policies: Arc<dyn PolicySource>) -> Self {
        Self::with_reader(AnnotationReader::new(policies))
    }
}

impl<R: StructureReader> StructureCache<R> {
    pub fn with_reader(reader: R) -> Self {
        Self {
            structures: DashMap::with_capacity(100),
            rejections: DashMap::with_capacity(100),
            creation_lock: Mutex::new(()),
            reader,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn resolve<T: Entity>(&self) -> Result<Arc<EntityStructure>, AppError> {
        let id = TypeId::of::<T>();
        if let Some(structure) = self.structures.get(&id) {
            return Ok(Arc::clone(structure.value()));
        }
        if !self.rejections.contains_key(&id) {
            let _guard = self.creation_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(structure) = self.structures.get(&id) {
                return Ok(Arc::clone(structure.value()));
            }
            if !self.rejections.contains_key(&id) {
                match self.reader.extract_schema::<T>() {
                    Ok(structure) => {
                        structure.mark_schema_initialized();
                        debug!(class = structure.class_name(), namespace = structure.namespace(), set = structure.set(), "Structure initialized");
                        let structure = Arc::new(structure);
                        self.structures.insert(id, Arc::clone(&structure));
                        return Ok(structure);
                    }
                    Err(e) => {
                        let reason = if e.is_incompatible_entity() { RejectionReason::NotAnEntity } else { RejectionReason::ParseFailure };
                        error!(class = T::descriptor().type_name, reason = %reason, error = %e, "Failed to parse class");
                        self.rejections.insert(id, reason);
                    }
                }
            }
        }
        let reason = self.rejections.get(&id).map(|r| *r.value()).unwrap_or(RejectionReason::ParseFailure);
        Err(AppError::IncompatibleEntity(format!("{} is not compatible ({})", T::descriptor().type_name, reason)))
    }

    /// Cached structure without triggering a read.
    pub fn get<T: Entity>(&self) -> Option<Arc<EntityStructure>> {
        self.structures.get(&TypeId::of::<T>()).map(|s| Arc::clone(s.value()))
    }

    pub fn rejection<T: Entity>(&self) -> Option<RejectionReason> {
        self.rejections.get(&TypeId::of::<T>()).map(|r| *r.value())
    }

    pub fn key_field<T: Entity>(&self) -> Option<&'static str> {
        match self.get::<T>() {
            Some(structure) => {
                let key = structure.primary_key().map(|f| f.name());
                if key.is_none() {
                    debug!(class = T::descriptor().type_name, "No key field defined");
                }
                key
            }
            None => {
                debug!(class = T::descriptor().type_name, "Structure data is not loaded");
                None
            }
        }
    }

    pub fn structures(&self) -> Vec<Arc<EntityStructure>> {
        self.structures.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Re-fetches the cached policies of every known structure.
    pub fn reload_policies(&self, source: &dyn PolicySource) {
        for entry in self.structures.iter() {
            entry.value().refresh_policies(source);
        }
    }
}
