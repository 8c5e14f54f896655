use crate::policy::WritePolicy;
use crate::structure::EntityStructure;
use crate::transport::Transport;
use crate::{AppError, Bin, Key};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Set holding one sentinel record per provisioned index, inside the entity's namespace.
pub const SENTINEL_SET: &str = "indexes";
/// Bin of a sentinel record that marks its index as created.
pub const SENTINEL_BIN: &str = "created";

/// Creates the secondary indexes of an entity type in the store before its first write.
#[derive(Clone)]
pub struct IndexProvisioner {
    transport: Arc<dyn Transport>,
}

impl IndexProvisioner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn sentinel_key(namespace: &str, index_name: &str) -> Key {
        Key::new(namespace, SENTINEL_SET, index_name)
    }

    /// Once this returns `Ok` the structure is marked provisioned and later calls return at once.
    /// Concurrent first writers may provision at the same time, the store tolerates repeated creation.
    pub fn ensure_indexes(&self, structure: &EntityStructure) -> Result<(), AppError> {
        if structure.is_indexes_initialized() {
            return Ok(());
        }
        if !structure.begin_provisioning() {
            // another writer is provisioning, repeating the work is harmless
            debug!(class = structure.class_name(), "Indexes are being provisioned concurrently");
        }
        match self.provision(structure) {
            Ok(()) => {
                structure.finish_provisioning();
                Ok(())
            }
            Err(e) => {
                structure.abort_provisioning();
                Err(e)
            }
        }
    }

    fn provision(&self, structure: &EntityStructure) -> Result<(), AppError> {
        let read = structure.read_policy();
        // sentinel writes are plain upserts
        let write = WritePolicy { base: structure.write_policy().base, ..WritePolicy::default() };
        for (field, index) in structure.secondary_indexes() {
            let sentinel = Self::sentinel_key(structure.namespace(), &index.name);
            let created = self.transport.get(&read, &sentinel)?.and_then(|r| r.get(SENTINEL_BIN).map(|v| v.is_truthy())).unwrap_or(false);
            if created {
                warn!(index = %index.name, class = structure.class_name(), "Index already exists, skipping");
                continue;
            }
            let bin = structure.bin_name(field);
            self.transport.create_index(&read, structure.namespace(), structure.set(), &index.name, bin, index.kind)?;
            self.transport.put(&write, &sentinel, &[Bin::new(SENTINEL_BIN, 1)])?;
            info!(index = %index.name, bin = bin, kind = ?index.kind, class = structure.class_name(), "Index created");
        }
        Ok(())
    }
}
