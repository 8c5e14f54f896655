use super::{apply_write, check_indexed, register_index, select, IndexDefinition, RecordSet, Statement, Transport};
use crate::codec::SerializationError;
use crate::descriptor::IndexType;
use crate::policy::{BatchPolicy, ReadPolicy, WritePolicy};
use crate::{AppError, Bin, Key, Record};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// bincode(Key) -> bincode(Record)
const RECORDS: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("records");
/// "namespace:index name" -> bincode(IndexDefinition)
const INDEXES: TableDefinition<'static, &str, &[u8]> = TableDefinition::new("index_definitions");

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AppError> {
    Ok(bincode::serialize(value).map_err(SerializationError::from)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    Ok(bincode::deserialize(bytes).map_err(SerializationError::from)?)
}

/// Persistent single-file store. Records and index definitions survive reopening the file.
pub struct RedbTransport {
    db: Database,
    path: PathBuf,
}

impl RedbTransport {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;
        let tx = db.begin_write()?;
        {
            tx.open_table(RECORDS)?;
            tx.open_table(INDEXES)?;
        }
        tx.commit()?;
        info!(path = %path.display(), "Opened redb store");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index_definitions(&self) -> Result<Vec<IndexDefinition>, AppError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(INDEXES)?;
        let mut definitions = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            definitions.push(decode(value.value())?);
        }
        Ok(definitions)
    }

    fn read(&self, keys: &[Key]) -> Result<Vec<Option<Record>>, AppError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RECORDS)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let raw = encode(key)?;
            let record = match table.get(raw.as_slice())? {
                Some(guard) => Some(decode::<Record>(guard.value())?),
                None => None,
            };
            records.push(record);
        }
        Ok(records)
    }
}

impl Transport for RedbTransport {
    fn get(&self, _policy: &ReadPolicy, key: &Key) -> Result<Option<Record>, AppError> {
        Ok(self.read(std::slice::from_ref(key))?.pop().flatten())
    }

    fn get_many(&self, _policy: &BatchPolicy, keys: &[Key]) -> Result<Vec<Option<Record>>, AppError> {
        self.read(keys)
    }

    fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), AppError> {
        let raw = encode(key)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(RECORDS)?;
            let existing = match table.get(raw.as_slice())? {
                Some(guard) => Some(decode::<Record>(guard.value())?),
                None => None,
            };
            match apply_write(existing.as_ref(), policy, key, bins)? {
                Some(record) => {
                    let value = encode(&record)?;
                    table.insert(raw.as_slice(), value.as_slice())?;
                }
                None => {
                    table.remove(raw.as_slice())?;
                }
            }
        }
        tx.commit()?;
        debug!(key = %key, bins = bins.len(), "put");
        Ok(())
    }

    fn delete(&self, _policy: &WritePolicy, key: &Key) -> Result<bool, AppError> {
        let raw = encode(key)?;
        let tx = self.db.begin_write()?;
        let removed = {
            let mut table = tx.open_table(RECORDS)?;
            let removed = table.remove(raw.as_slice())?.is_some();
            removed
        };
        tx.commit()?;
        Ok(removed)
    }

    fn exists(&self, policy: &ReadPolicy, key: &Key) -> Result<bool, AppError> {
        Ok(self.get(policy, key)?.is_some())
    }

    fn query(&self, _policy: &ReadPolicy, statement: &Statement) -> Result<RecordSet, AppError> {
        check_indexed(&self.index_definitions()?, statement)?;
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RECORDS)?;
        let mut rows: Vec<(Key, Record)> = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            rows.push((decode(key.value())?, decode(value.value())?));
        }
        let selected = select(rows.iter().map(|(k, r)| (k, r)), statement);
        Ok(Box::new(selected.into_iter().map(Ok)))
    }

    fn create_index(&self, _policy: &ReadPolicy, namespace: &str, set: &str, index_name: &str, bin_name: &str, kind: IndexType) -> Result<(), AppError> {
        let definition = IndexDefinition { namespace: namespace.to_string(), set: set.to_string(), name: index_name.to_string(), bin: bin_name.to_string(), kind };
        let tx = self.db.begin_write()?;
        let created = {
            let mut table = tx.open_table(INDEXES)?;
            let mut definitions = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                definitions.push(decode::<IndexDefinition>(value.value())?);
            }
            let created = register_index(&mut definitions, definition.clone())?;
            if created {
                let id = format!("{}:{}", namespace, index_name);
                let value = encode(&definition)?;
                table.insert(id.as_str(), value.as_slice())?;
            }
            created
        };
        tx.commit()?;
        if created {
            info!(index = index_name, bin = bin_name, set = set, "Index definition stored");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Filter;
    use crate::Value;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("binmap_redb_{}.redb", rand::random::<u64>()))
    }

    #[test]
    fn records_and_indexes_survive_reopen() {
        let path = temp_path();
        let key = Key::new("ns", "people", "ann");
        {
            let store = RedbTransport::open(&path).unwrap();
            store.put(&WritePolicy::default(), &key, &[Bin::new("city", "Oslo")]).unwrap();
            store.create_index(&ReadPolicy::default(), "ns", "people", "people_city", "city", IndexType::String).unwrap();
        }
        let store = RedbTransport::open(&path).unwrap();
        let record = store.get(&ReadPolicy::default(), &key).unwrap().unwrap();
        assert_eq!(record.get("city"), Some(&Value::from("Oslo")));
        let found: Vec<_> = store
            .query(&ReadPolicy::default(), &Statement::new("ns", "people", Filter::equal("city", "Oslo")))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(found, vec![record]);
        drop(store);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn delete_reports_whether_something_was_removed() {
        let path = temp_path();
        let store = RedbTransport::open(&path).unwrap();
        let key = Key::new("ns", "s", 1);
        assert!(!store.exists(&ReadPolicy::default(), &key).unwrap());
        store.put(&WritePolicy::default(), &key, &[Bin::new("v", 1)]).unwrap();
        assert!(store.exists(&ReadPolicy::default(), &key).unwrap());
        assert!(store.delete(&WritePolicy::default(), &key).unwrap());
        assert!(!store.delete(&WritePolicy::default(), &key).unwrap());
        drop(store);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn conflicting_index_definitions_race_to_a_single_winner() {
        let path = temp_path();
        let store = std::sync::Arc::new(RedbTransport::open(&path).unwrap());
        let handles: Vec<_> = ["city", "street", "zip", "country"]
            .into_iter()
            .map(|bin| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || store.create_index(&ReadPolicy::default(), "ns", "people", "people_place", bin, IndexType::String))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(store.index_definitions().unwrap().len(), 1);

        let winner = store.index_definitions().unwrap().remove(0);
        store.create_index(&ReadPolicy::default(), "ns", "people", "people_place", &winner.bin, IndexType::String).unwrap();
        drop(store);
        let _ = std::fs::remove_file(path);
    }
}
