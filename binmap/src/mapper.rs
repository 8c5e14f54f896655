use crate::codec::{BincodeCodec, ByteCodec};
use crate::Entity;
use crate::structure::EntityStructure;
use crate::transport::RecordSet;
use crate::{AppError, Bin, Record, Value};
use std::collections::HashMap;
use tracing::error;

/// What `to_bins` does when one field cannot be turned into a bin value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FieldFailurePolicy {
    /// Log the failure and write the record without that bin.
    #[default]
    Omit,
    /// Fail the whole write.
    Abort,
}

/// Converts entities to bins and records back to entities. Stateless apart from its codec.
#[derive(Clone, Debug, Default)]
pub struct RecordMapper<C: ByteCodec = BincodeCodec> {
    codec: C,
    on_field_failure: FieldFailurePolicy,
}

impl<C: ByteCodec> RecordMapper<C> {
    pub fn new(codec: C) -> Self {
        Self { codec, on_field_failure: FieldFailurePolicy::default() }
    }

    pub fn with_field_failure_policy(mut self, policy: FieldFailurePolicy) -> Self {
        self.on_field_failure = policy;
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn field_failure_policy(&self) -> FieldFailurePolicy {
        self.on_field_failure
    }

    pub fn to_bins<T: Entity>(&self, structure: &EntityStructure, entity: &T) -> Result<Vec<Bin>, AppError> {
        let mut bins = Vec::with_capacity(structure.persistable_fields().len());
        for field in structure.persistable_fields() {
            let value = if field.serializer_required() {
                entity.encode_field(field.slot(), &self.codec).map(Value::Bytes).map_err(AppError::from)
            } else {
                entity
                    .native_value(field.slot())
                    .ok_or_else(|| AppError::Custom(format!("field `{}` of {} has no native accessor", field.name(), structure.class_name())))
            };
            match value {
                Ok(value) => bins.push(Bin::new(structure.bin_name(field.name()), value)),
                Err(e) => match self.on_field_failure {
                    FieldFailurePolicy::Omit => {
                        error!(field = field.name(), class = structure.class_name(), error = %e, "Failed to map field, bin omitted")
                    }
                    FieldFailurePolicy::Abort => return Err(e),
                },
            }
        }
        Ok(bins)
    }

    /// `None` for an absent record. Bins missing from the record leave the default value in place.
    pub fn from_record<T: Entity>(&self, structure: &EntityStructure, record: Option<Record>) -> Result<Option<T>, AppError> {
        let Some(mut record) = record else {
            return Ok(None);
        };
        let mut entity = T::default();
        for field in structure.persistable_fields() {
            let value = match record.bins.remove(structure.bin_name(field.name())) {
                Some(Value::Nil) | None => continue,
                Some(value) => value,
            };
            if field.serializer_required() {
                match value {
                    Value::Bytes(bytes) => entity.decode_field(field.slot(), &bytes, &self.codec)?,
                    other => {
                        return Err(AppError::TypeMismatch { field: field.name().to_string(), expected: "bytes", found: other.kind() })
                    }
                }
            } else {
                entity.set_native(field.slot(), value)?;
            }
        }
        Ok(Some(entity))
    }

    /// Pairs each requested key with its record. Keys whose record is absent are dropped.
    pub fn from_records<T: Entity>(&self, structure: &EntityStructure, keys: &[T::Key], records: Vec<Option<Record>>) -> Result<HashMap<T::Key, T>, AppError> {
        let mut entities = HashMap::with_capacity(records.len());
        for (key, record) in keys.iter().zip(records) {
            if let Some(entity) = self.from_record(structure, record)? {
                entities.insert(key.clone(), entity);
            }
        }
        Ok(entities)
    }

    pub fn from_record_set<T: Entity>(&self, structure: &EntityStructure, records: RecordSet) -> Result<Vec<T>, AppError> {
        let mut entities = Vec::new();
        for record in records {
            if let Some(entity) = self.from_record(structure, Some(record?))? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Store key value of `entity`. Non-native key fields are passed through the codec.
    pub fn primary_key<T: Entity>(&self, structure: &EntityStructure, entity: &T) -> Result<Value, AppError> {
        let key = structure.primary_key().ok_or_else(|| AppError::PrimaryKeyNotDefined(structure.class_name().to_string()))?;
        if key.serializer_required() {
            Ok(Value::Bytes(entity.encode_field(key.slot(), &self.codec)?))
        } else {
            entity
                .native_value(key.slot())
                .ok_or_else(|| AppError::Custom(format!("key `{}` of {} has no native accessor", key.name(), structure.class_name())))
        }
    }

    /// Store key value of a typed key, encoded the same way `primary_key` encodes the key field.
    pub fn key_value<T: Entity>(&self, key: &T::Key) -> Result<Value, AppError> {
        match T::native_key(key) {
            Some(value) => Ok(value),
            None => Ok(Value::Bytes(self.codec.encode(key)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SerializationError;
    use crate::policy::DefaultPolicySource;
    use crate::reader::{AnnotationReader, StructureReader};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Entity, Default, Debug, Clone, PartialEq)]
    #[entity(namespace = "test", set = "offers")]
    struct Offer {
        #[key]
        id: i64,
        #[index(name = "offer_title")]
        title: String,
        redemption_window_days: i32,
        tags: BTreeMap<String, i64>,
        payload: Vec<u8>,
        #[transient]
        scratch: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    struct Coordinates {
        lat: i64,
        lon: i64,
    }

    #[derive(Entity, Default, Debug, Clone, PartialEq)]
    #[entity(namespace = "test")]
    struct Place {
        #[key]
        at: Coordinates,
        name: String,
    }

    #[derive(Entity, Default, Debug, Clone, PartialEq)]
    #[entity(namespace = "test")]
    struct Keyless {
        note: String,
    }

    fn mapper() -> RecordMapper {
        RecordMapper::default()
    }

    fn structure<T: Entity>() -> EntityStructure {
        AnnotationReader::new(Arc::new(DefaultPolicySource)).extract_schema::<T>().unwrap()
    }

    fn offer() -> Offer {
        let mut tags = BTreeMap::new();
        tags.insert("spring".to_string(), 3);
        Offer {
            id: 42,
            title: "Two for one".to_string(),
            redemption_window_days: 14,
            tags,
            payload: vec![1, 2, 3],
            scratch: "not stored".to_string(),
        }
    }

    struct BrokenCodec;

    impl ByteCodec for BrokenCodec {
        fn encode<T: Serialize + ?Sized>(&self, _value: &T) -> Result<Vec<u8>, SerializationError> {
            Err(SerializationError::Custom("encoder offline".to_string()))
        }
        fn decode<T: DeserializeOwned>(&self, _bytes: &[u8]) -> Result<T, SerializationError> {
            Err(SerializationError::Custom("decoder offline".to_string()))
        }
    }

    #[test]
    fn bins_use_short_names_and_skip_transient_fields() {
        let s = structure::<Offer>();
        let bins = mapper().to_bins(&s, &offer()).unwrap();
        let names: Vec<_> = bins.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "redemption__1", "tags", "payload"]);
        assert_eq!(bins[0].value, Value::Int(42));
        assert!(matches!(bins[3].value, Value::Bytes(_)));
        assert_eq!(bins[4].value, Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn record_round_trip_restores_persisted_fields() {
        let s = structure::<Offer>();
        let mapper = mapper();
        let original = offer();
        let record = Record::from_bins(mapper.to_bins(&s, &original).unwrap());
        let restored: Offer = mapper.from_record(&s, Some(record)).unwrap().unwrap();
        assert_eq!(restored, Offer { scratch: String::new(), ..original });
    }

    #[test]
    fn absent_record_maps_to_none() {
        let s = structure::<Offer>();
        assert_eq!(mapper().from_record::<Offer>(&s, None).unwrap(), None);
    }

    #[test]
    fn missing_bins_keep_defaults() {
        let s = structure::<Offer>();
        let record = Record::from_bins(vec![Bin::new("id", 7), Bin::new("unknown", "ignored")]);
        let restored: Offer = mapper().from_record(&s, Some(record)).unwrap().unwrap();
        assert_eq!(restored, Offer { id: 7, ..Offer::default() });
    }

    #[test]
    fn mismatched_bin_is_an_error() {
        let s = structure::<Offer>();
        let record = Record::from_bins(vec![Bin::new("title", 7)]);
        let err = mapper().from_record::<Offer>(&s, Some(record)).unwrap_err();
        assert!(matches!(err, AppError::TypeMismatch { .. }));
    }

    #[test]
    fn failing_field_is_omitted_or_aborts() {
        let s = structure::<Offer>();
        let lenient = RecordMapper::new(BrokenCodec);
        let bins = lenient.to_bins(&s, &offer()).unwrap();
        assert!(bins.iter().all(|b| b.name != "tags"));
        assert_eq!(bins.len(), 4);

        let strict = RecordMapper::new(BrokenCodec).with_field_failure_policy(FieldFailurePolicy::Abort);
        assert!(matches!(strict.to_bins(&s, &offer()).unwrap_err(), AppError::Serialization(_)));
    }

    #[test]
    fn records_are_keyed_and_misses_dropped() {
        let s = structure::<Offer>();
        let mapper = mapper();
        let first = Record::from_bins(mapper.to_bins(&s, &offer()).unwrap());
        let entities = mapper.from_records::<Offer>(&s, &[42, 43], vec![Some(first), None]).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[&42].title, "Two for one");
    }

    #[test]
    fn object_keys_go_through_the_codec() {
        let s = structure::<Place>();
        let mapper = mapper();
        let place = Place { at: Coordinates { lat: 59, lon: 10 }, name: "Oslo".to_string() };
        let key = mapper.primary_key(&s, &place).unwrap();
        assert_eq!(key, Value::Bytes(BincodeCodec.encode(&place.at).unwrap()));
        assert_eq!(mapper.key_value::<Place>(&place.at).unwrap(), key);
        assert_eq!(mapper.key_value::<Offer>(&42).unwrap(), Value::Int(42));
    }

    #[test]
    fn keyless_entity_has_no_primary_key() {
        let s = structure::<Keyless>();
        let err = mapper().primary_key(&s, &Keyless::default()).unwrap_err();
        assert!(matches!(err, AppError::PrimaryKeyNotDefined(_)));
    }
}
