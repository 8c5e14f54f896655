use crate::descriptor::{registered_entities, DeclaredType, Entity, IndexType, TypeDescriptor};
use crate::field::FieldDescriptor;
use crate::policy::{Policies, PolicySource};
use crate::structure::{EntityStructure, Index};
use crate::value::BIN_NAME_MAX;
use crate::AppError;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Characters of a long field name kept in its generated short name.
const SHORT_NAME_PREFIX: usize = 11;

/// Derives an [`EntityStructure`] from a type's structural annotations.
pub trait StructureReader: Send + Sync {
    fn extract_schema<T: Entity>(&self) -> Result<EntityStructure, AppError>;
}

/// Reads the descriptor emitted by `#[derive(Entity)]` and attaches per-class policies.
#[derive(Clone)]
pub struct AnnotationReader {
    policies: Arc<dyn PolicySource>,
}

impl AnnotationReader {
    pub fn new(policies: Arc<dyn PolicySource>) -> Self {
        Self { policies }
    }

    pub fn policy_source(&self) -> &Arc<dyn PolicySource> {
        &self.policies
    }
}

fn invalid(desc: &TypeDescriptor, reason: impl Into<String>) -> AppError {
    AppError::InvalidSchema { class: desc.type_name.to_string(), reason: reason.into() }
}

/// Longest prefix of `field` that fits in 11 bytes without splitting a character.
pub fn short_name_prefix(field: &str) -> &str {
    let end = field
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= SHORT_NAME_PREFIX)
        .last()
        .unwrap_or(0);
    &field[..end]
}

/// `prefix + "_" + ordinal`, the ordinal being the 1-based position of the field among the long
/// field names that share its prefix, sorted lexicographically.
pub fn short_name(field: &str, ordinal: usize) -> String {
    format!("{}_{}", short_name_prefix(field), ordinal)
}

fn index_kind(desc: &TypeDescriptor, field: &str, declared: DeclaredType, requested: Option<IndexType>) -> Result<IndexType, AppError> {
    let natural = declared.default_index_type();
    match (requested, natural) {
        (None, Some(kind)) => Ok(kind),
        (Some(kind), Some(natural)) if kind == natural => Ok(kind),
        (Some(kind), Some(natural)) => Err(invalid(desc, format!("field `{}` holds {:?} values, cannot carry a {:?} index", field, natural, kind))),
        (_, None) => Err(invalid(desc, format!("field `{}` of type {:?} cannot be indexed", field, declared))),
    }
}

pub(crate) fn read_structure(desc: &'static TypeDescriptor) -> Result<EntityStructure, AppError> {
    let marker = desc.marker.ok_or_else(|| {
        AppError::IncompatibleEntity(format!("{} is not marked with #[entity]. Can't store", desc.type_name))
    })?;
    if marker.namespace.trim().is_empty() {
        return Err(invalid(desc, "namespace is blank"));
    }
    let set = match marker.set {
        Some(set) if !set.trim().is_empty() => set.to_string(),
        _ => desc.type_name.to_string(),
    };
    let mut structure = EntityStructure::new(desc.type_name, marker.namespace.to_string(), set);
    let mut index_names = HashSet::new();

    for decl in desc.fields {
        if decl.transient {
            info!(field = decl.name, class = desc.type_name, "Field is #[transient]. It will not be saved");
            continue;
        }
        let field = FieldDescriptor::from_decl(decl);
        if decl.key {
            if structure.primary_key().is_none() {
                structure.set_primary_key(field.clone());
            } else {
                debug!(field = decl.name, class = desc.type_name, "Additional #[key] field ignored for key purposes");
            }
        }
        if let Some(index) = decl.index {
            let kind = index_kind(desc, decl.name, decl.declared, index.kind)?;
            if !index_names.insert(index.name) {
                return Err(invalid(desc, format!("index name `{}` declared twice", index.name)));
            }
            info!(index = index.name, kind = ?kind, field = decl.name, class = desc.type_name, "Found secondary index");
            structure.put_index(decl.name, Index { name: index.name.to_string(), kind });
        }
        debug!(field = decl.name, slot = decl.slot, serializer_required = field.serializer_required(), class = desc.type_name, "Persistable field");
        structure.push_field(field);
    }

    let mut groups: BTreeMap<&'static str, Vec<&'static str>> = BTreeMap::new();
    for field in structure.persistable_fields() {
        if field.name().len() > BIN_NAME_MAX {
            groups.entry(short_name_prefix(field.name())).or_default().push(field.name());
        }
    }
    for mut names in groups.into_values() {
        names.sort_unstable();
        for (pos, name) in names.into_iter().enumerate() {
            structure.put_short_name(name, short_name(name, pos + 1));
        }
    }

    let mut bins = HashSet::new();
    for field in structure.persistable_fields() {
        let bin = structure.bin_name(field.name());
        if !bins.insert(bin) {
            return Err(invalid(desc, format!("bin name `{}` of field `{}` collides with another field", bin, field.name())));
        }
    }
    if !structure.bin_names_fit() {
        return Err(invalid(desc, format!("a bin name exceeds {} bytes", BIN_NAME_MAX)));
    }

    for other in registered_entities() {
        if other.type_name != desc.type_name && other.namespace == Some(marker.namespace) && other.effective_set() == structure.set() {
            warn!(class = desc.type_name, other = other.type_name, set = structure.set(), "Two entity types share one set");
        }
    }
    Ok(structure)
}

impl StructureReader for AnnotationReader {
    fn extract_schema<T: Entity>(&self) -> Result<EntityStructure, AppError> {
        let structure = read_structure(T::descriptor())?;
        structure.set_policies(Policies::fetch(self.policies.as_ref(), structure.class_name()));
        Ok(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EntityMarker, FieldDecl, IndexDecl};

    const fn field(name: &'static str, declared: DeclaredType, slot: usize) -> FieldDecl {
        FieldDecl { name, declared, slot, key: false, transient: false, index: None }
    }

    const MAP: DeclaredType = DeclaredType::Object { rust_type: "HashMap<i64, String>" };

    static OFFER: TypeDescriptor = TypeDescriptor {
        type_name: "reader::Offer",
        marker: Some(EntityMarker { namespace: "promo", set: None }),
        fields: &[
            FieldDecl { key: true, ..field("id", DeclaredType::Int, 0) },
            FieldDecl { index: Some(IndexDecl { name: "offer_code", kind: None }), ..field("code", DeclaredType::Text, 1) },
            FieldDecl { key: true, ..field("alt_id", DeclaredType::Long, 2) },
            FieldDecl { transient: true, ..field("scratch", DeclaredType::Text, 3) },
            field("redemption_window_days", DeclaredType::Int, 4),
            field("attributes", MAP, 5),
        ],
    };

    #[test]
    fn first_key_field_wins_and_later_keys_stay_persistable() {
        let s = read_structure(&OFFER).unwrap();
        assert_eq!(s.primary_key().map(|f| f.name()), Some("id"));
        assert!(s.field("alt_id").is_some());
    }

    #[test]
    fn set_defaults_to_type_name_and_transient_is_skipped() {
        let s = read_structure(&OFFER).unwrap();
        assert_eq!(s.namespace(), "promo");
        assert_eq!(s.set(), "reader::Offer");
        assert!(s.field("scratch").is_none());
        let names: Vec<_> = s.persistable_fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["id", "code", "alt_id", "redemption_window_days", "attributes"]);
    }

    #[test]
    fn long_names_get_sorted_ordinal_suffix() {
        let s = read_structure(&OFFER).unwrap();
        assert_eq!(s.bin_name("redemption_window_days"), "redemption__1");
        assert_eq!(s.short_names().len(), 1);
        assert!(s.persistable_fields().iter().all(|f| s.bin_name(f.name()).len() <= BIN_NAME_MAX));
    }

    #[test]
    fn index_kind_is_inferred() {
        let s = read_structure(&OFFER).unwrap();
        assert_eq!(s.secondary_indexes().get("code"), Some(&Index { name: "offer_code".into(), kind: IndexType::String }));
        assert!(s.field("attributes").unwrap().serializer_required());
    }

    static UNMARKED: TypeDescriptor = TypeDescriptor { type_name: "reader::Plain", marker: None, fields: &[] };

    #[test]
    fn missing_marker_is_incompatible() {
        let err = read_structure(&UNMARKED).unwrap_err();
        assert!(err.is_incompatible_entity());
    }

    static COLLIDING: TypeDescriptor = TypeDescriptor {
        type_name: "reader::Colliding",
        marker: Some(EntityMarker { namespace: "promo", set: Some("c") }),
        fields: &[
            field("customer_ref_1", DeclaredType::Text, 0),
            field("customer_ref_long", DeclaredType::Text, 1),
            field("customer_ref_longer", DeclaredType::Text, 2),
            field("customer_ref_apex", DeclaredType::Text, 3),
        ],
    };

    #[test]
    fn names_sharing_a_prefix_stay_distinct() {
        let s = read_structure(&COLLIDING).unwrap();
        assert_eq!(s.bin_name("customer_ref_long"), "customer_re_2");
        assert_eq!(s.bin_name("customer_ref_longer"), "customer_re_3");
        assert_eq!(s.bin_name("customer_ref_apex"), "customer_re_1");
        assert_eq!(s.bin_name("customer_ref_1"), "customer_ref_1");
    }

    static CLASH: TypeDescriptor = TypeDescriptor {
        type_name: "reader::Clash",
        marker: Some(EntityMarker { namespace: "promo", set: Some("c") }),
        fields: &[
            field("customer_re_1", DeclaredType::Text, 0),
            field("customer_ref_number", DeclaredType::Text, 1),
        ],
    };

    #[test]
    fn short_name_equal_to_existing_bin_is_rejected() {
        let err = read_structure(&CLASH).unwrap_err();
        assert!(matches!(err, AppError::InvalidSchema { .. }));
    }

    static BAD_INDEX: TypeDescriptor = TypeDescriptor {
        type_name: "reader::BadIndex",
        marker: Some(EntityMarker { namespace: "promo", set: None }),
        fields: &[FieldDecl { index: Some(IndexDecl { name: "by_attrs", kind: None }), ..field("attrs", MAP, 0) }],
    };

    static WRONG_KIND: TypeDescriptor = TypeDescriptor {
        type_name: "reader::WrongKind",
        marker: Some(EntityMarker { namespace: "promo", set: None }),
        fields: &[FieldDecl { index: Some(IndexDecl { name: "by_id", kind: Some(IndexType::String) }), ..field("id", DeclaredType::Long, 0) }],
    };

    static BLANK_NS: TypeDescriptor = TypeDescriptor {
        type_name: "reader::BlankNs",
        marker: Some(EntityMarker { namespace: " ", set: None }),
        fields: &[],
    };

    #[test]
    fn invalid_declarations_are_parse_failures() {
        for desc in [&BAD_INDEX, &WRONG_KIND, &BLANK_NS] {
            let err = read_structure(desc).unwrap_err();
            assert!(matches!(err, AppError::InvalidSchema { .. }), "{}: {}", desc.type_name, err);
        }
    }

    static CAMPAIGN_V1: TypeDescriptor = TypeDescriptor {
        type_name: "reader::Campaign",
        marker: Some(EntityMarker { namespace: "promo", set: None }),
        fields: &[
            FieldDecl { key: true, ..field("code", DeclaredType::Text, 0) },
            field("budget_in_minor_currency_units", DeclaredType::Long, 1),
        ],
    };

    static CAMPAIGN_V2: TypeDescriptor = TypeDescriptor {
        type_name: "reader::Campaign",
        marker: Some(EntityMarker { namespace: "promo", set: None }),
        fields: &[
            field("active", DeclaredType::Int, 0),
            FieldDecl { key: true, ..field("code", DeclaredType::Text, 1) },
            field("audience_segments_by_region", MAP, 2),
            field("budget_in_minor_currency_units", DeclaredType::Long, 3),
        ],
    };

    #[test]
    fn adding_fields_keeps_existing_short_names() {
        let v1 = read_structure(&CAMPAIGN_V1).unwrap();
        let v2 = read_structure(&CAMPAIGN_V2).unwrap();
        assert_eq!(v1.bin_name("budget_in_minor_currency_units"), "budget_in_m_1");
        assert_eq!(v2.bin_name("budget_in_minor_currency_units"), "budget_in_m_1");
        assert_eq!(v2.bin_name("audience_segments_by_region"), "audience_se_1");
    }

    static UMLAUT: TypeDescriptor = TypeDescriptor {
        type_name: "reader::Umlaut",
        marker: Some(EntityMarker { namespace: "promo", set: None }),
        fields: &[
            FieldDecl { key: true, ..field("id", DeclaredType::Long, 0) },
            field("größenänderung", DeclaredType::Long, 1),
            field("maße", DeclaredType::Long, 2),
        ],
    };

    #[test]
    fn bin_length_is_measured_in_bytes() {
        let s = read_structure(&UMLAUT).unwrap();
        let bin = s.bin_name("größenänderung");
        assert_eq!(bin, "größenän_1");
        assert!(bin.len() <= BIN_NAME_MAX);
        assert_eq!(s.bin_name("maße"), "maße");
    }

    #[test]
    fn prefix_never_splits_a_character() {
        assert_eq!(short_name_prefix("größenänderung"), "größenän");
        assert_eq!(short_name_prefix("budget_in_minor"), "budget_in_m");
        assert_eq!(short_name_prefix("ab"), "ab");
    }
}
