use crate::descriptor::{DeclaredType, FieldDecl};

/// One persistable field of an entity structure. Immutable once built by the reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: &'static str,
    declared: DeclaredType,
    slot: usize,
    serializer_required: bool,
}

impl FieldDescriptor {
    pub(crate) fn from_decl(decl: &FieldDecl) -> Self {
        Self {
            name: decl.name,
            declared: decl.declared,
            slot: decl.slot,
            serializer_required: !decl.declared.is_native(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn declared(&self) -> DeclaredType {
        self.declared
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// True iff the declared type is none of i32, i64, String, Vec<u8>.
    pub fn serializer_required(&self) -> bool {
        self.serializer_required
    }
}
