use std::sync::PoisonError;
use thiserror::Error;
use crate::codec::SerializationError;

#[derive(Debug, Error)]
pub enum AppError {

    #[error("Incompatible entity: {0}")]
    IncompatibleEntity(String),

    #[error("Invalid schema for {class}: {reason}")]
    InvalidSchema { class: String, reason: String },

    #[error("No primary key defined for class: {0}")]
    PrimaryKeyNotDefined(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Field `{field}` of class {class} is not indexed")]
    FieldNotIndexed { class: String, field: String },

    #[error("Type mismatch on `{field}`: expected {expected}, found {found}")]
    TypeMismatch { field: String, expected: &'static str, found: &'static str },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl AppError {
    pub fn is_incompatible_entity(&self) -> bool {
        matches!(self, AppError::IncompatibleEntity(_))
    }
}

impl<T> From<PoisonError<T>> for AppError
{
    fn from(e: PoisonError<T>) -> Self {
        AppError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}
