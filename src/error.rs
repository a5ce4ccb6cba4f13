use crate::model::BatchKey;
use std::sync::Arc;

/// Errors raised while building fields from the API description.
///
/// These are schema authoring bugs and are returned to the immediate caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field definition is required")]
    MissingDefinition,
    #[error("name for field {0} is not provided")]
    MissingName(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("cannot resolve reference {0}")]
    InvalidReference(String),
    #[error("invalid x-options for field {field}: {message}")]
    InvalidOptions { field: String, message: String },
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
    #[error("{field}: {message}")]
    Construction { field: String, message: String },
}

impl FieldError {
    pub fn construction(field: &str, message: impl Into<String>) -> Self {
        FieldError::Construction {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of a failed relation lookup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The batch succeeded but no record carried this key.
    #[error("object with key {key} not found in {source_name}")]
    NotFound { key: BatchKey, source_name: String },
    /// The batch query itself failed; every waiter of the batch gets this.
    #[error("batch query against {source_name} failed: {error}")]
    Batch {
        source_name: String,
        error: Arc<anyhow::Error>,
    },
    /// The batch owning this request went away without answering it.
    #[error("request was dropped before its batch completed")]
    Dropped,
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Empty,
    MaxLength,
    MinLength,
    Maximum,
    Minimum,
    NotAllowed,
    MinItems,
    MaxItems,
    UniqueItems,
}

/// A value failed one of the constraints its field declares.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
