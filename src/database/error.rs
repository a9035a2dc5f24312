use thiserror::Error;

use crate::service::storage::types::StorageError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record with id {0} not found.")]
    HistoryNotFound(i64),

    #[error("Model '{name}' not found for provider '{provider}'.")]
    ModelNotFound { name: String, provider: String },

    #[error("Model '{name}' already exists for provider '{provider}'.")]
    ModelAlreadyExists { name: String, provider: String },

    #[error("Prompt '{0}' not found.")]
    PromptNotFound(String),

    #[error("Prompt '{0}' already exists.")]
    PromptAlreadyExists(String),

    #[error("File '{0}' not found.")]
    FileNotFound(String),

    #[error("File '{0}' already exists.")]
    FileAlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::HistoryNotFound(_)
                | StoreError::ModelNotFound { .. }
                | StoreError::PromptNotFound(_)
                | StoreError::FileNotFound(_)
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StoreError::ModelAlreadyExists { .. }
                | StoreError::PromptAlreadyExists(_)
                | StoreError::FileAlreadyExists(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
