use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to put item: {0}")]
    Put(String),
    #[error("failed to get item: {0}")]
    Get(String),
    #[error("failed to erase item: {0}")]
    Delete(String),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
