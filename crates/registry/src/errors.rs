//! Error types for the peer registry

use peershare_files::FilesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<FilesError> for RegistryError {
    fn from(err: FilesError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
