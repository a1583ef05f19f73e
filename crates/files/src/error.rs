//! Error types for content identity

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilesError {
    #[error("fingerprint must be 64 hex characters, got {0}")]
    InvalidFingerprintLength(usize),

    #[error("fingerprint must be valid hex: {0}")]
    InvalidFingerprintHex(String),

    #[error("invalid display name {name:?}: {reason}")]
    InvalidDisplayName { name: String, reason: &'static str },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FilesError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FilesError>;
