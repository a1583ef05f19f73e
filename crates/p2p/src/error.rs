//! Error types for the peer data plane.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Failures starting the embedded file server.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to bind file server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("shared root {path} is unusable: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures starting the folder watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// One failed download path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Label of the holder the path belongs to.
    pub holder_label: String,
    pub url: String,
    pub reason: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}: {}", self.holder_label, self.url, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("all download paths failed ({} attempted)", attempts.len())]
    AllPathsFailed { attempts: Vec<AttemptFailure> },

    #[error("download cancelled")]
    Cancelled,

    #[error("refusing to write file named {0:?}")]
    InvalidName(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl RetrievalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures talking to the tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("invalid tracker URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("no credential configured")]
    MissingCredential,
}
