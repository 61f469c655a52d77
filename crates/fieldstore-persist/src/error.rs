//! Error types for storage backends and the persistence layer.

use std::fmt;
use std::io;

/// A storage backend failed to read or write an entry.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying I/O error.
    Io(io::Error),
    /// A shared map's lock was poisoned by a panicking writer.
    PoisonedLock,
    /// The background writer thread is no longer running.
    WorkerGone,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::PoisonedLock => write!(f, "storage lock poisoned"),
            Self::WorkerGone => write!(f, "background storage worker has stopped"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::PoisonedLock | Self::WorkerGone => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Persisting or loading one field failed.
#[derive(Debug)]
pub enum PersistError {
    /// The storage backend failed.
    Storage {
        /// Storage key of the entry.
        key: String,
        /// Backend error.
        source: StorageError,
    },
    /// The field value could not be encoded.
    Serialize {
        /// Storage key of the entry.
        key: String,
        /// Encoder error.
        source: serde_json::Error,
    },
    /// The stored text could not be decoded into the field's type.
    Deserialize {
        /// Storage key of the entry.
        key: String,
        /// Decoder error.
        source: serde_json::Error,
    },
}

impl PersistError {
    /// Storage key the failure relates to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Storage { key, .. } | Self::Serialize { key, .. } | Self::Deserialize { key, .. } => key,
        }
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { key, source } => write!(f, "storage failed for '{key}': {source}"),
            Self::Serialize { key, source } => write!(f, "cannot encode '{key}': {source}"),
            Self::Deserialize { key, source } => write!(f, "cannot decode '{key}': {source}"),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source),
            Self::Serialize { source, .. } | Self::Deserialize { source, .. } => Some(source),
        }
    }
}
