//! Error types for docshift.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by snapshotting, generation and migration execution.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Missing or invalid configuration (connection string, config file).
    #[error("configuration error: {0}")]
    Config(String),

    /// The migrations directory exists but cannot be read.
    #[error("cannot read migrations directory {path}: {source}")]
    MigrationsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration unit file is malformed.
    #[error("invalid migration unit {path}: {reason}")]
    InvalidUnit { path: PathBuf, reason: String },

    /// A registry entry refers to a unit that is not on disk.
    #[error("migration unit {0} not found in migrations directory")]
    UnitNotFound(String),

    /// Refusing to overwrite an existing unit or snapshot file.
    #[error("refusing to overwrite existing file {0}")]
    AlreadyExists(PathBuf),

    /// A unit's `up` or `down` failed against the database.
    #[error("migration {version} failed: {source}")]
    Execution {
        version: String,
        #[source]
        source: StoreError,
    },

    /// Another runner holds the migration lock.
    #[error("migration lock is held by {holder} until {expires_at}")]
    LockHeld { holder: String, expires_at: String },

    /// Database access outside of unit execution (registry, lock).
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MigrateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        MigrateError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Result type for docshift operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
