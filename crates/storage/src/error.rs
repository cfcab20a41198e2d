// SPDX-License-Identifier: MIT

//! Storage-layer error taxonomy: annotation, ping, and volatile-placeholder
//! I/O.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize YAML for {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("executing-ping file already exists at {0}: run is already in progress")]
    AlreadyRunning(String),
}
