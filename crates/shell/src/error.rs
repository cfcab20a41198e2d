// SPDX-License-Identifier: MIT

//! Process-pool error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn {argv:?}: {source}")]
    Spawn {
        argv: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open redirect file {path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wire pipe between pipeline members: {0}")]
    Pipe(std::io::Error),

    #[error("failed to wait on child {argv:?}: {source}")]
    Wait {
        argv: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("process pool cancelled by signal {0}")]
    Cancelled(i32),

    #[error("failed to create temporary path {path}: {source}")]
    TempPath {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
