// SPDX-License-Identifier: MIT

//! Engine-level error taxonomy (`spec.md` §7), on top of the configuration
//! and connection errors defined in `flowcell-config`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("run {task_id} is already running: an executing-ping file exists")]
    AlreadyRunning { task_id: String },

    #[error("failed to create exclusive temp directory {path}: {source}")]
    TempDirExists {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] flowcell_storage::StorageError),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command {argv:?} exited with status {code} in run {task_id}")]
    NonZeroExit {
        task_id: String,
        argv: Vec<String>,
        code: i32,
    },

    #[error("pipeline in run {task_id} failed: first offending command {argv:?}")]
    PipelineFailed { task_id: String, argv: Vec<String> },

    #[error(transparent)]
    Shell(#[from] flowcell_shell::ShellError),

    #[error(transparent)]
    Cancellation(#[from] CancellationError),
}

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("announced output {basename} missing from temp directory in run {task_id}")]
    AnnouncedOutputMissing { task_id: String, basename: String },

    #[error("hash mismatch for {path}: downstream runs will observe CHANGED")]
    HashMismatch { path: String },

    #[error("failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CancellationError {
    #[error("run {task_id} cancelled by signal {signal}")]
    Signalled { task_id: String, signal: i32 },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("duplicate output basename {basename} on connection {connection} in run {task_id}")]
    DuplicateOutputBasename {
        task_id: String,
        connection: String,
        basename: String,
    },

    #[error("temp directory for run {task_id} already exists at {path}")]
    TempDirExists { task_id: String, path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("tool {tool} required by step {step} is not declared in configuration")]
    UnknownTool { step: String, tool: String },

    #[error("tool {tool} required by step {step} has no resolvable path and tool checks are enabled")]
    ToolCheckFailed { step: String, tool: String },
}

/// The umbrella error the run executor and DAG driver return, unifying the
/// per-phase error enums.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] flowcell_config::ConfigurationError),

    #[error(transparent)]
    Connection(#[from] flowcell_config::ConnectionError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Cancellation(#[from] CancellationError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Storage(#[from] flowcell_storage::StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
