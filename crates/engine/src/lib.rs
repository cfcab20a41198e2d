// SPDX-License-Identifier: MIT
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flowcell-engine: the DAG driver, connection binder, and run executor that
//! turn a loaded configuration into executed steps.

pub mod connection_binding;
pub mod dag;
pub mod error;
pub mod executor;
pub mod file_dependencies;
pub mod run;
pub mod step_instance;

pub use connection_binding::{bind_connections, BoundConnections};
pub use dag::{parents_ready, DagError, JobQuota, TaskState, WorkflowGraph};
pub use error::{
    CancellationError, EngineError, EnvironmentError, ExecutionError, IntegrityError,
    PreflightError, RunError,
};
pub use executor::{apply_volatile_policy, ExecutorOptions, ExecutorOutcome, RunExecutor};
pub use file_dependencies::FileDependencies;
pub use run::Run;
pub use step_instance::StepInstance;
