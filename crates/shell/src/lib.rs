// SPDX-License-Identifier: MIT
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flowcell-shell: the process pool that launches `ExecGroup` members,
//! wires OS-pipe pipelines, samples resource usage, and propagates
//! cancellation signals.

pub mod error;
pub mod process_pool;
pub mod signals;
pub mod watcher;

pub use error::ShellError;
pub use process_pool::{
    CommandInfo, ExecGroup, GroupOutcome, PipelineInfo, PipelineMember, PipelineOutcome,
    ProcessOutcome, ProcessPool,
};
pub use signals::CancellationToken;
pub use watcher::{spawn_watcher, sum_stats, ProcessStats, WatcherHandle};
