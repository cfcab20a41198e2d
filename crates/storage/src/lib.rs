// SPDX-License-Identifier: MIT
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flowcell-storage: the annotation store, ping/heartbeat protocol, and
//! volatile placeholder layer.

pub mod annotation;
pub mod error;
pub mod ping;
pub mod volatile;

pub use annotation::{annotation_path, Annotation, OutputsCheck, ProcessRecord, WatcherSummary};
pub use error::StorageError;
pub use ping::{
    classify_ping, executing_ping_path, queued_ping_path, spawn_heartbeat, ExecutingPing,
    HeartbeatHandle, PingPhase, QueuedPing, PING_RENEW, PING_TIMEOUT,
};
pub use volatile::{
    is_volatilized, placeholder_path, revive, volatilize, VolatilePlaceholder, VOLATILE_SUFFIX,
};
