// SPDX-License-Identifier: MIT
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flowcell-config: configuration loading, option/connection declarations,
//! and the step-kind registry.

pub mod connection;
pub mod error;
pub mod manifest;
pub mod options;
pub mod registry;

pub use connection::{ConnectTarget, ConnectionSpec, Direction};
pub use error::{ConfigurationError, ConnectionError};
pub use manifest::{Configuration, StepDef, ToolConfig};
pub use options::{OptionSpec, OptionType, UNDERSCORE_OPTIONS};
pub use registry::{StepKind, StepKindDescriptor, StepRegistry};
