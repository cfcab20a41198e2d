// SPDX-License-Identifier: MIT

//! One module per subcommand (`spec.md` §6 CLI surface), plus the shared
//! [`workflow`] loader every one of them builds on.

pub mod fix_problems;
pub mod render;
pub mod run_info;
pub mod run_locally;
pub mod status;
pub mod steps;
pub mod submit_to_cluster;
pub mod volatilize;
pub mod workflow;

use flowcell_config::{Configuration, StepRegistry};

/// Flags shared by every subcommand (`spec.md` §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFlags {
    pub even_if_dirty: bool,
    pub no_tool_checks: bool,
    pub verbose: bool,
    pub debugging: bool,
    pub profiling: bool,
}

/// Load the configuration and build the workflow, the common prelude to
/// every subcommand below. No concrete step kinds are registered here:
/// tool-specific `declare_runs`/`require_tools` behavior lives outside this
/// crate's scope (`spec.md` §1), so every loaded step starts with zero
/// declared runs until something registers real kinds into the registry
/// this function is handed.
pub fn load_workflow(
    config_path: &std::path::Path,
    registry: &StepRegistry,
) -> anyhow::Result<(Configuration, workflow::Workflow)> {
    use anyhow::Context;
    let config = Configuration::load_from_file(config_path)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let built = workflow::build(&config, registry)?;
    Ok((config, built))
}
