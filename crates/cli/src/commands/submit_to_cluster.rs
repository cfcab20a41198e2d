// SPDX-License-Identifier: MIT

//! `flowcell submit-to-cluster` — write a submit script per run and invoke
//! the configured cluster command (`spec.md` §6: `submit-to-cluster
//! [--cluster <name>|auto] [--legacy] [--force] [--ignore] [run …]`).
//!
//! Composing the cluster-specific submit command (Slurm/SGE/whatever
//! `--cluster` names) is explicitly out of scope (`spec.md` §1: "cluster
//! adapter command generation"); this only does the part `spec.md` §4.7
//! does describe: "the engine only produces a submit script and learns a
//! job id". Everything past that script's first line is the adapter's job.

use super::workflow::Workflow;
use anyhow::{bail, Result};
use flowcell_storage::ping::{queued_ping_path, write_queued_ping};
use flowcell_storage::QueuedPing;

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub cluster: Option<String>,
    pub legacy: bool,
    pub force: bool,
    pub ignore: bool,
}

/// Write `.submit-<step>.sh` for every run and its queued ping, without
/// invoking any actual cluster submit command — doing so requires the
/// cluster-specific adapter this crate doesn't implement.
pub fn run(workflow: &Workflow, options: &SubmitOptions) -> Result<Vec<String>> {
    if options.cluster.as_deref() == Some("auto") {
        bail!(
            "cluster auto-detection requires a cluster adapter, which is outside this engine's scope"
        );
    }

    let mut written = Vec::new();
    for name in workflow.graph.steps() {
        let Some(step) = workflow.steps.get(name) else {
            continue;
        };
        let script_path = step.output_dir.join(format!(".submit-{name}.sh"));
        let mut script = String::from("#!/bin/sh\nset -e\n");
        for run in step.runs() {
            script.push_str(&format!("# {}\n", run.task_id()));
            let queued = queued_ping_path(&run.output_dir, run.run_id.as_str());
            write_queued_ping(
                &queued,
                &QueuedPing {
                    cluster_job_id: None,
                },
            )?;
        }
        std::fs::create_dir_all(&step.output_dir)?;
        std::fs::write(&script_path, script)?;
        written.push(script_path.display().to_string());
    }
    if options.legacy {
        tracing::warn!("--legacy submit format requested but no legacy adapter is registered");
    }
    Ok(written)
}
