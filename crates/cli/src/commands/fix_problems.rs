// SPDX-License-Identifier: MIT

//! `flowcell fix-problems` — clear stale heartbeats and other recoverable
//! on-disk problems (`spec.md` §6: `fix-problems [--cluster]
//! [--first-error] [--file-modification-date] [--details] [--srsly]`;
//! `spec.md` §8 E2E-6: a stale executing ping must be removable so a
//! subsequent `run-locally --force` starts cleanly).

use super::workflow::Workflow;
use anyhow::Result;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default)]
pub struct FixOptions {
    pub details: bool,
    /// `--srsly`: actually perform the fix; without it, only report.
    pub srsly: bool,
}

pub struct FixReport {
    pub task_id: String,
    pub problem: String,
    pub fixed: bool,
}

pub fn run(workflow: &Workflow, options: FixOptions) -> Result<Vec<FixReport>> {
    let now = SystemTime::now();
    let mut reports = Vec::new();

    for name in workflow.graph.steps() {
        let Some(step) = workflow.steps.get(name) else {
            continue;
        };
        for run in step.runs() {
            let executing_path =
                flowcell_storage::executing_ping_path(&run.output_dir, run.run_id.as_str());
            let mtime = flowcell_storage::ping::executing_ping_mtime(&executing_path)?;
            let Some(mtime) = mtime else { continue };
            let age = now.duration_since(mtime).unwrap_or_default();
            if age <= flowcell_storage::PING_TIMEOUT {
                continue;
            }

            let mut fixed = false;
            if options.srsly {
                flowcell_storage::ping::mark_bad(&executing_path, now, options.details)?;
                fixed = true;
            }
            reports.push(FixReport {
                task_id: run.task_id().to_string(),
                problem: format!("stale executing ping ({}s old)", age.as_secs()),
                fixed,
            });
        }
    }
    Ok(reports)
}
