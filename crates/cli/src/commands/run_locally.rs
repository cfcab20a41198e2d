// SPDX-License-Identifier: MIT

//! `flowcell run-locally` — drive every ready run through the executor on
//! this host (`spec.md` §6: `run-locally [--force] [--ignore] [run …]`).

use super::workflow::Workflow;
use super::GlobalFlags;
use anyhow::Result;
use flowcell_core::SystemClock;
use flowcell_engine::{ExecutorOptions, ExecutorOutcome, RunExecutor};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunLocallyOptions {
    /// `--force`: run even over a non-empty final directory.
    pub force: bool,
    /// `--ignore`: keep going past a BAD run instead of stopping the batch.
    pub ignore: bool,
}

/// One line of CLI-facing output per run, matching `spec.md` §7's
/// "single trailing `[OK]`/`[BAD]` line" shape.
pub struct RunReport {
    pub line: String,
    pub failed: bool,
}

pub async fn run(
    workflow: &mut Workflow,
    flags: GlobalFlags,
    options: RunLocallyOptions,
) -> Result<Vec<RunReport>> {
    let executor = RunExecutor::new(SystemClock);
    let executor_options = ExecutorOptions {
        even_if_dirty: flags.even_if_dirty || options.force,
        debugging: flags.debugging,
        profiling: flags.profiling,
    };

    let order = workflow.order()?;
    let mut reports = Vec::new();

    for step_name in &order {
        let Some(step) = workflow.steps.get_mut(step_name) else {
            continue;
        };
        let run_ids: Vec<_> = step.run_ids().cloned().collect();
        for run_id in run_ids {
            let Some(run) = step.get_run_mut(&run_id) else {
                continue;
            };
            let task_id = run.task_id();
            let started = std::time::Instant::now();
            let outcome = executor.execute(run, executor_options).await;
            let elapsed = started.elapsed();

            let report = match outcome {
                Ok(ExecutorOutcome::AlreadyFinished(_)) => RunReport {
                    line: format!("[OK] {task_id} already FINISHED"),
                    failed: false,
                },
                Ok(ExecutorOutcome::Executed(doc)) if doc.error.is_none() => RunReport {
                    line: format!(
                        "[OK] {task_id} finished on {} after {}",
                        doc.host,
                        flowcell_core::format_elapsed(elapsed.as_secs())
                    ),
                    failed: false,
                },
                Ok(ExecutorOutcome::Executed(doc)) => RunReport {
                    line: format!(
                        "[BAD] {task_id} failed on {} after {}: {}",
                        doc.host,
                        flowcell_core::format_elapsed(elapsed.as_secs()),
                        doc.error.as_deref().unwrap_or("unknown error")
                    ),
                    failed: true,
                },
                Err(e) => RunReport {
                    line: format!(
                        "[BAD] {task_id} failed after {}: {e}",
                        flowcell_core::format_elapsed(elapsed.as_secs())
                    ),
                    failed: true,
                },
            };

            let failed = report.failed;
            reports.push(report);
            if failed && !options.ignore {
                return Ok(reports);
            }
        }
    }

    Ok(reports)
}
