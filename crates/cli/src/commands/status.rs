// SPDX-License-Identifier: MIT

//! `flowcell status` — per-task state report (`spec.md` §6: `status
//! [--cluster] [--details] [--job-ids] [--summarize] [--graph] [--hash]
//! [--sources] [run …]`).

use super::workflow::Workflow;
use std::fmt::Write as _;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOptions {
    pub details: bool,
    pub job_ids: bool,
    pub summarize: bool,
    pub hash: bool,
    pub sources: bool,
}

/// One task's observed state, read straight off disk the same way
/// `StepInstance::run_state_summary` does, but kept separate so `status`
/// can distinguish a stale heartbeat from an ordinary BAD run (`spec.md`
/// §8 E2E-6: `status` must report `BAD (stale)`).
fn classify(output_dir: &std::path::Path, run_id: &str, now: SystemTime) -> String {
    if let Ok(Some(doc)) = flowcell_storage::annotation::read_annotation(output_dir, run_id) {
        if doc.error.is_some() {
            return "BAD".to_string();
        }
        return match doc.outputs_check() {
            flowcell_storage::OutputsCheck::Verified => "FINISHED".to_string(),
            flowcell_storage::OutputsCheck::Changed => "CHANGED".to_string(),
            flowcell_storage::OutputsCheck::Missing => "BAD".to_string(),
        };
    }
    let executing_path = flowcell_storage::executing_ping_path(output_dir, run_id);
    if let Ok(Some(mtime)) = flowcell_storage::ping::executing_ping_mtime(&executing_path) {
        let age = now.duration_since(mtime).unwrap_or_default();
        return if age <= flowcell_storage::PING_TIMEOUT {
            "EXECUTING".to_string()
        } else {
            "BAD (stale)".to_string()
        };
    }
    let queued_path = flowcell_storage::queued_ping_path(output_dir, run_id);
    if queued_path.exists() {
        return "QUEUED".to_string();
    }
    "WAITING".to_string()
}

pub fn run(workflow: &Workflow, options: StatusOptions) -> String {
    let now = SystemTime::now();
    let mut out = String::new();

    if options.summarize {
        for name in workflow.graph.steps() {
            if let Some(step) = workflow.steps.get(name) {
                let _ = writeln!(out, "{}", step.run_state_summary());
            }
        }
        return out;
    }

    for name in workflow.graph.steps() {
        let Some(step) = workflow.steps.get(name) else {
            continue;
        };
        for run in step.runs() {
            let state = classify(&run.output_dir, run.run_id.as_str(), now);
            let _ = write!(out, "{} {}", run.task_id(), state);
            if options.hash {
                for entry in run.known_paths.values() {
                    if let Some(sha256) = &entry.sha256 {
                        let _ = write!(out, " sha256={sha256}");
                    }
                }
            }
            if options.sources {
                for inputs in run.output_files.values() {
                    for input_paths in inputs.values() {
                        for path in input_paths {
                            let _ = write!(out, " <- {}", path.display());
                        }
                    }
                }
            }
            if options.details {
                let _ = write!(out, " [{}]", run.annotation_path.display());
            }
            if options.job_ids {
                if let Some(job_id) = step.option("_cluster_job_id").and_then(|v| v.as_str()) {
                    let _ = write!(out, " job={job_id}");
                }
            }
            let _ = writeln!(out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_reports_waiting_with_no_state_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(classify(dir.path(), "r1", SystemTime::now()), "WAITING");
    }

    #[test]
    fn classify_reports_stale_executing_ping_as_bad_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = flowcell_storage::executing_ping_path(dir.path(), "r1");
        flowcell_storage::ping::write_executing_ping(
            &path,
            &flowcell_storage::ExecutingPing {
                start_time: SystemTime::now(),
                host: "h".to_string(),
                pid: 1,
                user: "u".to_string(),
                temp_directory: dir.path().to_path_buf(),
                cluster_job_id: None,
            },
        )
        .expect("write ping");
        let far_future = SystemTime::now() + flowcell_storage::PING_TIMEOUT * 2;
        assert_eq!(classify(dir.path(), "r1", far_future), "BAD (stale)");
    }
}
