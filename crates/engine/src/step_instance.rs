// SPDX-License-Identifier: MIT

//! `StepInstance` — a configured, connection-bound instantiation of a step
//! kind within one workflow (`spec.md` §9 "abstract step", minus
//! `declare_runs`/`require_tools`, which are supplied by the engine's
//! per-kind implementation once a `StepInstance` exists to declare runs on).

use crate::connection_binding::BoundConnections;
use crate::run::Run;
use flowcell_config::StepKindDescriptor;
use flowcell_core::{RunId, StepName};
use indexmap::IndexMap;
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::PathBuf;

/// Caps how many "required output connection never produced" warnings one
/// step emits, so a workflow with many steps missing the same kind of output
/// doesn't flood the log (documented Open Question resolution, `DESIGN.md`).
const MAX_UNSATISFIED_OUTPUT_WARNINGS: usize = 5;

pub struct StepInstance {
    pub name: StepName,
    pub kind: String,
    pub options: IndexMap<String, Value>,
    pub descriptor: StepKindDescriptor,
    pub parents: Vec<StepName>,
    pub connections: BoundConnections,
    pub output_dir: PathBuf,
    runs: IndexMap<RunId, Run>,
    finalized: bool,
}

impl StepInstance {
    pub fn new(
        name: StepName,
        kind: String,
        options: IndexMap<String, Value>,
        descriptor: StepKindDescriptor,
        parents: Vec<StepName>,
        connections: BoundConnections,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            name,
            kind,
            options,
            descriptor,
            parents,
            connections,
            output_dir,
            runs: IndexMap::new(),
            finalized: false,
        }
    }

    /// Declare (or fetch) the run with this id, creating it on first call
    /// (`abstract_step.py::add_run`/`get_run`).
    pub fn declare_run(&mut self, run_id: RunId) -> &mut Run {
        let output_dir = self.output_dir.clone();
        let step_name = self.name.clone();
        self.runs
            .entry(run_id.clone())
            .or_insert_with(|| Run::new(step_name, run_id, output_dir))
    }

    pub fn get_run(&self, run_id: &RunId) -> Option<&Run> {
        self.runs.get(run_id)
    }

    pub fn get_run_mut(&mut self, run_id: &RunId) -> Option<&mut Run> {
        self.runs.get_mut(run_id)
    }

    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    pub fn run_ids(&self) -> impl Iterator<Item = &RunId> {
        self.runs.keys()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Once every run has been declared, no further `declare_run` calls are
    /// expected; downstream steps may now bind against this step's outputs.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Supplemented feature 2: a one-line run-count summary per step
    /// (`subcommands/run_info.py::get_run_info_str`).
    pub fn run_info_str(&self) -> String {
        format!("{}: {} run(s)", self.name, self.runs.len())
    }

    /// Supplemented feature 2, full form: tally run states the way `uap`'s
    /// `get_run_info_str` reports them after a step completes ("N finished,
    /// M bad, ..."), derived from each run's annotation and ping files.
    pub fn run_state_summary(&self) -> String {
        let now = std::time::SystemTime::now();
        let mut counts: IndexMap<&'static str, usize> = IndexMap::new();
        for run in self.runs.values() {
            let label = classify_run_state_label(run, now);
            *counts.entry(label).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return format!("{}: no runs", self.name);
        }
        let tally = counts
            .iter()
            .map(|(label, n)| format!("{n} {label}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}: {}", self.name, tally)
    }

    /// Required (non-optional) output connections this step has never
    /// produced a run for. Logged as a deprecation warning, not a hard
    /// error, and capped at [`MAX_UNSATISFIED_OUTPUT_WARNINGS`] entries.
    pub fn check_required_out_connections(&self) -> Vec<String> {
        let produced: HashSet<&str> = self
            .runs
            .values()
            .flat_map(|run| run.output_files.keys().map(String::as_str))
            .collect();

        let mut missing = Vec::new();
        for connection in &self.descriptor.connections {
            if connection.direction() == flowcell_config::Direction::Out
                && !connection.optional
                && !produced.contains(connection.name.as_str())
            {
                if missing.len() >= MAX_UNSATISFIED_OUTPUT_WARNINGS {
                    tracing::warn!(
                        step = %self.name,
                        "further unsatisfied output connections suppressed"
                    );
                    break;
                }
                tracing::warn!(
                    step = %self.name,
                    connection = %connection.name,
                    "required output connection never produced"
                );
                missing.push(connection.name.clone());
            }
        }
        missing
    }
}

/// Best-effort state label for one run, read straight off disk via
/// [`crate::dag::classify_task_state`].
fn classify_run_state_label(run: &Run, now: std::time::SystemTime) -> &'static str {
    match crate::dag::classify_task_state(run, now) {
        crate::dag::TaskState::Waiting => "waiting",
        crate::dag::TaskState::Ready => "ready",
        crate::dag::TaskState::Queued => "queued",
        crate::dag::TaskState::Executing => "executing",
        crate::dag::TaskState::Finished => "finished",
        crate::dag::TaskState::Changed => "changed",
        crate::dag::TaskState::Volatilized => "volatilized",
        crate::dag::TaskState::Bad => "bad",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcell_config::ConnectionSpec;

    fn descriptor() -> StepKindDescriptor {
        StepKindDescriptor {
            name: "bwa_mem",
            options: vec![],
            connections: vec![
                ConnectionSpec::new("in/reads").expect("spec"),
                ConnectionSpec::new("out/alignment").expect("spec"),
                ConnectionSpec::new("out/log").expect("spec").optional(),
            ],
        }
    }

    fn instance(output_dir: PathBuf) -> StepInstance {
        StepInstance::new(
            StepName::new("align"),
            "bwa_mem".to_string(),
            IndexMap::new(),
            descriptor(),
            vec![],
            BoundConnections::default(),
            output_dir,
        )
    }

    #[test]
    fn declare_run_is_idempotent_per_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut step = instance(dir.path().to_path_buf());
        step.declare_run(RunId::new("r1"));
        step.declare_run(RunId::new("r1"));
        assert_eq!(step.run_count(), 1);
    }

    #[test]
    fn required_out_connection_never_produced_is_flagged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut step = instance(dir.path().to_path_buf());
        step.declare_run(RunId::new("r1"));
        let missing = step.check_required_out_connections();
        assert_eq!(missing, vec!["out/alignment".to_string()]);
    }

    #[test]
    fn producing_the_output_clears_the_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut step = instance(dir.path().to_path_buf());
        let deps = crate::file_dependencies::FileDependencies::new();
        step.declare_run(RunId::new("r1"))
            .add_output_file("out/alignment", "result.bam", vec![], &deps)
            .expect("add output");
        assert!(step.check_required_out_connections().is_empty());
    }

    #[test]
    fn run_state_summary_counts_waiting_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut step = instance(dir.path().to_path_buf());
        step.declare_run(RunId::new("r1"));
        step.declare_run(RunId::new("r2"));
        assert_eq!(step.run_state_summary(), "align: 2 waiting");
    }

    #[test]
    fn run_state_summary_reports_no_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let step = instance(dir.path().to_path_buf());
        assert_eq!(step.run_state_summary(), "align: no runs");
    }

    #[test]
    fn run_info_str_reports_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut step = instance(dir.path().to_path_buf());
        step.declare_run(RunId::new("r1"));
        step.declare_run(RunId::new("r2"));
        assert_eq!(step.run_info_str(), "align: 2 run(s)");
    }
}
