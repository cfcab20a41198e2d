// SPDX-License-Identifier: MIT

//! DAG driver (`spec.md` §4.7): topological ordering over step dependencies,
//! the per-task state lattice, and the `_cluster_job_quota` concurrency
//! limiter.

use crate::run::Run;
use flowcell_core::StepName;
use flowcell_storage::{annotation, ping, OutputsCheck};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction as EdgeDirection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum DagError {
    #[error("dependency cycle detected involving step {step}")]
    Cycle { step: String },
}

/// The step-dependency graph: an edge `parent -> child` means `child`
/// depends on `parent` (`_depends`, or an explicit `_connect` reference).
#[derive(Default)]
pub struct WorkflowGraph {
    graph: DiGraph<StepName, ()>,
    index_of: HashMap<StepName, NodeIndex>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: StepName) -> NodeIndex {
        if let Some(&idx) = self.index_of.get(&step) {
            return idx;
        }
        let idx = self.graph.add_node(step.clone());
        self.index_of.insert(step, idx);
        idx
    }

    pub fn add_dependency(&mut self, child: &StepName, parent: &StepName) {
        let p = self.add_step(parent.clone());
        let c = self.add_step(child.clone());
        self.graph.add_edge(p, c, ());
    }

    /// Steps ordered so every parent precedes its children.
    pub fn topological_order(&self) -> Result<Vec<StepName>, DagError> {
        let order = toposort(&self.graph, None).map_err(|cycle| DagError::Cycle {
            step: self.graph[cycle.node_id()].to_string(),
        })?;
        Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }

    pub fn parents_of(&self, step: &StepName) -> Vec<StepName> {
        let Some(&idx) = self.index_of.get(step) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, EdgeDirection::Incoming)
            .map(|i| self.graph[i].clone())
            .collect()
    }

    pub fn children_of(&self, step: &StepName) -> Vec<StepName> {
        let Some(&idx) = self.index_of.get(step) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, EdgeDirection::Outgoing)
            .map(|i| self.graph[i].clone())
            .collect()
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepName> {
        self.graph.node_weights()
    }
}

/// Observable task states (`spec.md` §4.4/§4.7). `Waiting` through `Queued`
/// precede execution; `Finished`/`Volatilized` are the terminal-success
/// states a downstream task's readiness check accepts; `Changed` and `Bad`
/// are the terminal-failure states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Ready,
    Queued,
    Executing,
    Finished,
    Changed,
    Volatilized,
    Bad,
}

impl TaskState {
    pub fn is_terminal_success(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Volatilized)
    }

    pub fn is_terminal(self) -> bool {
        self.is_terminal_success() || matches!(self, TaskState::Changed | TaskState::Bad)
    }
}

/// A task is `Ready` once every parent task it depends on has reached a
/// terminal-success state (`spec.md` §4.7 readiness policy: "every input
/// file FINISHED-or-VOLATILIZED and all parent runs terminal-successful").
pub fn parents_ready<'a>(parent_states: impl IntoIterator<Item = &'a TaskState>) -> bool {
    parent_states
        .into_iter()
        .all(|state| state.is_terminal_success())
}

/// Derive a run's observable `TaskState` from its on-disk annotation and
/// ping files — the single classification every status-like reader
/// (`status`, `StepInstance::run_state_summary`) should build on, so a hash
/// mismatch surfaces as `Changed` everywhere instead of being folded into
/// `Bad` (`spec.md` §4.4/§4.5).
pub fn classify_task_state(run: &Run, now: SystemTime) -> TaskState {
    if let Ok(Some(doc)) = annotation::read_annotation(&run.output_dir, run.run_id.as_str()) {
        if doc.error.is_some() {
            return TaskState::Bad;
        }
        return match doc.outputs_check() {
            OutputsCheck::Verified => TaskState::Finished,
            OutputsCheck::Changed => TaskState::Changed,
            OutputsCheck::Missing => TaskState::Bad,
        };
    }
    let executing_path = ping::executing_ping_path(&run.output_dir, run.run_id.as_str());
    if let Ok(Some(mtime)) = ping::executing_ping_mtime(&executing_path) {
        let age = now.duration_since(mtime).unwrap_or_default();
        return if age <= ping::PING_TIMEOUT {
            TaskState::Executing
        } else {
            TaskState::Bad
        };
    }
    let queued_path = ping::queued_ping_path(&run.output_dir, run.run_id.as_str());
    if queued_path.exists() {
        return TaskState::Queued;
    }
    TaskState::Waiting
}

/// Per-step concurrency limiter derived from `_cluster_job_quota`
/// (`spec.md` §4.2): `0` means unlimited.
#[derive(Clone)]
pub struct JobQuota {
    semaphore: Option<Arc<Semaphore>>,
}

impl JobQuota {
    pub fn new(quota: u32) -> Self {
        Self {
            semaphore: if quota == 0 {
                None
            } else {
                Some(Arc::new(Semaphore::new(quota as usize)))
            },
        }
    }

    /// Acquire a slot, blocking if the quota is currently exhausted. Returns
    /// `None` for an unlimited quota (nothing to hold).
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.semaphore {
            #[allow(clippy::expect_used)]
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("quota semaphore is never closed"),
            ),
            None => None,
        }
    }
}
