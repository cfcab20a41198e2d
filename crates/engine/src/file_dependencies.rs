// SPDX-License-Identifier: MIT

//! The process-wide file dependency table (`spec.md` §4.1 / §9 "Dynamic
//! module-sized resolution"): `file_dependencies[output_path] = [input_paths...]`
//! plus the reverse `task_for_output_file[output_path] = task_id` index, both
//! keyed by absolute path across every step in the workflow, not just one
//! step's own runs. Grounded on `abstract_step.py`'s
//! `get_run_ids_in_connections_input_files`, which walks exactly these two
//! structures to resolve a child step's inputs back to the run that produced
//! them.

use flowcell_core::TaskId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Default)]
struct Inner {
    file_dependencies: HashMap<PathBuf, Vec<PathBuf>>,
    task_for_output_file: HashMap<PathBuf, TaskId>,
}

/// Shared across every step instance in a workflow; cheap to clone via
/// `Arc` at the call site since the mutex only ever guards short critical
/// sections.
#[derive(Default)]
pub struct FileDependencies {
    inner: Mutex<Inner>,
}

impl FileDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task` produced `output_path` from `input_paths`.
    pub fn record_output(&self, task: TaskId, output_path: PathBuf, input_paths: Vec<PathBuf>) {
        let mut inner = self.inner.lock();
        inner.task_for_output_file.insert(output_path.clone(), task);
        inner.file_dependencies.insert(output_path, input_paths);
    }

    /// The input paths an output file was built from, if it's a known
    /// output of some task.
    pub fn inputs_of(&self, output_path: &Path) -> Option<Vec<PathBuf>> {
        self.inner.lock().file_dependencies.get(output_path).cloned()
    }

    /// The task that produced `output_path`, if any.
    pub fn producing_task(&self, output_path: &Path) -> Option<TaskId> {
        self.inner.lock().task_for_output_file.get(output_path).cloned()
    }

    pub fn is_known_output(&self, path: &Path) -> bool {
        self.inner.lock().task_for_output_file.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_looks_up_output() {
        let deps = FileDependencies::new();
        let task = TaskId::new("align/r1");
        deps.record_output(
            task.clone(),
            PathBuf::from("/out/align/result.bam"),
            vec![PathBuf::from("/in/reads.fq")],
        );
        assert_eq!(
            deps.inputs_of(Path::new("/out/align/result.bam")),
            Some(vec![PathBuf::from("/in/reads.fq")])
        );
        assert_eq!(
            deps.producing_task(Path::new("/out/align/result.bam")),
            Some(task)
        );
    }

    #[test]
    fn unknown_output_returns_none() {
        let deps = FileDependencies::new();
        assert!(deps.inputs_of(Path::new("/nope")).is_none());
        assert!(!deps.is_known_output(Path::new("/nope")));
    }
}
