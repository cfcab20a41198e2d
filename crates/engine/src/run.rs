// SPDX-License-Identifier: MIT

//! The `Run` type (`spec.md` §3 DATA MODEL): one execution attempt of a
//! step, identified by a `run_id` unique within its step. Not grounded on a
//! Python original — `run.py` was not among the files kept under
//! `original_source/` — so its shape follows `spec.md` §3 directly.

use crate::error::RunError;
use crate::file_dependencies::FileDependencies;
use flowcell_core::known_paths::KnownPathEntry;
use flowcell_core::{RunId, StepName, TaskId};
use flowcell_shell::ExecGroup;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// One execution attempt of a step.
pub struct Run {
    pub step_name: StepName,
    pub run_id: RunId,
    /// `<destination>/<step_name>` (`spec.md` §3 directory triple).
    pub output_dir: PathBuf,
    /// `<output_dir>/temp-<run_id>-<timestamp>`, set once [`Run::create_temp_dir`]
    /// has succeeded.
    pub temp_dir: Option<PathBuf>,
    /// `<output_dir>/.<run_id>.annotation.yaml`.
    pub annotation_path: PathBuf,
    /// `output_files[connection][basename] = input_paths`, the lineage used
    /// to populate `file_dependencies` and the annotation.
    pub output_files: IndexMap<String, IndexMap<String, Vec<PathBuf>>>,
    /// Ordered list of pipe-or-command groups; groups run sequentially,
    /// members within a group run concurrently (`spec.md` §4.3).
    pub exec_groups: Vec<ExecGroup>,
    /// Key/value strings readable by downstream runs, e.g. `"paired_end"`.
    pub public_info: IndexMap<String, String>,
    /// Opaque per-run scratch, not interpreted by the engine.
    pub private_info: serde_yaml::Value,
    /// `known_paths[abs_path] = { designation, label, type, size?, mtime?,
    /// sha256?, real_path? }`.
    pub known_paths: IndexMap<PathBuf, KnownPathEntry>,
}

impl Run {
    pub fn new(step_name: StepName, run_id: RunId, output_dir: PathBuf) -> Self {
        let annotation_path = flowcell_storage::annotation_path(&output_dir, run_id.as_str());
        Self {
            step_name,
            run_id,
            output_dir,
            temp_dir: None,
            annotation_path,
            output_files: IndexMap::new(),
            exec_groups: Vec::new(),
            public_info: IndexMap::new(),
            private_info: serde_yaml::Value::Null,
            known_paths: IndexMap::new(),
        }
    }

    /// The globally unique `"<step>/<run>"` identifier (invariant 3).
    pub fn task_id(&self) -> TaskId {
        self.step_name.task_id(&self.run_id)
    }

    /// Declare one output file on `connection`, recording its lineage in
    /// `known_paths` and in the shared [`FileDependencies`] index. Fails if
    /// `basename` is already declared on this run (basenames are unique
    /// within a run, `spec.md` §3 invariant 2).
    pub fn add_output_file(
        &mut self,
        connection: &str,
        basename: &str,
        input_paths: Vec<PathBuf>,
        deps: &FileDependencies,
    ) -> Result<PathBuf, RunError> {
        let bucket = self
            .output_files
            .entry(connection.to_string())
            .or_default();
        if bucket.contains_key(basename) {
            return Err(RunError::DuplicateOutputBasename {
                task_id: self.task_id().to_string(),
                connection: connection.to_string(),
                basename: basename.to_string(),
            });
        }
        bucket.insert(basename.to_string(), input_paths.clone());

        let output_path = self.output_path(basename);
        self.known_paths
            .insert(output_path.clone(), KnownPathEntry::output(basename));
        deps.record_output(self.task_id(), output_path.clone(), input_paths);
        Ok(output_path)
    }

    /// Record a path this run reads from, for the annotation's `known_paths`
    /// table. A no-op if the path is already known (an output re-declared as
    /// an input keeps its original designation).
    pub fn add_input_file(&mut self, path: PathBuf, label: impl Into<String>) {
        self.known_paths
            .entry(path)
            .or_insert_with(|| KnownPathEntry::input(label));
    }

    pub fn add_exec_group(&mut self, group: ExecGroup) {
        self.exec_groups.push(group);
    }

    pub fn set_public_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.public_info.insert(key.into(), value.into());
    }

    pub fn get_public_info(&self, key: &str) -> Option<&String> {
        self.public_info.get(key)
    }

    /// Final output path for `basename`, in `output_dir`.
    pub fn output_path(&self, basename: &str) -> PathBuf {
        self.output_dir.join(basename)
    }

    /// Path `basename` would have inside the run's temp directory, if one
    /// has been created.
    pub fn temp_output_path(&self, basename: &str) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|dir| dir.join(basename))
    }

    fn temp_dir_path(&self, timestamp: u64) -> PathBuf {
        self.output_dir
            .join(format!("temp-{}-{}", self.run_id, timestamp))
    }

    /// Create the run's exclusive temp directory (`spec.md` §3: "created
    /// exclusive-new"). Fails with [`RunError::TempDirExists`] if a
    /// concurrent run of the same id somehow raced us here.
    pub fn create_temp_dir(&mut self, timestamp: u64) -> Result<PathBuf, RunError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.temp_dir_path(timestamp);
        std::fs::create_dir(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                RunError::TempDirExists {
                    task_id: self.task_id().to_string(),
                    path: path.display().to_string(),
                }
            } else {
                RunError::Io(source)
            }
        })?;
        self.temp_dir = Some(path.clone());
        Ok(path)
    }

    /// Every basename this run has declared as an output, across all
    /// connections.
    pub fn declared_output_basenames(&self) -> impl Iterator<Item = &str> {
        self.output_files
            .values()
            .flat_map(|bucket| bucket.keys().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run(output_dir: &Path) -> Run {
        Run::new(
            StepName::new("align"),
            RunId::new("r1"),
            output_dir.to_path_buf(),
        )
    }

    #[test]
    fn add_output_file_records_known_path_and_lineage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let deps = FileDependencies::new();
        let mut run = sample_run(dir.path());
        let path = run
            .add_output_file(
                "out/alignment",
                "result.bam",
                vec![PathBuf::from("/in/reads.fq")],
                &deps,
            )
            .expect("add output");
        assert_eq!(path, dir.path().join("result.bam"));
        assert!(run.known_paths.contains_key(&path));
        assert_eq!(
            deps.inputs_of(&path),
            Some(vec![PathBuf::from("/in/reads.fq")])
        );
        assert_eq!(deps.producing_task(&path), Some(run.task_id()));
    }

    #[test]
    fn duplicate_basename_on_same_run_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let deps = FileDependencies::new();
        let mut run = sample_run(dir.path());
        run.add_output_file("out/alignment", "result.bam", vec![], &deps)
            .expect("first add");
        let err = run
            .add_output_file("out/alignment", "result.bam", vec![], &deps)
            .unwrap_err();
        assert!(matches!(err, RunError::DuplicateOutputBasename { .. }));
    }

    #[test]
    fn create_temp_dir_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = sample_run(dir.path());
        run.create_temp_dir(1000).expect("first create");
        let mut run2 = sample_run(dir.path());
        let err = run2.create_temp_dir(1000).unwrap_err();
        assert!(matches!(err, RunError::TempDirExists { .. }));
    }

    #[test]
    fn public_info_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = sample_run(dir.path());
        run.set_public_info("paired_end", "true");
        assert_eq!(run.get_public_info("paired_end"), Some(&"true".to_string()));
    }
}
