// SPDX-License-Identifier: MIT

//! The run executor state machine (`spec.md` §4.4): preflight, heartbeat
//! arming, execution, integrity check, hashing, atomic rename, annotation
//! write, teardown. Grounded on `abstract_step.py::run`'s call sequence
//! (`declare_run` → `get_run` → spawn → `reset_fsc`) and the process-pool/
//! cancellation idioms in `flowcell-shell`.

use crate::error::{EngineError, ExecutionError, IntegrityError, PreflightError};
use crate::run::Run;
use flowcell_core::{Clock, FsCache};
use flowcell_storage::{annotation, ping, volatile};
use std::path::Path;

/// Bounds how many files are hashed concurrently in the integrity-check
/// phase (`spec.md` §4.4 step 5: "hashing, bounded by core count").
fn hashing_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Flags that alter executor behavior, surfaced on the CLI as
/// `--even-if-dirty`/`--debugging`/`--profiling` (`spec.md` §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorOptions {
    /// Skip the "is this run already FINISHED and verified" short-circuit.
    pub even_if_dirty: bool,
    /// Keep timestamped copies of ping files renamed to `.bad` for
    /// postmortem inspection (`spec.md` §4.4 step 2).
    pub debugging: bool,
    /// Reserved for future resource-profiling output; currently only
    /// widens what the process watcher records (`spec.md` §4.3).
    pub profiling: bool,
}

/// Outcome of driving one run through the executor.
pub enum ExecutorOutcome {
    /// The run was already `FINISHED` and verified; nothing was executed.
    AlreadyFinished(annotation::Annotation),
    /// The run executed (successfully or not) and wrote a fresh annotation.
    Executed(annotation::Annotation),
}

/// Drives a single [`Run`] through the full executor state machine.
pub struct RunExecutor<C: Clock> {
    clock: C,
    fsc: FsCache,
}

impl<C: Clock> RunExecutor<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            fsc: FsCache::new(),
        }
    }

    /// Run the full state machine for `run`, whose `exec_groups` and
    /// `output_files` have already been declared by the step kind's
    /// `declare_runs` behavior.
    pub async fn execute(
        &self,
        run: &mut Run,
        options: ExecutorOptions,
    ) -> Result<ExecutorOutcome, EngineError> {
        // --- Step 1: preflight -------------------------------------------------
        if !options.even_if_dirty {
            if let Some(existing) = self.check_already_finished(run)? {
                return Ok(ExecutorOutcome::AlreadyFinished(existing));
            }
        }
        self.preflight_ping_check(run, options.debugging)?;
        let queued_path = ping::queued_ping_path(&run.output_dir, run.run_id.as_str());
        let cluster_job_id = ping::read_queued_ping(&queued_path)
            .map_err(PreflightError::from)?
            .and_then(|queued| queued.cluster_job_id);
        let timestamp = self.clock.epoch_ms();
        let output_dir_display = run.output_dir.display().to_string();
        let temp_dir = run.create_temp_dir(timestamp).map_err(|e| {
            EngineError::Preflight(PreflightError::TempDirExists {
                path: output_dir_display,
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()),
            })
        })?;

        // --- Step 2: heartbeat / ping arm ---------------------------------------
        let executing_path = ping::executing_ping_path(&run.output_dir, run.run_id.as_str());
        ping::write_executing_ping(
            &executing_path,
            &ping::ExecutingPing {
                start_time: self.clock.now(),
                host: local_hostname(),
                pid: std::process::id(),
                user: local_user(),
                temp_directory: temp_dir.clone(),
                cluster_job_id: cluster_job_id.clone(),
            },
        )
        .map_err(PreflightError::from)?;
        let heartbeat = ping::spawn_heartbeat(executing_path.clone(), ping::PING_RENEW);

        let cancel = flowcell_shell::CancellationToken::new();
        #[cfg(unix)]
        let signal_handle = flowcell_shell::signals::install_signal_handlers(cancel.clone());

        // --- Step 3: execute -----------------------------------------------------
        let start_time = self.clock.now();
        let exec_result = self.run_exec_groups(run, &temp_dir, &cancel).await;
        let end_time = self.clock.now();

        heartbeat.stop().await;
        #[cfg(unix)]
        signal_handle.abort();

        let caught_signal = cancel.signal();
        let (processes, watcher, exec_error) = match exec_result {
            Ok((processes, watcher)) => (processes, watcher, None),
            Err(e) => (Vec::new(), annotation::WatcherSummary::default(), Some(e)),
        };

        let mut known_paths = run.known_paths.clone();

        // --- Step 4/5: integrity check + hashing ---------------------------------
        let integrity_result = if exec_error.is_none() {
            self.verify_and_hash_outputs(run, &temp_dir, &mut known_paths).await
        } else {
            Ok(())
        };

        // --- Step 6: atomic rename -------------------------------------------------
        let rename_result = if exec_error.is_none() && integrity_result.is_ok() {
            self.rename_outputs(run, &temp_dir, &mut known_paths)
        } else {
            Ok(())
        };

        ping::remove_executing_ping(&executing_path).map_err(PreflightError::from)?;

        let error_message = exec_error
            .as_ref()
            .map(|e| e.to_string())
            .or_else(|| integrity_result.as_ref().err().map(|e| e.to_string()))
            .or_else(|| rename_result.as_ref().err().map(|e| e.to_string()));

        // --- Step 7: annotation write ----------------------------------------------
        let doc = annotation::Annotation {
            step_name: run.step_name.as_str().to_string(),
            step_kind: run.step_name.as_str().to_string(),
            run_id: run.run_id.as_str().to_string(),
            start_time,
            end_time: Some(end_time),
            host: local_hostname(),
            cluster_job_id,
            watcher,
            processes,
            known_paths,
            error: error_message.clone(),
            caught_signal,
        };
        annotation::write_annotation(&run.output_dir, &doc).map_err(PreflightError::from)?;

        // --- Step 8: teardown --------------------------------------------------------
        if error_message.is_some() {
            ping::mark_bad(&queued_path, self.clock.now(), options.debugging)
                .map_err(PreflightError::from)?;
        } else {
            ping::remove_ping_file(&queued_path).map_err(PreflightError::from)?;
            let _ = std::fs::remove_dir(&temp_dir);
            let _ = std::fs::remove_dir(&run.output_dir);
        }
        self.fsc.clear();

        if let Some(e) = exec_error {
            return Err(e.into());
        }
        integrity_result?;
        rename_result?;

        Ok(ExecutorOutcome::Executed(doc))
    }

    fn check_already_finished(
        &self,
        run: &Run,
    ) -> Result<Option<annotation::Annotation>, EngineError> {
        let existing = annotation::read_annotation(&run.output_dir, run.run_id.as_str())
            .map_err(PreflightError::from)?;
        match existing {
            Some(doc) if doc.error.is_none() && doc.outputs_verified() => Ok(Some(doc)),
            _ => Ok(None),
        }
    }

    /// Reject a run whose executing-ping is still fresh; recover a stale one
    /// by marking it `.bad` (`spec.md` §4.4 step 1/2).
    fn preflight_ping_check(&self, run: &Run, debugging: bool) -> Result<(), EngineError> {
        let executing_path = ping::executing_ping_path(&run.output_dir, run.run_id.as_str());
        let mtime = ping::executing_ping_mtime(&executing_path).map_err(PreflightError::from)?;
        if let Some(mtime) = mtime {
            let now = self.clock.now();
            let age = now.duration_since(mtime).unwrap_or_default();
            if age <= ping::PING_TIMEOUT {
                return Err(EngineError::Preflight(PreflightError::AlreadyRunning {
                    task_id: run.task_id().to_string(),
                }));
            }
            ping::mark_bad(&executing_path, now, debugging).map_err(PreflightError::from)?;
        }
        Ok(())
    }

    async fn run_exec_groups(
        &self,
        run: &Run,
        temp_dir: &Path,
        cancel: &flowcell_shell::CancellationToken,
    ) -> Result<(Vec<annotation::ProcessRecord>, annotation::WatcherSummary), ExecutionError> {
        let pool = flowcell_shell::ProcessPool::new(temp_dir.to_path_buf(), cancel.clone());
        let mut records = Vec::new();
        let mut pid_stats: std::collections::HashMap<u32, flowcell_shell::ProcessStats> =
            std::collections::HashMap::new();

        for group in &run.exec_groups {
            let outcome = pool.run_group(group).await?;
            let pids = outcome.all_pids();
            let watcher = flowcell_shell::spawn_watcher(pids, flowcell_shell::watcher::SAMPLE_INTERVAL);

            for pipeline in &outcome.pipelines {
                for process in &pipeline.processes {
                    records.push(annotation::ProcessRecord {
                        argv: process.argv.clone(),
                        pid: process.pid,
                        start_time: process.start_time,
                        end_time: process.end_time,
                        exit_code: process.exit_code,
                        signal: process.signal,
                        stdout_bytes: process.stdout_bytes,
                        stdout_lines: process.stdout_lines,
                        stderr_bytes: process.stderr_bytes,
                        stderr_lines: process.stderr_lines,
                    });
                }
            }
            pid_stats.extend(watcher.stop().await);

            if !outcome.ok() {
                let failing = outcome
                    .pipelines
                    .iter()
                    .find(|p| !p.ok)
                    .and_then(|p| p.failure_index.map(|i| p.processes[i].argv.clone()))
                    .unwrap_or_default();
                return Err(ExecutionError::PipelineFailed {
                    task_id: run.task_id().to_string(),
                    argv: failing,
                });
            }
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancellation(
                    crate::error::CancellationError::Signalled {
                        task_id: run.task_id().to_string(),
                        signal: cancel.signal().unwrap_or(0),
                    },
                ));
            }
        }

        let sums = flowcell_shell::sum_stats(pid_stats.values());
        let watcher_summary = annotation::WatcherSummary {
            per_pid_max_cpu_percent: pid_stats
                .iter()
                .map(|(pid, s)| (*pid, s.max_cpu_percent))
                .collect(),
            per_pid_max_rss_bytes: pid_stats
                .iter()
                .map(|(pid, s)| (*pid, s.max_rss_bytes))
                .collect(),
            per_pid_max_memory_percent: pid_stats
                .iter()
                .map(|(pid, s)| (*pid, s.max_memory_percent))
                .collect(),
            sum_max_cpu_percent: sums.max_cpu_percent,
            sum_max_rss_bytes: sums.max_rss_bytes,
            sum_max_memory_percent: sums.max_memory_percent,
        };
        Ok((records, watcher_summary))
    }

    /// Step 4 (every announced output exists in the temp directory) and step
    /// 5 (SHA-256 hash every output, bounded by [`hashing_concurrency`]).
    async fn verify_and_hash_outputs(
        &self,
        run: &Run,
        temp_dir: &Path,
        known_paths: &mut indexmap::IndexMap<std::path::PathBuf, flowcell_core::KnownPathEntry>,
    ) -> Result<(), IntegrityError> {
        for basename in run.declared_output_basenames() {
            let temp_path = temp_dir.join(basename);
            if !temp_path.exists() {
                return Err(IntegrityError::AnnouncedOutputMissing {
                    task_id: run.task_id().to_string(),
                    basename: basename.to_string(),
                });
            }
        }

        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(hashing_concurrency()));
        let mut tasks = tokio::task::JoinSet::new();
        for basename in run.declared_output_basenames() {
            let temp_path = temp_dir.join(basename);
            let final_path = run.output_path(basename);
            let sem = semaphore.clone();
            tasks.spawn(async move {
                #[allow(clippy::expect_used)]
                let _permit = sem.acquire_owned().await.expect("hashing semaphore never closes");
                let sha256 = flowcell_core::sha256sum_of(&temp_path)?;
                let size = std::fs::metadata(&temp_path)?.len();
                let mtime = std::fs::metadata(&temp_path)?.modified()?;
                Ok::<_, std::io::Error>((final_path, temp_path, sha256, size, mtime))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (final_path, temp_path, sha256, size, mtime) = joined
                .map_err(|e| IntegrityError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))??;
            if let Some(entry) = known_paths.get_mut(&final_path) {
                entry.sha256 = Some(sha256);
                entry.size = Some(size);
                entry.mtime = Some(mtime);
                entry.real_path = Some(temp_path);
            }
        }
        Ok(())
    }

    /// Step 6: atomically rename every verified output from the temp
    /// directory into `output_dir`, updating `real_path` to the final
    /// location (`spec.md` §3 Non-goal: durability via atomic rename, not
    /// journaling).
    fn rename_outputs(
        &self,
        run: &Run,
        temp_dir: &Path,
        known_paths: &mut indexmap::IndexMap<std::path::PathBuf, flowcell_core::KnownPathEntry>,
    ) -> Result<(), IntegrityError> {
        for basename in run.declared_output_basenames() {
            let from = temp_dir.join(basename);
            let to = run.output_path(basename);
            let stale_placeholder = volatile::placeholder_path(&to);
            if stale_placeholder.exists() {
                std::fs::remove_file(&stale_placeholder).map_err(|source| {
                    IntegrityError::RenameFailed {
                        from: stale_placeholder.display().to_string(),
                        to: to.display().to_string(),
                        source,
                    }
                })?;
            }
            std::fs::rename(&from, &to).map_err(|source| IntegrityError::RenameFailed {
                from: from.display().to_string(),
                to: to.display().to_string(),
                source,
            })?;
            if let Some(entry) = known_paths.get_mut(&to) {
                entry.real_path = Some(to.clone());
            }
        }
        Ok(())
    }
}

/// Revive a volatilized output for re-consumption, or volatilize a fresh one
/// (`spec.md` §4.6), threading through the step's `_volatile` option.
pub fn apply_volatile_policy(path: &Path, volatile: bool, sha256: String, lineage: Vec<String>) -> Result<(), EngineError> {
    if volatile {
        volatile::volatilize(path, sha256, lineage).map_err(PreflightError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_dependencies::FileDependencies;
    use flowcell_core::{FakeClock, RunId, StepName};
    use flowcell_shell::{CommandInfo, ExecGroup, PipelineMember};

    fn echo_group(argv: Vec<&str>) -> ExecGroup {
        ExecGroup {
            members: vec![PipelineMember::Command(CommandInfo::new(
                argv.into_iter().map(String::from).collect(),
            ))],
        }
    }

    /// E2E-1-shaped: a single command that writes its one announced output.
    #[tokio::test]
    async fn single_command_run_publishes_verified_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        let deps = FileDependencies::new();
        run.add_output_file("out/raw", "a.txt", vec![], &deps)
            .expect("declare output");
        run.add_exec_group(echo_group(vec!["/bin/sh", "-c", "echo hi > a.txt"]));

        let executor = RunExecutor::new(FakeClock::new(1_000));
        let outcome = executor
            .execute(&mut run, ExecutorOptions::default())
            .await;
        let doc = match outcome.expect("execute should succeed") {
            ExecutorOutcome::Executed(doc) => doc,
            ExecutorOutcome::AlreadyFinished(_) => panic!("expected a fresh execution"),
        };
        assert!(doc.error.is_none());
        assert!(doc.outputs_verified());
        assert!(dir.path().join("a.txt").exists());
        let entry = doc.known_paths.get(&run.output_path("a.txt")).expect("known");
        assert!(entry.sha256.is_some());
    }

    /// E2E-3: the command never creates its announced output.
    #[tokio::test]
    async fn missing_announced_output_is_bad_with_no_published_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        let deps = FileDependencies::new();
        run.add_output_file("out/x", "foo.out", vec![], &deps)
            .expect("declare output");
        run.add_exec_group(echo_group(vec!["/bin/sh", "-c", "true"]));

        let executor = RunExecutor::new(FakeClock::new(1_000));
        let outcome = executor
            .execute(&mut run, ExecutorOptions::default())
            .await;
        assert!(outcome.is_err());
        assert!(!dir.path().join("foo.out").exists());
        let doc = annotation::read_annotation(&run.output_dir, "a")
            .expect("read annotation")
            .expect("annotation present");
        assert!(doc.error.is_some());
    }

    /// Invariant: a finished, verified run short-circuits re-execution
    /// unless `even_if_dirty` is set.
    #[tokio::test]
    async fn already_finished_run_short_circuits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        let deps = FileDependencies::new();
        run.add_output_file("out/raw", "a.txt", vec![], &deps)
            .expect("declare output");
        run.add_exec_group(echo_group(vec!["/bin/sh", "-c", "echo hi > a.txt"]));

        let executor = RunExecutor::new(FakeClock::new(1_000));
        executor
            .execute(&mut run, ExecutorOptions::default())
            .await
            .expect("first run succeeds");

        let mut second = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        second
            .add_output_file("out/raw", "a.txt", vec![], &deps)
            .expect("declare output again");
        let outcome = executor
            .execute(&mut second, ExecutorOptions::default())
            .await
            .expect("short circuit");
        assert!(matches!(outcome, ExecutorOutcome::AlreadyFinished(_)));
    }

    /// Spec §4.4 step 1/8: a queued ping's `cluster_job_id` is recovered
    /// into the annotation, and the queued ping itself is removed once the
    /// run finishes successfully.
    #[tokio::test]
    async fn queued_ping_cluster_job_id_is_recovered_and_removed_on_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        let deps = FileDependencies::new();
        run.add_output_file("out/raw", "a.txt", vec![], &deps)
            .expect("declare output");
        run.add_exec_group(echo_group(vec!["/bin/sh", "-c", "echo hi > a.txt"]));

        let queued_path = ping::queued_ping_path(&run.output_dir, "a");
        ping::write_queued_ping(
            &queued_path,
            &ping::QueuedPing {
                cluster_job_id: Some("job-7".to_string()),
            },
        )
        .expect("write queued ping");

        let executor = RunExecutor::new(FakeClock::new(1_000));
        let outcome = executor
            .execute(&mut run, ExecutorOptions::default())
            .await;
        let doc = match outcome.expect("execute should succeed") {
            ExecutorOutcome::Executed(doc) => doc,
            ExecutorOutcome::AlreadyFinished(_) => panic!("expected a fresh execution"),
        };
        assert_eq!(doc.cluster_job_id, Some("job-7".to_string()));
        assert!(!queued_path.exists());
    }

    /// Spec §4.4 step 8: a failed run renames the queued ping to `.bad`
    /// rather than deleting it.
    #[tokio::test]
    async fn queued_ping_is_marked_bad_on_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        let deps = FileDependencies::new();
        run.add_output_file("out/x", "foo.out", vec![], &deps)
            .expect("declare output");
        run.add_exec_group(echo_group(vec!["/bin/sh", "-c", "true"]));

        let queued_path = ping::queued_ping_path(&run.output_dir, "a");
        ping::write_queued_ping(&queued_path, &ping::QueuedPing { cluster_job_id: None })
            .expect("write queued ping");

        let executor = RunExecutor::new(FakeClock::new(1_000));
        let outcome = executor
            .execute(&mut run, ExecutorOptions::default())
            .await;
        assert!(outcome.is_err());
        assert!(!queued_path.exists());
        assert!(queued_path.with_extension("bad").exists());
    }

    /// Spec §4.4 step 8: a successful run's temp directory is cleaned up.
    #[tokio::test]
    async fn temp_dir_is_removed_after_successful_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = Run::new(StepName::new("s"), RunId::new("a"), dir.path().to_path_buf());
        let deps = FileDependencies::new();
        run.add_output_file("out/raw", "a.txt", vec![], &deps)
            .expect("declare output");
        run.add_exec_group(echo_group(vec!["/bin/sh", "-c", "echo hi > a.txt"]));

        let executor = RunExecutor::new(FakeClock::new(1_000));
        executor
            .execute(&mut run, ExecutorOptions::default())
            .await
            .expect("run executes");

        let leftover_temp_dirs = std::fs::read_dir(dir.path())
            .expect("read output dir")
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().starts_with("temp-"));
        assert!(!leftover_temp_dirs);
    }
}

