// SPDX-License-Identifier: MIT

//! Process pool: launches the members of an `ExecGroup`, wiring pipelines
//! through OS pipes and collecting exit status and stream statistics
//! (`spec.md` §4.3).

use crate::error::ShellError;
use crate::signals::{CancellationToken, KILL_GRACE};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Tail of captured output kept for error messages when a stream isn't
/// redirected to a file. Bounded so a chatty command can't exhaust memory.
const CAPTURE_TAIL_BYTES: usize = 8 * 1024;

/// A single external command: its argv plus optional stream redirects and
/// per-tool shell hook snippets (`module_load`/`pre_command`/`post_command`/
/// `module_unload`, supplemented feature 1 — the engine attaches these only
/// to the first/last command in a group that references a given tool).
#[derive(Debug, Clone, Default)]
pub struct CommandInfo {
    pub argv: Vec<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    /// If true, a non-zero exit is still reported but does not fail the
    /// enclosing pipeline/group.
    pub ok_to_fail: bool,
    pub module_load: Option<String>,
    pub pre_command: Option<String>,
    pub post_command: Option<String>,
    pub module_unload: Option<String>,
}

impl CommandInfo {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Default::default()
        }
    }
}

/// A chain of commands connected stdout-to-stdin via OS pipes.
#[derive(Debug, Clone, Default)]
pub struct PipelineInfo {
    pub commands: Vec<CommandInfo>,
}

/// One member of an `ExecGroup`: a bare command or a pipe chain.
#[derive(Debug, Clone)]
pub enum PipelineMember {
    Command(CommandInfo),
    Pipeline(PipelineInfo),
}

/// A group of members that run concurrently; groups within a run are
/// strictly sequential (`spec.md` §4.3).
#[derive(Debug, Clone, Default)]
pub struct ExecGroup {
    pub members: Vec<PipelineMember>,
}

/// Per-process outcome recorded for the annotation (`spec.md` §4.4 step 7).
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub argv: Vec<String>,
    pub pid: u32,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout_bytes: u64,
    pub stdout_lines: u64,
    pub stderr_bytes: u64,
    pub stderr_lines: u64,
}

impl ProcessOutcome {
    fn ok(&self, ok_to_fail: bool) -> bool {
        ok_to_fail || (self.exit_code == Some(0) && self.signal.is_none())
    }
}

/// Outcome of one pipeline (or single standalone command, modeled as a
/// one-member pipeline).
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub processes: Vec<ProcessOutcome>,
    pub ok: bool,
    /// Index into `processes` of the first member that failed, when `!ok`.
    pub failure_index: Option<usize>,
}

/// Outcome of a whole `ExecGroup`: one [`PipelineOutcome`] per member, in
/// declaration order (though they ran concurrently).
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    pub pipelines: Vec<PipelineOutcome>,
}

impl GroupOutcome {
    pub fn ok(&self) -> bool {
        self.pipelines.iter().all(|p| p.ok)
    }

    pub fn all_pids(&self) -> Vec<u32> {
        self.pipelines
            .iter()
            .flat_map(|p| p.processes.iter().map(|proc| proc.pid))
            .collect()
    }
}

/// Drives the members of one `ExecGroup` inside `cwd`.
pub struct ProcessPool {
    cwd: PathBuf,
    cancel: CancellationToken,
}

impl ProcessPool {
    pub fn new(cwd: PathBuf, cancel: CancellationToken) -> Self {
        Self { cwd, cancel }
    }

    /// Run every member of `group` concurrently; wait for all to finish (or
    /// for cancellation) before returning.
    pub async fn run_group(&self, group: &ExecGroup) -> Result<GroupOutcome, ShellError> {
        let mut set = tokio::task::JoinSet::new();
        for (idx, member) in group.members.iter().cloned().enumerate() {
            let cwd = self.cwd.clone();
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let outcome = run_member(&member, &cwd, &cancel).await;
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<PipelineOutcome>> = vec![None; group.members.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, outcome) = joined.map_err(|e| {
                ShellError::Wait {
                    argv: vec![],
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                }
            })?;
            slots[idx] = Some(outcome?);
        }

        let pipelines = slots
            .into_iter()
            .map(|slot| slot.expect("every member index is filled exactly once"))
            .collect();
        Ok(GroupOutcome { pipelines })
    }
}

async fn run_member(
    member: &PipelineMember,
    cwd: &Path,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, ShellError> {
    match member {
        PipelineMember::Command(cmd) => run_pipeline_commands(std::slice::from_ref(cmd), cwd, cancel).await,
        PipelineMember::Pipeline(pipeline) => {
            run_pipeline_commands(&pipeline.commands, cwd, cancel).await
        }
    }
}

/// Run a chain of commands, piping stdout of position *i* into stdin of
/// position *i+1*. A lone command is simply a chain of length one.
async fn run_pipeline_commands(
    commands: &[CommandInfo],
    cwd: &Path,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, ShellError> {
    let mut processes = Vec::with_capacity(commands.len());
    let mut failure_index = None;
    let mut upstream_stdout: Option<tokio::process::ChildStdout> = None;

    for (idx, cmd) in commands.iter().enumerate() {
        if let Some(snippet) = &cmd.module_load {
            run_hook_snippet(snippet, cwd).await?;
        }
        if let Some(snippet) = &cmd.pre_command {
            run_hook_snippet(snippet, cwd).await?;
        }

        let is_last = idx + 1 == commands.len();
        let mut command = Command::new(cmd.argv.first().map(String::as_str).unwrap_or(""));
        command.args(cmd.argv.iter().skip(1));
        command.current_dir(cwd);

        if let Some(stdout) = upstream_stdout.take() {
            let stdio: Stdio = stdout.try_into().map_err(ShellError::Pipe)?;
            command.stdin(stdio);
        }

        command.stdout(Stdio::piped());
        if let Some(path) = &cmd.stderr_path {
            command.stderr(open_truncated(path)?);
        } else {
            command.stderr(Stdio::piped());
        }

        let start_time = SystemTime::now();
        let mut child: Child = command.spawn().map_err(|source| ShellError::Spawn {
            argv: cmd.argv.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_path = cmd.stdout_path.clone();

        let stdout_task = drain_stdout(is_last, stdout_path, stdout_handle);
        let stderr_task = drain_stderr(stderr_handle);

        let (status, (stdout_bytes, stdout_lines, next_upstream), (stderr_bytes, stderr_lines)) =
            wait_and_drain(&mut child, stdout_task, stderr_task, cancel, &cmd.argv).await?;
        upstream_stdout = next_upstream;
        let end_time = SystemTime::now();

        if let Some(snippet) = &cmd.post_command {
            run_hook_snippet(snippet, cwd).await?;
        }
        if let Some(snippet) = &cmd.module_unload {
            run_hook_snippet(snippet, cwd).await?;
        }

        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal: Option<i32> = None;

        let outcome = ProcessOutcome {
            argv: cmd.argv.clone(),
            pid,
            start_time,
            end_time,
            exit_code: status.code(),
            signal,
            stdout_bytes,
            stdout_lines,
            stderr_bytes,
            stderr_lines,
        };

        if failure_index.is_none() && !outcome.ok(cmd.ok_to_fail) {
            failure_index = Some(idx);
        }
        processes.push(outcome);
    }

    Ok(PipelineOutcome {
        ok: failure_index.is_none(),
        failure_index,
        processes,
    })
}

/// Drain this command's stdout: redirect to a file, count it (if it's the
/// pipeline's last member with nothing to redirect to), or hand the raw
/// handle to the next command in the chain.
async fn drain_stdout(
    is_last: bool,
    stdout_path: Option<PathBuf>,
    stdout_handle: Option<ChildStdout>,
) -> Result<(u64, u64, Option<ChildStdout>), ShellError> {
    if is_last {
        if let Some(path) = &stdout_path {
            redirect_to_file(stdout_handle, path).await
        } else if let Some(stdout) = stdout_handle {
            let (bytes, lines, _tail) = count_stream(stdout).await?;
            Ok((bytes, lines, None))
        } else {
            Ok((0, 0, None))
        }
    } else {
        Ok((0, 0, stdout_handle))
    }
}

async fn drain_stderr(stderr_handle: Option<ChildStderr>) -> Result<(u64, u64), ShellError> {
    if let Some(stderr) = stderr_handle {
        let (bytes, lines, _tail) = count_stream(stderr).await?;
        Ok((bytes, lines))
    } else {
        Ok((0, 0))
    }
}

/// Wait for the child to exit while draining stdout and stderr concurrently
/// with each other and with the wait itself, so neither pipe's buffer can
/// stall the other and a cancellation doesn't have to wait for EOF on a
/// still-open pipe before reaping the child (`spec.md` §5 "killable at any
/// instant").
#[allow(clippy::type_complexity)]
async fn wait_and_drain<StdoutTask, StderrTask>(
    child: &mut Child,
    stdout_task: StdoutTask,
    stderr_task: StderrTask,
    cancel: &CancellationToken,
    argv: &[String],
) -> Result<
    (
        std::process::ExitStatus,
        (u64, u64, Option<ChildStdout>),
        (u64, u64),
    ),
    ShellError,
>
where
    StdoutTask: Future<Output = Result<(u64, u64, Option<ChildStdout>), ShellError>>,
    StderrTask: Future<Output = Result<(u64, u64), ShellError>>,
{
    tokio::pin!(stdout_task);
    tokio::pin!(stderr_task);

    tokio::select! {
        result = tokio::try_join!(wait_mapped(child, argv), &mut stdout_task, &mut stderr_task) => result,
        _ = cancel.cancelled() => {
            let signal = cancel.signal().unwrap_or(15);
            let _ = send_signal(child, signal);
            match tokio::time::timeout(
                KILL_GRACE,
                tokio::try_join!(wait_mapped(child, argv), &mut stdout_task, &mut stderr_task),
            )
            .await
            {
                Ok(result) => result,
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    tokio::try_join!(wait_mapped(child, argv), &mut stdout_task, &mut stderr_task)
                }
            }
        }
    }
}

async fn wait_mapped(
    child: &mut Child,
    argv: &[String],
) -> Result<std::process::ExitStatus, ShellError> {
    child
        .wait()
        .await
        .map_err(|source| ShellError::Wait { argv: argv.to_vec(), source })
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: i32) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        // unsafe_code is forbidden workspace-wide; shell out to `kill(1)`
        // instead of a raw libc call.
        let status = std::process::Command::new("kill")
            .arg(format!("-{signal}"))
            .arg(pid.to_string())
            .status();
        status.map(|_| ())
    } else {
        Ok(())
    }
}

#[cfg(not(unix))]
fn send_signal(_child: &Child, _signal: i32) -> std::io::Result<()> {
    Ok(())
}

fn open_truncated(path: &Path) -> Result<Stdio, ShellError> {
    let file = std::fs::File::create(path).map_err(|source| ShellError::Redirect {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Stdio::from(file))
}

async fn redirect_to_file(
    stdout: Option<tokio::process::ChildStdout>,
    path: &Path,
) -> Result<(u64, u64, Option<tokio::process::ChildStdout>), ShellError> {
    let Some(mut stdout) = stdout else {
        return Ok((0, 0, None));
    };
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| ShellError::Redirect {
            path: path.display().to_string(),
            source,
        })?;
    let mut total = 0u64;
    let mut lines = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = stdout
            .read(&mut buf)
            .await
            .map_err(|source| ShellError::Redirect {
                path: path.display().to_string(),
                source,
            })?;
        if n == 0 {
            break;
        }
        total += n as u64;
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        tokio::io::AsyncWriteExt::write_all(&mut file, &buf[..n])
            .await
            .map_err(|source| ShellError::Redirect {
                path: path.display().to_string(),
                source,
            })?;
    }
    Ok((total, lines, None))
}

/// Count bytes/lines of a stream that isn't redirected to a file, keeping
/// only the last [`CAPTURE_TAIL_BYTES`] for error reporting.
async fn count_stream(
    mut stream: impl tokio::io::AsyncRead + Unpin,
) -> Result<(u64, u64, String), ShellError> {
    let mut total = 0u64;
    let mut lines = 0u64;
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(ShellError::Pipe)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > CAPTURE_TAIL_BYTES {
            let excess = tail.len() - CAPTURE_TAIL_BYTES;
            tail.drain(0..excess);
        }
    }
    Ok((total, lines, String::from_utf8_lossy(&tail).into_owned()))
}

async fn run_hook_snippet(snippet: &str, cwd: &Path) -> Result<(), ShellError> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(snippet)
        .current_dir(cwd)
        .status()
        .await
        .map_err(|source| ShellError::Spawn {
            argv: vec!["sh".to_string(), "-c".to_string(), snippet.to_string()],
            source,
        })?;
    if !status.success() {
        tracing::warn!(%snippet, "tool hook command exited non-zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_single_command_successfully() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ProcessPool::new(dir.path().to_path_buf(), CancellationToken::new());
        let group = ExecGroup {
            members: vec![PipelineMember::Command(CommandInfo::new(vec![
                "true".to_string(),
            ]))],
        };
        let outcome = pool.run_group(&group).await.expect("run");
        assert!(outcome.ok());
        assert_eq!(outcome.pipelines[0].processes[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ProcessPool::new(dir.path().to_path_buf(), CancellationToken::new());
        let group = ExecGroup {
            members: vec![PipelineMember::Command(CommandInfo::new(vec![
                "false".to_string(),
            ]))],
        };
        let outcome = pool.run_group(&group).await.expect("run");
        assert!(!outcome.ok());
        assert_eq!(outcome.pipelines[0].failure_index, Some(0));
    }

    #[tokio::test]
    async fn ok_to_fail_does_not_fail_the_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ProcessPool::new(dir.path().to_path_buf(), CancellationToken::new());
        let mut cmd = CommandInfo::new(vec!["false".to_string()]);
        cmd.ok_to_fail = true;
        let group = ExecGroup {
            members: vec![PipelineMember::Command(cmd)],
        };
        let outcome = pool.run_group(&group).await.expect("run");
        assert!(outcome.ok());
    }

    #[tokio::test]
    async fn pipeline_connects_stdout_to_stdin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ProcessPool::new(dir.path().to_path_buf(), CancellationToken::new());
        let out_path = dir.path().join("out.txt");
        let mut tail = CommandInfo::new(vec!["cat".to_string()]);
        tail.stdout_path = Some(out_path.clone());
        let group = ExecGroup {
            members: vec![PipelineMember::Pipeline(PipelineInfo {
                commands: vec![
                    CommandInfo::new(vec![
                        "echo".to_string(),
                        "hello".to_string(),
                    ]),
                    tail,
                ],
            })],
        };
        let outcome = pool.run_group(&group).await.expect("run");
        assert!(outcome.ok());
        let contents = std::fs::read_to_string(&out_path).expect("read output");
        assert_eq!(contents.trim(), "hello");
    }

    #[tokio::test]
    async fn members_of_a_group_run_concurrently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ProcessPool::new(dir.path().to_path_buf(), CancellationToken::new());
        let group = ExecGroup {
            members: vec![
                PipelineMember::Command(CommandInfo::new(vec![
                    "sleep".to_string(),
                    "0.05".to_string(),
                ])),
                PipelineMember::Command(CommandInfo::new(vec!["true".to_string()])),
            ],
        };
        let start = std::time::Instant::now();
        let outcome = pool.run_group(&group).await.expect("run");
        assert!(outcome.ok());
        assert!(start.elapsed() < std::time::Duration::from_millis(200));
    }

    /// A child that fills its stderr pipe before writing anything to stdout
    /// deadlocks a reader that drains stdout to EOF first; draining both
    /// concurrently lets it make progress on either.
    #[tokio::test]
    async fn concurrent_stdout_and_stderr_draining_avoids_pipe_deadlock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ProcessPool::new(dir.path().to_path_buf(), CancellationToken::new());
        let group = ExecGroup {
            members: vec![PipelineMember::Command(CommandInfo::new(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "head -c 200000 /dev/zero 1>&2; echo ok".to_string(),
            ]))],
        };
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), pool.run_group(&group))
            .await
            .expect("reading both streams concurrently avoids the pipe deadlock")
            .expect("run");
        assert!(outcome.ok());
        assert_eq!(outcome.pipelines[0].processes[0].stderr_bytes, 200_000);
    }

    /// A cancellation must reap a child whose stdio pipes stay open well
    /// before the child would exit on its own (`spec.md` §5).
    #[tokio::test]
    async fn cancellation_reaps_child_promptly_even_with_open_stdout_pipe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancellationToken::new();
        let pool = ProcessPool::new(dir.path().to_path_buf(), cancel.clone());
        let group = ExecGroup {
            members: vec![PipelineMember::Command(CommandInfo::new(vec![
                "sleep".to_string(),
                "5".to_string(),
            ]))],
        };
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel.cancel(15);
        });
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), pool.run_group(&group))
            .await
            .expect("cancellation reaped the child well before its own 5s exit")
            .expect("run");
        canceller.await.expect("canceller joined");
        assert!(!outcome.ok());
    }
}
