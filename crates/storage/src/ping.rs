// SPDX-License-Identifier: MIT

//! Ping/heartbeat protocol (`spec.md` §4.5): the two files a run writes
//! under its `output_dir` to announce queued/executing state, and the
//! observable task-state classification derived from them.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A run is considered stale if its executing-ping hasn't been renewed
/// within this many seconds (`spec.md` §4.4/§4.5).
pub const PING_TIMEOUT: Duration = Duration::from_secs(300);

/// Heartbeat renewal interval (`spec.md` §4.4/§4.5).
pub const PING_RENEW: Duration = Duration::from_secs(30);

fn epoch_seconds(value: &SystemTime) -> f64 {
    value
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn from_epoch_seconds(secs: f64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs_f64(secs.max(0.0))
}

mod system_time_secs {
    use super::{epoch_seconds, from_epoch_seconds};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::SystemTime;

    pub fn serialize<S: Serializer>(value: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        epoch_seconds(value).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        Ok(from_epoch_seconds(f64::deserialize(d)?))
    }
}

/// `.{run_id}.queued.yaml` — written at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPing {
    #[serde(default)]
    pub cluster_job_id: Option<String>,
}

/// `.{run_id}.executing.yaml` — written at executor start, touched every
/// [`PING_RENEW`] seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutingPing {
    #[serde(with = "system_time_secs")]
    pub start_time: SystemTime,
    pub host: String,
    pub pid: u32,
    pub user: String,
    pub temp_directory: PathBuf,
    #[serde(default)]
    pub cluster_job_id: Option<String>,
}

pub fn queued_ping_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(format!(".{run_id}.queued.yaml"))
}

pub fn executing_ping_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(format!(".{run_id}.executing.yaml"))
}

pub fn write_queued_ping(path: &Path, ping: &QueuedPing) -> Result<(), StorageError> {
    write_yaml(path, ping)
}

pub fn read_queued_ping(path: &Path) -> Result<Option<QueuedPing>, StorageError> {
    read_yaml_if_exists(path)
}

/// Write the executing ping, failing if one already exists (the preflight
/// "already running" check, `spec.md` §4.4 step 1).
pub fn write_executing_ping(path: &Path, ping: &ExecutingPing) -> Result<(), StorageError> {
    let text = serde_yaml::to_string(ping).map_err(|source| StorageError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                StorageError::AlreadyRunning(path.display().to_string())
            } else {
                StorageError::Write {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;
    use std::io::Write;
    file.write_all(text.as_bytes())
        .map_err(|source| StorageError::Write {
            path: path.display().to_string(),
            source,
        })
}

pub fn read_executing_ping(path: &Path) -> Result<Option<ExecutingPing>, StorageError> {
    read_yaml_if_exists(path)
}

/// Update the executing ping's mtime (the heartbeat "touch") by rewriting
/// its existing content, which is enough to advance the filesystem mtime
/// without pulling in a platform-specific mtime-setting dependency.
pub fn touch_executing_ping(path: &Path) -> Result<(), StorageError> {
    let text = std::fs::read_to_string(path).map_err(|source| StorageError::Read {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| StorageError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn executing_ping_mtime(path: &Path) -> Result<Option<SystemTime>, StorageError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified().map_err(|source| StorageError::Read {
            path: path.display().to_string(),
            source,
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

pub fn remove_executing_ping(path: &Path) -> Result<(), StorageError> {
    remove_ping_file(path)
}

/// Delete a ping file, treating "already gone" as success. Used for both
/// the executing and queued ping at teardown (`spec.md` §4.4 step 8).
pub fn remove_ping_file(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Write {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Rename a ping file to `<path>.bad`; with `debugging` also leave a
/// timestamped copy behind for postmortem inspection (`spec.md` §4.4 step 2).
pub fn mark_bad(path: &Path, now: SystemTime, debugging: bool) -> Result<(), StorageError> {
    if !path.exists() {
        return Ok(());
    }
    let bad_path = path.with_extension("bad");
    if debugging {
        let stamped = path.with_extension(format!("{}.bad", epoch_seconds(&now) as u64));
        std::fs::copy(path, &stamped).map_err(|source| StorageError::Write {
            path: stamped.display().to_string(),
            source,
        })?;
    }
    std::fs::rename(path, &bad_path).map_err(|source| StorageError::Write {
        path: bad_path.display().to_string(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let text = serde_yaml::to_string(value).map_err(|source| StorageError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| StorageError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn read_yaml_if_exists<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<Option<T>, StorageError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let value = serde_yaml::from_str(&text).map_err(|source| StorageError::Parse {
                path: path.display().to_string(),
                source,
            })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Spawns a task that touches the executing ping's mtime every
/// [`PING_RENEW`] until stopped, surfacing touch failures via `tracing`
/// rather than panicking (a dropped ping file shouldn't crash the heartbeat).
pub struct HeartbeatHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub async fn stop(self) {
        self.stop.notify_waiters();
        let _ = self.task.await;
    }
}

pub fn spawn_heartbeat(path: PathBuf, renew: Duration) -> HeartbeatHandle {
    let stop = Arc::new(Notify::new());
    let stop_task = stop.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(renew);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = touch_executing_ping(&path) {
                        tracing::warn!(error = %e, path = %path.display(), "failed to renew executing ping");
                    }
                }
                _ = stop_task.notified() => break,
            }
        }
    });
    HeartbeatHandle { stop, task }
}

/// Observable task states (`spec.md` §4.4). `Waiting`/`Ready`/`Changed` are
/// derived from DAG/hash context the ping files alone don't carry; this
/// module only ever returns the subset it can determine unassisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingPhase {
    Queued,
    Executing,
    Bad,
}

/// Determine the ping-derived phase of a task, or `None` if neither ping
/// file exists (the task hasn't been queued or started yet).
pub fn classify_ping(
    queued_exists: bool,
    executing_mtime: Option<SystemTime>,
    now: SystemTime,
) -> Option<PingPhase> {
    match executing_mtime {
        Some(mtime) => {
            let age = now.duration_since(mtime).unwrap_or_default();
            Some(if age <= PING_TIMEOUT {
                PingPhase::Executing
            } else {
                PingPhase::Bad
            })
        }
        None if queued_exists => Some(PingPhase::Queued),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executing_ping_fails_if_already_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = executing_ping_path(dir.path(), "run1");
        let ping = ExecutingPing {
            start_time: SystemTime::now(),
            host: "host1".to_string(),
            pid: 123,
            user: "me".to_string(),
            temp_directory: dir.path().join("temp"),
            cluster_job_id: None,
        };
        write_executing_ping(&path, &ping).expect("first write");
        let err = write_executing_ping(&path, &ping).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyRunning(_)));
    }

    #[test]
    fn round_trips_queued_ping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = queued_ping_path(dir.path(), "run1");
        write_queued_ping(
            &path,
            &QueuedPing {
                cluster_job_id: Some("job-42".to_string()),
            },
        )
        .expect("write");
        let read = read_queued_ping(&path).expect("read").expect("present");
        assert_eq!(read.cluster_job_id, Some("job-42".to_string()));
    }

    #[test]
    fn missing_ping_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = queued_ping_path(dir.path(), "run1");
        assert!(read_queued_ping(&path).expect("read").is_none());
    }

    #[test]
    fn classify_ping_distinguishes_fresh_and_stale_executing() {
        let now = SystemTime::now();
        let fresh = now - Duration::from_secs(10);
        let stale = now - Duration::from_secs(400);
        assert_eq!(
            classify_ping(false, Some(fresh), now),
            Some(PingPhase::Executing)
        );
        assert_eq!(classify_ping(false, Some(stale), now), Some(PingPhase::Bad));
        assert_eq!(classify_ping(true, None, now), Some(PingPhase::Queued));
        assert_eq!(classify_ping(false, None, now), None);
    }

    #[test]
    fn mark_bad_renames_with_timestamped_copy_when_debugging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = executing_ping_path(dir.path(), "run1");
        std::fs::write(&path, "start_time: 0\n").expect("write");
        mark_bad(&path, SystemTime::now(), true).expect("mark bad");
        assert!(!path.exists());
        assert!(path.with_extension("bad").exists());
    }
}
