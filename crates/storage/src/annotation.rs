// SPDX-License-Identifier: MIT

//! Per-run annotation YAML (`spec.md` §4.4 step 7 / §6 persisted state
//! layout): `<output_dir>/.<run_id>.annotation.yaml`.

use crate::error::StorageError;
use flowcell_core::known_paths::KnownPathEntry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

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

mod system_time_secs_opt {
    use super::{epoch_seconds, from_epoch_seconds};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::SystemTime;

    pub fn serialize<S: Serializer>(value: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|t| epoch_seconds(&t)).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.map(from_epoch_seconds))
    }
}

/// A single recorded process invocation, independent of the execution-layer
/// type it's built from so that `flowcell-storage` doesn't need to depend on
/// `flowcell-shell` (the engine maps one to the other).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub argv: Vec<String>,
    pub pid: u32,
    #[serde(with = "system_time_secs")]
    pub start_time: SystemTime,
    #[serde(with = "system_time_secs")]
    pub end_time: SystemTime,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout_bytes: u64,
    pub stdout_lines: u64,
    pub stderr_bytes: u64,
    pub stderr_lines: u64,
}

/// Peak resource usage for one pid plus the pipeline-level sum, embedded in
/// the annotation (`spec.md` §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatcherSummary {
    pub per_pid_max_cpu_percent: IndexMap<u32, f32>,
    pub per_pid_max_rss_bytes: IndexMap<u32, u64>,
    pub per_pid_max_memory_percent: IndexMap<u32, f32>,
    pub sum_max_cpu_percent: f32,
    pub sum_max_rss_bytes: u64,
    pub sum_max_memory_percent: f32,
}

/// The full per-run annotation document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub step_name: String,
    pub step_kind: String,
    pub run_id: String,
    #[serde(with = "system_time_secs")]
    pub start_time: SystemTime,
    #[serde(with = "system_time_secs_opt")]
    pub end_time: Option<SystemTime>,
    pub host: String,
    #[serde(default)]
    pub cluster_job_id: Option<String>,
    #[serde(default)]
    pub watcher: WatcherSummary,
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
    pub known_paths: IndexMap<PathBuf, KnownPathEntry>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub caught_signal: Option<i32>,
}

/// Result of comparing a run's declared outputs against disk (`spec.md`
/// §4.5 FINISHED check / §4.4 CHANGED state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputsCheck {
    /// Every declared output exists with its annotated size and hash.
    Verified,
    /// A declared output exists but its size or hash no longer matches.
    Changed,
    /// A declared output that was published is no longer on disk.
    Missing,
}

impl Annotation {
    /// `true` iff every declared output in `known_paths` exists on disk with
    /// the annotated size and hash (the `FINISHED` check, `spec.md` §4.5).
    pub fn outputs_verified(&self) -> bool {
        self.outputs_check() == OutputsCheck::Verified
    }

    /// Re-hashes every declared, published output and compares it against
    /// the size/hash recorded at publish time (`spec.md` §4.5 FINISHED
    /// check, §4.4 CHANGED state). An entry whose `real_path` is `None` was
    /// never published (the run failed before the rename step) and isn't
    /// checked here — `Annotation.error` is the signal for that case.
    pub fn outputs_check(&self) -> OutputsCheck {
        let mut changed = false;
        for entry in self.known_paths.values() {
            if entry.designation != flowcell_core::known_paths::Designation::Output {
                continue;
            }
            let Some(path) = &entry.real_path else {
                continue;
            };
            let Ok(meta) = std::fs::metadata(path) else {
                return OutputsCheck::Missing;
            };
            if entry.size.is_some_and(|size| size != meta.len()) {
                changed = true;
                continue;
            }
            if let Some(expected) = &entry.sha256 {
                match flowcell_core::sha256sum_of(path) {
                    Ok(actual) if &actual == expected => {}
                    _ => changed = true,
                }
            }
        }
        if changed {
            OutputsCheck::Changed
        } else {
            OutputsCheck::Verified
        }
    }
}

pub fn annotation_path(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(format!(".{run_id}.annotation.yaml"))
}

pub fn write_annotation(output_dir: &Path, annotation: &Annotation) -> Result<(), StorageError> {
    let path = annotation_path(output_dir, &annotation.run_id);
    let text = serde_yaml::to_string(annotation).map_err(|source| StorageError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(&path, text).map_err(|source| StorageError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_annotation(output_dir: &Path, run_id: &str) -> Result<Option<Annotation>, StorageError> {
    let path = annotation_path(output_dir, run_id);
    match std::fs::read_to_string(&path) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use flowcell_core::known_paths::KnownPathEntry;

    fn sample_annotation(output_dir: &Path) -> Annotation {
        let mut known_paths = IndexMap::new();
        let mut output = KnownPathEntry::output("result");
        output.real_path = Some(output_dir.join("result.bam"));
        known_paths.insert(output_dir.join("result.bam"), output);

        Annotation {
            step_name: "align".to_string(),
            step_kind: "bwa_mem".to_string(),
            run_id: "r1".to_string(),
            start_time: SystemTime::now(),
            end_time: Some(SystemTime::now()),
            host: "host1".to_string(),
            cluster_job_id: None,
            watcher: WatcherSummary::default(),
            processes: vec![ProcessRecord {
                argv: vec!["bwa".to_string(), "mem".to_string()],
                pid: 1,
                start_time: SystemTime::now(),
                end_time: SystemTime::now(),
                exit_code: Some(0),
                signal: None,
                stdout_bytes: 0,
                stdout_lines: 0,
                stderr_bytes: 0,
                stderr_lines: 0,
            }],
            known_paths,
            error: None,
            caught_signal: None,
        }
    }

    #[test]
    fn round_trips_through_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let annotation = sample_annotation(dir.path());
        write_annotation(dir.path(), &annotation).expect("write");
        let read = read_annotation(dir.path(), "r1").expect("read").expect("present");
        assert_eq!(read.step_name, "align");
        assert_eq!(read.processes.len(), 1);
    }

    #[test]
    fn outputs_verified_false_when_output_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let annotation = sample_annotation(dir.path());
        assert!(!annotation.outputs_verified());
        std::fs::write(dir.path().join("result.bam"), b"x").expect("write");
        assert!(annotation.outputs_verified());
    }

    #[test]
    fn missing_annotation_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(read_annotation(dir.path(), "nope").expect("read").is_none());
    }
}
