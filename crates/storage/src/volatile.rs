// SPDX-License-Identifier: MIT

//! Volatile placeholder layer (`spec.md` §4.6): a step whose `_volatile`
//! option is set may have its output files replaced by a small YAML
//! placeholder that still lets downstream dependency resolution and hash
//! verification work.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Suffix appended to a volatilized file's path to name its placeholder.
pub const VOLATILE_SUFFIX: &str = ".volatile.placeholder.yaml";

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

/// The content of a `<path>.volatile.placeholder.yaml` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilePlaceholder {
    pub size: u64,
    pub sha256: String,
    #[serde(with = "system_time_secs")]
    pub mtime: SystemTime,
    /// Upstream run task ids this file was produced from.
    #[serde(default)]
    pub lineage: Vec<String>,
    /// Downstream task ids that have consumed this file's placeholder.
    #[serde(default)]
    pub downstream: Vec<String>,
}

/// The placeholder path for a given original output path.
pub fn placeholder_path(original: &Path) -> PathBuf {
    let mut name = original.as_os_str().to_os_string();
    name.push(VOLATILE_SUFFIX);
    PathBuf::from(name)
}

pub fn is_volatilized(original: &Path) -> bool {
    placeholder_path(original).exists()
}

pub fn write_placeholder(
    original: &Path,
    placeholder: &VolatilePlaceholder,
) -> Result<(), StorageError> {
    let path = placeholder_path(original);
    let text = serde_yaml::to_string(placeholder).map_err(|source| StorageError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(&path, text).map_err(|source| StorageError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_placeholder(original: &Path) -> Result<Option<VolatilePlaceholder>, StorageError> {
    let path = placeholder_path(original);
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

/// Replace `original` with its placeholder, recording `downstream` as the
/// tasks it has fed so far. The original bytes are removed; regenerating
/// them requires re-running the producing step and matching `sha256`.
pub fn volatilize(
    original: &Path,
    sha256: String,
    lineage: Vec<String>,
) -> Result<(), StorageError> {
    let meta = std::fs::metadata(original).map_err(|source| StorageError::Read {
        path: original.display().to_string(),
        source,
    })?;
    let placeholder = VolatilePlaceholder {
        size: meta.len(),
        sha256,
        mtime: meta.modified().map_err(|source| StorageError::Read {
            path: original.display().to_string(),
            source,
        })?,
        lineage,
        downstream: Vec::new(),
    };
    write_placeholder(original, &placeholder)?;
    std::fs::remove_file(original).map_err(|source| StorageError::Write {
        path: original.display().to_string(),
        source,
    })
}

/// Remove a placeholder once the original bytes have been regenerated and
/// verified against the recorded hash.
pub fn revive(original: &Path) -> Result<(), StorageError> {
    let path = placeholder_path(original);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Write {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatilize_then_revive_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.bam");
        std::fs::write(&path, b"bam-bytes").expect("write");

        volatilize(&path, "deadbeef".to_string(), vec!["align/r1".to_string()]).expect("volatilize");
        assert!(!path.exists());
        assert!(is_volatilized(&path));

        let placeholder = read_placeholder(&path).expect("read").expect("present");
        assert_eq!(placeholder.sha256, "deadbeef");
        assert_eq!(placeholder.size, 9);

        std::fs::write(&path, b"bam-bytes").expect("regenerate");
        revive(&path).expect("revive");
        assert!(!is_volatilized(&path));
    }

    #[test]
    fn placeholder_path_appends_suffix() {
        let original = Path::new("/out/result.bam");
        assert_eq!(
            placeholder_path(original),
            PathBuf::from("/out/result.bam.volatile.placeholder.yaml")
        );
    }
}
