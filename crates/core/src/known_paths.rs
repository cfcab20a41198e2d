// SPDX-License-Identifier: MIT

//! `known_paths` — the table of every path a run will touch (`spec.md` §3,
//! invariant 4).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Whether a path is consumed or produced by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Designation {
    Input,
    Output,
}

/// One entry of `known_paths[abs_path]` (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownPathEntry {
    pub designation: Designation,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_opt"
    )]
    pub mtime: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// For a temp-directory mirror entry, the final output path it stands in for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_path: Option<PathBuf>,
}

impl KnownPathEntry {
    pub fn input(label: impl Into<String>) -> Self {
        Self {
            designation: Designation::Input,
            label: label.into(),
            kind: "step_file".to_string(),
            size: None,
            mtime: None,
            sha256: None,
            real_path: None,
        }
    }

    pub fn output(label: impl Into<String>) -> Self {
        Self {
            designation: Designation::Output,
            label: label.into(),
            kind: "step_file".to_string(),
            size: None,
            mtime: None,
            sha256: None,
            real_path: None,
        }
    }
}

/// Serializes `SystemTime` as RFC3339 for the annotation YAML; plain `serde`
/// has no built-in `SystemTime` support.
mod humantime_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(
        value: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => {
                let secs = t
                    .duration_since(UNIX_EPOCH)
                    .map_err(serde::ser::Error::custom)?
                    .as_secs_f64();
                secs.serialize(serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        let secs: Option<f64> = Option::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs_f64(s)))
    }
}
