// SPDX-License-Identifier: MIT

//! Connection declaration and `_connect` binding-target parsing, grounded on
//! `abstract_step.py::add_connection`/`get_run_ids_in_connections_input_files`.

use crate::error::ConnectionError;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The special `_connect` target meaning "no data on this connection"
/// (`spec.md` §4.1, supplemented feature 4).
pub const EMPTY_TARGET: &str = "empty";

/// Direction of a declared connection, derived from its `in/`/`out/` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// A single declared connection on a step kind (`add_connection`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    /// Full name including prefix, e.g. `"in/reads"` or `"out/alignment"`.
    pub name: String,
    pub optional: bool,
    pub format: Option<String>,
    pub description: Option<String>,
}

impl ConnectionSpec {
    pub fn new(name: impl Into<String>) -> Result<Self, ConnectionError> {
        let name = name.into();
        if !(name.starts_with("in/") || name.starts_with("out/")) {
            return Err(ConnectionError::BadPrefix(name));
        }
        Ok(Self {
            name,
            optional: false,
            format: None,
            description: None,
        })
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let collapsed = description.into().split_whitespace().collect::<Vec<_>>().join(" ");
        self.description = Some(collapsed);
        self
    }

    pub fn direction(&self) -> Direction {
        if self.name.starts_with("in/") {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// The connection's local name, stripped of its `in/`/`out/` prefix.
    pub fn local_name(&self) -> &str {
        match self.direction() {
            Direction::In => &self.name[3..],
            Direction::Out => &self.name[4..],
        }
    }
}

/// A `_connect` value: either a single `"step/out_connection"` reference or
/// a list of them. The YAML config accepts both the bare and list forms
/// (structured-or-bare), so this has a custom `Deserialize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConnectTarget {
    One(String),
    Many(Vec<String>),
}

impl ConnectTarget {
    /// Normalize to a `Vec` regardless of which form was used in YAML.
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            ConnectTarget::One(s) => vec![s.as_str()],
            ConnectTarget::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

impl<'de> Deserialize<'de> for ConnectTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TargetVisitor;

        impl<'de> Visitor<'de> for TargetVisitor {
            type Value = ConnectTarget;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or list of strings")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(ConnectTarget::One(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(ConnectTarget::One(v))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(ConnectTarget::Many(items))
            }
        }

        deserializer.deserialize_any(TargetVisitor)
    }
}

/// Split a bound target like `"align/out_bam"` into `(parent_step, out_connection)`.
pub fn split_target(target: &str) -> (&str, &str) {
    match target.split_once('/') {
        Some((parent, conn)) => (parent, conn),
        None => (target, ""),
    }
}

/// Remove `"empty"` targets from a set of output connections referenced by
/// `_connect`, logging the same deprecation warning
/// (`abstract_step.py::get_run_ids_in_connections_input_files`).
pub fn strip_empty_targets(targets: &mut std::collections::HashSet<String>) {
    if targets.remove(EMPTY_TARGET) {
        tracing::warn!("\"empty\" in _connect is deprecated and will be removed in a future release");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_connection_without_prefix() {
        let err = ConnectionSpec::new("reads").unwrap_err();
        assert!(matches!(err, ConnectionError::BadPrefix(_)));
    }

    #[test]
    fn direction_and_local_name() {
        let spec = ConnectionSpec::new("in/reads").expect("spec");
        assert_eq!(spec.direction(), Direction::In);
        assert_eq!(spec.local_name(), "reads");
    }

    #[test]
    fn connect_target_deserializes_bare_string() {
        let target: ConnectTarget = serde_yaml::from_str("\"align/out_bam\"").expect("parse");
        assert_eq!(target.as_list(), vec!["align/out_bam"]);
    }

    #[test]
    fn connect_target_deserializes_list() {
        let target: ConnectTarget =
            serde_yaml::from_str("[\"align/out_bam\", \"index/out_bai\"]").expect("parse");
        assert_eq!(target.as_list(), vec!["align/out_bam", "index/out_bai"]);
    }

    #[test]
    fn split_target_separates_step_and_connection() {
        assert_eq!(split_target("align/out_bam"), ("align", "out_bam"));
    }

    #[test]
    fn strip_empty_removes_marker_only() {
        let mut set: std::collections::HashSet<String> =
            ["out_bam".to_string(), EMPTY_TARGET.to_string()].into_iter().collect();
        strip_empty_targets(&mut set);
        assert_eq!(set.len(), 1);
        assert!(set.contains("out_bam"));
    }
}
