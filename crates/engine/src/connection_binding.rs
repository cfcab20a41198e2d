// SPDX-License-Identifier: MIT

//! Cross-step connection binding (`spec.md` §4.1), grounded on
//! `abstract_step.py::get_run_ids_in_connections_input_files`: for each
//! parent, in dependency order, an explicit `_connect` entry wins; absent
//! one, same-name auto-binding applies; every parent must contribute at
//! least one binding.

use flowcell_config::connection::{split_target, strip_empty_targets};
use flowcell_config::{ConnectTarget, ConnectionError, ConnectionSpec, Direction};
use indexmap::IndexMap;
use std::collections::HashSet;

/// The result of binding one child step against all of its parents.
#[derive(Debug, Clone, Default)]
pub struct BoundConnections {
    /// `in_name -> ["parent_step/out_local", ...]`, in parent dependency
    /// order.
    pub bindings: IndexMap<String, Vec<String>>,
    /// Required (non-optional) input connections left unsatisfied after
    /// binding every parent. `spec.md` §4.1 treats this as a deprecation
    /// warning today, a hard error in a future release.
    pub missing_required: Vec<String>,
}

impl BoundConnections {
    pub fn sources(&self, in_name: &str) -> &[String] {
        self.bindings.get(in_name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Bind `child`'s declared input connections against each of `parents`'
/// declared outputs.
///
/// `parents` must already be in the order the child's `_depends` list (or
/// DAG predecessor order) establishes.
pub fn bind_connections(
    child_name: &str,
    child_in_connections: &[ConnectionSpec],
    parents: &[(&str, &[ConnectionSpec])],
    connect: &IndexMap<String, ConnectTarget>,
) -> Result<BoundConnections, ConnectionError> {
    let known_inputs: Vec<&str> = child_in_connections
        .iter()
        .map(|c| c.name.as_str())
        .collect();

    for in_name in connect.keys() {
        if !known_inputs.contains(&in_name.as_str()) {
            return Err(ConnectionError::UnknownInputConnection {
                step: child_name.to_string(),
                connection: in_name.clone(),
                known: known_inputs.join(", "),
            });
        }
    }

    let mut bindings: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut existing: HashSet<String> = HashSet::new();

    for (parent_name, parent_connections) in parents {
        let parent_outs: Vec<&str> = parent_connections
            .iter()
            .filter(|c| c.direction() == Direction::Out)
            .map(|c| c.local_name())
            .collect();

        let mut explicit_for_parent = false;

        for (in_name, target) in connect {
            let mut targets: HashSet<String> =
                target.as_list().into_iter().map(str::to_string).collect();
            strip_empty_targets(&mut targets);

            for raw_target in &targets {
                let (target_parent, conn) = split_target(raw_target);
                if target_parent != *parent_name {
                    continue;
                }
                explicit_for_parent = true;
                if !parent_outs.contains(&conn) {
                    return Err(ConnectionError::UnrecognizedOutputConnections {
                        parent: parent_name.to_string(),
                        child: child_name.to_string(),
                        connections: conn.to_string(),
                    });
                }
                bindings
                    .entry(in_name.clone())
                    .or_default()
                    .push(format!("{parent_name}/{conn}"));
                existing.insert(in_name.clone());
            }
        }

        if !explicit_for_parent {
            let mut bound_any = false;
            for in_conn in child_in_connections {
                let local = in_conn.local_name();
                if parent_outs.contains(&local) {
                    bindings
                        .entry(in_conn.name.clone())
                        .or_default()
                        .push(format!("{parent_name}/{local}"));
                    existing.insert(in_conn.name.clone());
                    bound_any = true;
                }
            }
            if !bound_any {
                return Err(ConnectionError::NoBindingFromParent {
                    parent: parent_name.to_string(),
                    child: child_name.to_string(),
                });
            }
        }
    }

    let missing_required: Vec<String> = child_in_connections
        .iter()
        .filter(|c| !c.optional && !existing.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();

    for connection in &missing_required {
        tracing::warn!(
            step = child_name,
            %connection,
            "required input connection is unsatisfied; this will become a hard error"
        );
    }

    Ok(BoundConnections {
        bindings,
        missing_required,
    })
}
