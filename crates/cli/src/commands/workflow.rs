// SPDX-License-Identifier: MIT

//! Turns a loaded [`Configuration`] plus a [`StepRegistry`] into a
//! [`WorkflowGraph`] and a map of bound [`StepInstance`]s
//! (`flowcell-cli` is intentionally thin: load, build, hand off).

use anyhow::{anyhow, bail, Context, Result};
use flowcell_config::connection::{split_target, EMPTY_TARGET};
use flowcell_config::{Configuration, ConnectionSpec, StepRegistry};
use flowcell_core::StepName;
use flowcell_engine::{bind_connections, FileDependencies, StepInstance, WorkflowGraph};
use indexmap::IndexMap;
use std::sync::Arc;

/// A fully bound workflow: the dependency graph plus every step, ready to
/// have runs declared against it.
pub struct Workflow {
    pub graph: WorkflowGraph,
    pub steps: IndexMap<StepName, StepInstance>,
    pub file_dependencies: Arc<FileDependencies>,
}

impl Workflow {
    pub fn order(&self) -> Result<Vec<StepName>> {
        self.graph
            .topological_order()
            .map_err(|e| anyhow!("{e}"))
            .context("resolving step execution order")
    }
}

/// Every additional parent a step has beyond `_depends`, discovered by
/// scanning its `_connect` targets (`abstract_step.py`: `_depends` need not
/// list every step an explicit `_connect` entry references).
fn connect_parents(def: &flowcell_config::StepDef) -> Vec<String> {
    let mut parents = Vec::new();
    for target in def.connect.values() {
        for raw in target.as_list() {
            if raw == EMPTY_TARGET {
                continue;
            }
            let (parent, _) = split_target(raw);
            if !parents.contains(&parent.to_string()) {
                parents.push(parent.to_string());
            }
        }
    }
    parents
}

/// Build the graph and every step instance, in the configuration's
/// declaration order. Parents must already have been declared earlier in
/// the file (`spec.md` §2: "Step registry instantiates steps in
/// declaration order"); a forward reference is rejected with a clear error
/// rather than silently reordered.
pub fn build(config: &Configuration, registry: &StepRegistry) -> Result<Workflow> {
    let mut graph = WorkflowGraph::new();
    let mut steps: IndexMap<StepName, StepInstance> = IndexMap::new();
    let file_dependencies = Arc::new(FileDependencies::new());

    for (step_name, def) in &config.steps {
        let kind_name = def.resolved_kind(step_name);
        let descriptor = registry
            .get(kind_name)
            .ok_or_else(|| anyhow!("step {step_name} references unregistered step kind {kind_name}"))?
            .clone();

        let mut parent_names = def.depends.clone();
        for extra in connect_parents(def) {
            if !parent_names.contains(&extra) {
                parent_names.push(extra);
            }
        }

        let mut parent_refs: Vec<(&str, &[ConnectionSpec])> = Vec::with_capacity(parent_names.len());
        for parent_name in &parent_names {
            let parent = steps.get(parent_name.as_str()).ok_or_else(|| {
                anyhow!(
                    "step {step_name} depends on {parent_name}, which is not yet declared; \
                     steps must be declared in dependency order"
                )
            })?;
            parent_refs.push((parent_name.as_str(), parent.descriptor.connections.as_slice()));
        }

        let child_ins: Vec<ConnectionSpec> = descriptor
            .connections
            .iter()
            .filter(|c| c.direction() == flowcell_config::Direction::In)
            .cloned()
            .collect();

        let bound = bind_connections(step_name, &child_ins, &parent_refs, &def.connect)
            .with_context(|| format!("binding connections for step {step_name}"))?;

        let resolved_options = flowcell_config::options::resolve_options(
            step_name,
            kind_name,
            &descriptor.option_specs(),
            &def.options,
        )
        .with_context(|| format!("resolving options for step {step_name}"))?;

        let name = StepName::new(step_name.clone());
        let output_dir = config.destination_path.join(step_name);
        let parents: Vec<StepName> = parent_names.iter().map(StepName::new).collect();

        for parent in &parents {
            graph.add_dependency(&name, parent);
        }
        graph.add_step(name.clone());

        let instance = StepInstance::new(
            name.clone(),
            kind_name.to_string(),
            resolved_options,
            descriptor,
            parents,
            bound,
            output_dir,
        );
        steps.insert(name, instance);
    }

    // Every step must appear in declaration order in `graph` even with no
    // dependencies, which the loop above already guarantees via `add_step`.
    // Fail loudly if the topological sort still finds a cycle: declaration
    // order rules out back-references, so a cycle here means `_connect`
    // introduced one the `_depends` ordering didn't catch.
    if let Err(e) = graph.topological_order() {
        bail!("workflow graph is not acyclic: {e}");
    }

    Ok(Workflow {
        graph,
        steps,
        file_dependencies,
    })
}
