// SPDX-License-Identifier: MIT

//! `flowcell render` — graph rendering is explicitly out of scope
//! (`spec.md` §1: "Graph rendering to SVG/DOT"). This prints the same
//! step/dependency edges a renderer would consume, as plain text, rather
//! than producing SVG/DOT output itself.

use super::workflow::Workflow;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub files: bool,
    pub steps: bool,
    pub simple: bool,
}

pub fn run(workflow: &Workflow, options: RenderOptions) -> String {
    let mut out = String::new();
    for name in workflow.graph.steps() {
        let parents = workflow.graph.parents_of(name);
        if parents.is_empty() {
            let _ = writeln!(out, "{name}");
        } else {
            for parent in &parents {
                let _ = writeln!(out, "{parent} -> {name}");
            }
        }
        if options.files && !options.simple {
            if let Some(step) = workflow.steps.get(name) {
                for run in step.runs() {
                    for basename in run.declared_output_basenames() {
                        let _ = writeln!(out, "  {name} produces {basename}");
                    }
                }
            }
        }
    }
    if options.steps {
        // `--steps` and the default view are the same graph at this level
        // of detail; a real renderer would collapse multi-run steps here.
    }
    out
}
