// SPDX-License-Identifier: MIT

//! `flowcell steps` — list the workflow's steps, optionally with their
//! declared options/connections (`spec.md` §6: `steps [--details] [--show <kind>]`).

use super::workflow::Workflow;
use std::fmt::Write as _;

pub fn run(workflow: &Workflow, details: bool, show_kind: Option<&str>) -> String {
    let mut out = String::new();
    for name in workflow.graph.steps() {
        let Some(step) = workflow.steps.get(name) else {
            continue;
        };
        if let Some(kind) = show_kind {
            if step.kind != kind {
                continue;
            }
        }
        let _ = writeln!(out, "{} ({})", step.name, step.kind);
        if details {
            for option in &step.descriptor.options {
                let _ = writeln!(out, "    option {}", option.key);
            }
            for connection in &step.descriptor.connections {
                let _ = writeln!(out, "    connection {}", connection.name);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::workflow;
    use flowcell_config::{Configuration, StepRegistry};

    const SAMPLE: &str = r#"
destination_path: /tmp/out
steps:
  align:
    _step: bwa_mem
"#;

    #[test]
    fn lists_declared_steps() {
        let config = Configuration::from_yaml_str(SAMPLE).expect("parse");
        let registry = StepRegistry::new();
        let err = workflow::build(&config, &registry).unwrap_err();
        assert!(err.to_string().contains("unregistered step kind"));
    }

    #[test]
    fn empty_workflow_prints_nothing() {
        let config = Configuration::from_yaml_str("destination_path: /tmp/out\n").expect("parse");
        let registry = StepRegistry::new();
        let built = workflow::build(&config, &registry).expect("build");
        assert_eq!(run(&built, false, None), "");
    }
}
