// SPDX-License-Identifier: MIT

//! `flowcell run-info` — a shell-executable dump of the commands each run
//! would execute (`spec.md` §6: `run-info [--sources] [run …]`).

use super::workflow::Workflow;
use std::fmt::Write as _;

pub fn run(workflow: &Workflow, sources: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#!/bin/sh");
    let _ = writeln!(out, "set -e");

    for name in workflow.graph.steps() {
        let Some(step) = workflow.steps.get(name) else {
            continue;
        };
        let _ = writeln!(out, "\n# {}", step.run_info_str());
        for run in step.runs() {
            let _ = writeln!(out, "# {}", run.task_id());
            if sources {
                for inputs in run.output_files.values() {
                    for input_paths in inputs.values() {
                        for path in input_paths {
                            let _ = writeln!(out, "#   <- {}", path.display());
                        }
                    }
                }
            }
            for group in &run.exec_groups {
                for member in &group.members {
                    write_member(&mut out, member);
                }
            }
        }
    }
    out
}

fn write_member(out: &mut String, member: &flowcell_shell::PipelineMember) {
    match member {
        flowcell_shell::PipelineMember::Command(cmd) => {
            let _ = writeln!(out, "{}", cmd.argv.join(" "));
        }
        flowcell_shell::PipelineMember::Pipeline(pipeline) => {
            let joined = pipeline
                .commands
                .iter()
                .map(|cmd| cmd.argv.join(" "))
                .collect::<Vec<_>>()
                .join(" | ");
            let _ = writeln!(out, "{joined}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::workflow;
    use flowcell_config::{Configuration, StepRegistry};

    #[test]
    fn empty_workflow_still_produces_a_shebang() {
        let config = Configuration::from_yaml_str("destination_path: /tmp/out\n").expect("parse");
        let registry = StepRegistry::new();
        let built = workflow::build(&config, &registry).expect("build");
        assert!(run(&built, false).starts_with("#!/bin/sh"));
    }
}
