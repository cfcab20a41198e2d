// SPDX-License-Identifier: MIT

//! `flowcell volatilize` — replace the outputs of every finished run whose
//! step opted into `_volatile: true` with `.volatile.placeholder.yaml`
//! files (`spec.md` §4.6, §6: `volatilize [--details] [--srsly]`).
//!
//! Lineage recorded in the placeholder is simplified to the producing
//! run's own task id rather than the full upstream chain: unlike the
//! executor (which has the run's `exec_groups` and `FileDependencies`
//! live in the same process), this command only has what's durable on
//! disk to work from, and no on-disk record of a run's transitive
//! ancestry is kept beyond its own task id. A downstream consumer only
//! needs to know which task to re-run to regenerate the bytes, which the
//! producing task id alone already answers.

use super::workflow::Workflow;
use anyhow::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct VolatilizeOptions {
    pub details: bool,
    pub srsly: bool,
}

pub struct VolatilizeReport {
    pub path: String,
    pub volatilized: bool,
}

pub fn run(workflow: &Workflow, options: VolatilizeOptions) -> Result<Vec<VolatilizeReport>> {
    let mut reports = Vec::new();

    for name in workflow.graph.steps() {
        let Some(step) = workflow.steps.get(name) else {
            continue;
        };
        let opted_in = matches!(step.option("_volatile"), Some(serde_yaml::Value::Bool(true)));
        if !opted_in {
            continue;
        }

        for run in step.runs() {
            let annotation =
                flowcell_storage::annotation::read_annotation(&run.output_dir, run.run_id.as_str())?;
            let Some(doc) = annotation else { continue };
            if doc.error.is_some() || !doc.outputs_verified() {
                continue;
            }

            for basename in run.declared_output_basenames() {
                let path = run.output_path(basename);
                if flowcell_storage::is_volatilized(&path) {
                    continue;
                }
                let Ok(sha256) = flowcell_core::sha256sum_of(&path) else {
                    continue;
                };
                let lineage = vec![run.task_id().to_string()];

                let volatilized = if options.srsly {
                    flowcell_engine::apply_volatile_policy(&path, true, sha256, lineage).is_ok()
                } else {
                    false
                };
                if options.details {
                    tracing::info!(path = %path.display(), srsly = options.srsly, "volatilize candidate");
                }
                reports.push(VolatilizeReport {
                    path: path.display().to_string(),
                    volatilized,
                });
            }
        }
    }
    Ok(reports)
}
