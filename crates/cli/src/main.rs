// SPDX-License-Identifier: MIT
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! `flowcell`: loads a configuration, builds the step DAG, and hands off to
//! `flowcell-engine` (`spec.md` §6 CLI surface). No step kind is registered
//! here — tool-specific `declare_runs`/`require_tools` behavior is outside
//! this crate's scope, so every run reported below reflects whatever a
//! real deployment's registry would have declared.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    fix_problems, render, run_info, run_locally, status, steps, submit_to_cluster, volatilize,
    GlobalFlags,
};
use flowcell_config::StepRegistry;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowcell", about = "Workflow engine CLI")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short = 'c', default_value = "flowcell.yaml")]
    config: PathBuf,

    #[arg(long)]
    even_if_dirty: bool,
    #[arg(long)]
    no_tool_checks: bool,
    #[arg(long, short = 'v')]
    verbose: bool,
    #[arg(long)]
    debugging: bool,
    #[arg(long)]
    profiling: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    RunLocally {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        ignore: bool,
        run: Vec<String>,
    },
    SubmitToCluster {
        #[arg(long)]
        cluster: Option<String>,
        #[arg(long)]
        legacy: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        ignore: bool,
        run: Vec<String>,
    },
    Status {
        #[arg(long)]
        cluster: bool,
        #[arg(long)]
        details: bool,
        #[arg(long)]
        job_ids: bool,
        #[arg(long)]
        summarize: bool,
        #[arg(long)]
        graph: bool,
        #[arg(long)]
        hash: bool,
        #[arg(long)]
        sources: bool,
        run: Vec<String>,
    },
    Steps {
        #[arg(long)]
        details: bool,
        #[arg(long)]
        show: Option<String>,
    },
    RunInfo {
        #[arg(long)]
        sources: bool,
        run: Vec<String>,
    },
    Render {
        #[arg(long)]
        files: bool,
        #[arg(long)]
        steps: bool,
        #[arg(long)]
        simple: bool,
        #[arg(long, default_value = "top-to-bottom")]
        orientation: String,
        run: Vec<String>,
    },
    FixProblems {
        #[arg(long)]
        cluster: bool,
        #[arg(long)]
        first_error: bool,
        #[arg(long)]
        file_modification_date: bool,
        #[arg(long)]
        details: bool,
        #[arg(long)]
        srsly: bool,
    },
    Volatilize {
        #[arg(long)]
        details: bool,
        #[arg(long)]
        srsly: bool,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};
        let default = if cli.verbose { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init();
    }

    match run(cli).await {
        Ok(()) => std::process::ExitCode::from(0),
        Err(e) => {
            eprintln!("[BAD] {e}");
            if std::env::var("FLOWCELL_DEBUGGING").is_ok() {
                eprintln!("{e:?}");
            }
            std::process::ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let flags = GlobalFlags {
        even_if_dirty: cli.even_if_dirty,
        no_tool_checks: cli.no_tool_checks,
        verbose: cli.verbose,
        debugging: cli.debugging,
        profiling: cli.profiling,
    };
    if cli.debugging {
        std::env::set_var("FLOWCELL_DEBUGGING", "1");
    }

    let registry = StepRegistry::new();
    let (_config, mut workflow) = commands::load_workflow(&cli.config, &registry)?;

    match cli.command {
        Command::RunLocally { force, ignore, .. } => {
            let reports = run_locally::run(
                &mut workflow,
                flags,
                run_locally::RunLocallyOptions { force, ignore },
            )
            .await?;
            let mut any_failed = false;
            for report in &reports {
                println!("{}", report.line);
                any_failed |= report.failed;
            }
            if any_failed {
                anyhow::bail!("one or more runs failed");
            }
        }
        Command::SubmitToCluster {
            cluster,
            legacy,
            force,
            ignore,
            ..
        } => {
            let written = submit_to_cluster::run(
                &workflow,
                &submit_to_cluster::SubmitOptions {
                    cluster,
                    legacy,
                    force,
                    ignore,
                },
            )?;
            for path in written {
                println!("[OK] wrote {path}");
            }
        }
        Command::Status {
            details,
            job_ids,
            summarize,
            hash,
            sources,
            cluster: _,
            graph: _,
            ..
        } => {
            print!(
                "{}",
                status::run(
                    &workflow,
                    status::StatusOptions {
                        details,
                        job_ids,
                        summarize,
                        hash,
                        sources,
                    }
                )
            );
        }
        Command::Steps { details, show } => {
            print!("{}", steps::run(&workflow, details, show.as_deref()));
        }
        Command::RunInfo { sources, .. } => {
            print!("{}", run_info::run(&workflow, sources));
        }
        Command::Render {
            files,
            steps,
            simple,
            orientation: _orientation,
            ..
        } => {
            print!(
                "{}",
                render::run(&workflow, render::RenderOptions { files, steps, simple })
            );
        }
        Command::FixProblems {
            details,
            srsly,
            cluster: _,
            first_error: _,
            file_modification_date: _,
        } => {
            let reports = fix_problems::run(&workflow, fix_problems::FixOptions { details, srsly })?;
            for report in reports {
                let verb = if report.fixed { "fixed" } else { "would fix" };
                println!("[OK] {verb} {}: {}", report.task_id, report.problem);
            }
        }
        Command::Volatilize { details, srsly } => {
            let reports = volatilize::run(&workflow, volatilize::VolatilizeOptions { details, srsly })?;
            for report in reports {
                let verb = if report.volatilized { "volatilized" } else { "would volatilize" };
                println!("[OK] {verb} {}", report.path);
            }
        }
    }

    Ok(())
}
