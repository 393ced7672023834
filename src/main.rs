use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cleanup;
mod cli;
mod context;
mod enhance;
mod process;
mod rules;
mod section;
mod special;
mod steps;
mod util;
mod workflow;

use cli::Cli;
use workflow::{Workflow, WorkflowContext};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let context = match WorkflowContext::load(cli.workspace, cli.rules.as_deref()) {
        Ok(context) => context,
        Err(err) => {
            tracing::error!(target: "site2md", "failed to initialize workspace: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut workflow = Workflow::new(context);
    if cli.skip_validation {
        workflow.skip_validation();
    }

    if workflow.run(cli.start_stage) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
