//! CLI argument parsing for the conversion workflow.
//!
//! The CLI is intentionally thin: it selects a workspace and a starting
//! stage, and everything else comes from the rules file in the workspace.
use clap::Parser;
use std::path::PathBuf;

use crate::workflow::StageKind;

#[derive(Parser, Debug)]
#[command(
    name = "site2md",
    version,
    about = "Convert a legacy SSI/HTML documentation tree into a versioned Markdown site"
)]
pub struct Cli {
    /// Workspace directory for the conversion (source, interim, and output
    /// trees live under it)
    #[arg(long, value_name = "DIR", default_value = "./workspace")]
    pub workspace: PathBuf,

    /// Start from a specific stage instead of the beginning
    #[arg(long, value_enum, value_name = "STAGE")]
    pub start_stage: Option<StageKind>,

    /// Skip the validation stage
    #[arg(long)]
    pub skip_validation: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Rules file used to seed the workspace on first run (defaults to
    /// ./process.yaml)
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,
}
