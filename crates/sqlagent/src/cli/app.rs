use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    ask::AskArgs, measures::MeasuresArgs, resume::ResumeArgs, sql::SqlArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "sqlagent",
    version,
    about = "Natural-language risk measure queries with human-confirmed, read-only SQL"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Settings file; defaults to `config.yaml` in the working directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `sqlagent=debug`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask a question in plain language.
    Ask(AskArgs),
    /// Continue a query suspended at a confirmation gate.
    Resume(ResumeArgs),
    /// Inspect and manage measure configs.
    Measures(MeasuresArgs),
    /// Validate or assemble SQL without the language model.
    Sql(SqlArgs),
}
