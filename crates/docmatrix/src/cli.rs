use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "docmatrix",
    about = "Answer a matrix of documents × questions with verifiable citations"
)]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// Optional YAML settings file; `DOCMATRIX_*` variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a project's matrix, or one row, column or cell of it.
    Run(RunArgs),
    /// Extract (or reuse cached) text for one document.
    Extract {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Locate a quote inside a document and print the citation as JSON.
    Resolve {
        path: PathBuf,
        #[arg(long)]
        quote: String,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long)]
    pub project: PathBuf,
    #[arg(long, conflicts_with_all = ["column", "cell"])]
    pub row: Option<String>,
    #[arg(long, conflicts_with = "cell")]
    pub column: Option<String>,
    /// `<document>:<column id>`
    #[arg(long)]
    pub cell: Option<String>,
    /// `parallel` or `row_wise`
    #[arg(long)]
    pub mode: Option<String>,
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Named request preset for cell questions, e.g. `quick_analysis`.
    #[arg(long)]
    pub preset: Option<String>,
}
