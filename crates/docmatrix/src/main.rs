mod cli;
mod config;
mod logging;
mod run;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::config::DocMatrixConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    let config = DocMatrixConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => {
            let report = run::run_project(args, &config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Extract { path, force } => run::extract(&path, force, &config),
        Command::Resolve { path, quote } => run::resolve_quote(&path, &quote, &config),
    }
}
