mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use drydock::config::Config;
use drydock::{logging, paths};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let path = match cli.config {
        Some(path) => path,
        None => paths::config_file()?,
    };
    let mut config = Config::load(&path)?;
    if let Some(stage) = cli.stage {
        config.stack.stage = stage;
    }

    match cli.command {
        Command::Graph => commands::graph(&config),
        Command::Plan { destroy } => commands::plan(&config, destroy),
        Command::State { outputs } => commands::state(&config, outputs),
    }
}
