use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and inspect the self-hosted media stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: <config dir>/drydock.toml)
    #[arg(short, long, global = true, env = "DRYDOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Deployment stage, overriding the config file
    #[arg(short, long, global = true)]
    pub stage: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate the stack and show the order resources are provisioned in
    Graph,

    /// Preview what an apply would change, without calling any provider
    Plan {
        /// Preview a teardown instead
        #[arg(long)]
        destroy: bool,
    },

    /// List the resources recorded in the state file
    State {
        /// Also show recorded outputs (credentials stay masked)
        #[arg(long)]
        outputs: bool,
    },
}
