//! farmhand — keeps a farming daemon configured, running and logging.
//!
//! # Usage
//!
//! ```text
//! farmhand [-c <config>]            # same as `farmhand run`
//! farmhand [-c <config>] run
//! farmhand [-c <config>] init
//! farmhand [-c <config>] status [--json]
//! farmhand [-c <config>] stop
//! ```
//!
//! The root directory is `$FARMHAND_ROOT`, or `~/.farmhand/mainnet`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{status::StatusArgs, FarmPaths};

#[derive(Parser, Debug)]
#[command(
    name = "farmhand",
    version,
    about = "Run a farming daemon's farmer and harvester services",
    long_about = None,
)]
struct Cli {
    /// Farmer config file. Defaults to `<root>/farmhand.yaml`.
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start or attach to the daemon, start services, relay logs until signalled.
    Run,

    /// Create or reconcile the farmer and daemon config files.
    Init,

    /// Show whether the daemon and its services are running.
    Status(StatusArgs),

    /// Ask a running daemon to exit.
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = FarmPaths::resolve(cli.config)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(&paths),
        Commands::Init => commands::init::run(&paths),
        Commands::Status(args) => args.run(&paths),
        Commands::Stop => commands::stop::run(&paths),
    }
}
