//! ranksync: keeps guild roles in step with group ranks.
//!
//! # Usage
//!
//! ```text
//! ranksync run                   # daemon: timer + manual-trigger socket
//! ranksync sync [--guild <id>]   # manual trigger against a running daemon
//! ranksync once [--dry-run]      # one pass in the foreground, no daemon
//! ranksync status
//! ranksync stop
//! ranksync check-config
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check_config::CheckConfigArgs, once::OnceArgs, sync::SyncArgs};

#[derive(Parser, Debug)]
#[command(
    name = "ranksync",
    version,
    about = "Reconcile Discord guild roles against Wise Old Man group ranks",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground (recurring timer + socket server).
    Run,

    /// Ask the running daemon for an immediate pass and wait for the result.
    Sync(SyncArgs),

    /// Run a single pass in this process without a daemon.
    Once(OnceArgs),

    /// Query daemon runtime status over the Unix socket.
    Status,

    /// Request graceful daemon shutdown over the Unix socket.
    Stop,

    /// Validate the environment and print the resolved configuration.
    CheckConfig(CheckConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run => commands::daemon::run(),
        Commands::Sync(args) => args.run(),
        Commands::Once(args) => args.run(),
        Commands::Status => commands::daemon::status(),
        Commands::Stop => commands::daemon::stop(),
        Commands::CheckConfig(args) => args.run(),
    }
}
