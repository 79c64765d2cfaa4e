//! `ranksync sync`: invoke the daemon's manual trigger.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use ranksync_core::GuildId;
use ranksync_daemon::{request_manual_sync, DaemonError};

use super::{load_config, socket_path};

/// Arguments for `ranksync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Guild to run in. Defaults to `DISCORD_GUILD_ID`.
    #[arg(long)]
    pub guild: Option<u64>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let socket = socket_path()?;
        let guild = match self.guild {
            Some(id) => GuildId(id),
            None => load_config()?.guild_id,
        };

        match request_manual_sync(&socket, Some(guild)) {
            Ok(reply) => {
                if reply.acknowledged {
                    println!("{}", "sync-wom-ranks acknowledged".bright_black());
                }
                let ok = reply.report["outcome"] == "completed"
                    || reply.report["outcome"] == "no_membership_data";
                if ok {
                    println!("{} {}", "✓".green().bold(), reply.message);
                } else {
                    println!("{} {}", "✗".yellow().bold(), reply.message);
                }
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { socket }) => {
                bail!("daemon is not running (no socket at {})", socket.display())
            }
            Err(DaemonError::Rejected(message)) => bail!("{message}"),
            Err(err) => Err(err).context("manual sync failed"),
        }
    }
}
