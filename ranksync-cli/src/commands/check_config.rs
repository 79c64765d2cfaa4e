//! `ranksync check-config`: fail-fast validation without contacting anything.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use super::load_config;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Print the resolved configuration as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckConfigArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let roles = config.reconcile.managed_roles.names();

        if self.json {
            let payload = json!({
                "bot_token": "***",
                "wom_api_key": "***",
                "guild_id": config.guild_id.0,
                "group_id": config.group_id.0,
                "managed_roles": roles,
                "casing": config.reconcile.casing,
                "create_missing_roles": config.reconcile.create_missing_roles,
                "strip_unassigned_roles": config.reconcile.strip_unassigned_roles,
                "interval_secs": config.sync_interval.as_secs(),
                "wom_base_url": config.wom_base_url,
                "discord_base_url": config.discord_base_url,
                "socket": config.socket_path.display().to_string(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to render configuration")?
            );
            return Ok(());
        }

        println!("{} configuration is valid", "✓".green().bold());
        println!("  guild            {}", config.guild_id);
        println!("  group            {}", config.group_id);
        println!("  managed roles    {}", roles.join(", "));
        println!("  casing           {}", config.reconcile.casing);
        println!("  create missing   {}", config.reconcile.create_missing_roles);
        println!("  strip unassigned {}", config.reconcile.strip_unassigned_roles);
        println!("  interval         {}s", config.sync_interval.as_secs());
        println!("  socket           {}", config.socket_path.display());
        Ok(())
    }
}
