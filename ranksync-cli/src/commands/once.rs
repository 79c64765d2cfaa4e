//! `ranksync once`: one foreground pass, optionally without mutations.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use ranksync_daemon::{telemetry, AppContext};
use ranksync_sync::{pipeline, DryRun, GuildDirectory, PassReport};

use super::load_config;

/// Arguments for `ranksync once`.
#[derive(Args, Debug)]
pub struct OnceArgs {
    /// Log the role changes a pass would make without applying them.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the pass report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl OnceArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        telemetry::init_tracing();

        let ctx = AppContext::from_config(config);
        ctx.directory
            .current_user()
            .context("failed to log in to Discord")?;

        let guild_id = ctx.config.guild_id;
        let settings = &ctx.config.reconcile;
        let dry_run = DryRun::new(ctx.directory.as_ref());
        let directory: &dyn GuildDirectory = if self.dry_run {
            &dry_run
        } else {
            ctx.directory.as_ref()
        };
        let report = pipeline::run(directory, ctx.membership.as_ref(), guild_id, settings)
            .with_context(|| format!("pass failed for guild {guild_id}"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render pass report")?
            );
        } else {
            print_report(&report, self.dry_run);
        }
        Ok(())
    }
}

fn print_report(report: &PassReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    println!("{prefix}{}", report.user_message());
    println!(
        "  {} updated, {} stripped, {} unmatched, {} skipped",
        report.updated.to_string().green(),
        report.stripped,
        report.unmatched,
        report.skipped,
    );
    if !report.roles_created.is_empty() {
        println!("  roles created: {}", report.roles_created.join(", "));
    }
    if report.failures > 0 {
        println!("  {} failed directory call(s)", report.failures.to_string().red().bold());
    }
}
