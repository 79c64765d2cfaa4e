//! Explicit application context handed to the worker, timer and socket tasks.

use std::sync::Arc;

use ranksync_core::Config;
use ranksync_sync::{DiscordClient, GuildDirectory, MembershipSource, WomClient};

/// Configuration plus the two remote collaborators.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub directory: Arc<dyn GuildDirectory>,
    pub membership: Arc<dyn MembershipSource>,
}

impl AppContext {
    pub fn new(
        config: Config,
        directory: Arc<dyn GuildDirectory>,
        membership: Arc<dyn MembershipSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            directory,
            membership,
        }
    }

    /// Builds the Discord and group-tracker clients from `config`.
    pub fn from_config(config: Config) -> Self {
        let directory = Arc::new(DiscordClient::from_config(&config));
        let membership = Arc::new(WomClient::from_config(&config));
        Self::new(config, directory, membership)
    }
}
