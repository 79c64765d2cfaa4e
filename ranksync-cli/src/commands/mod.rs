pub mod check_config;
pub mod daemon;
pub mod once;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use ranksync_core::config::{default_socket_path, ENV_SOCKET};
use ranksync_core::Config;

/// Loads the full configuration, failing before anything is contacted.
pub fn load_config() -> Result<Config> {
    Config::from_env().context("invalid configuration")
}

/// Socket path for client commands, which must work without credentials.
pub fn socket_path() -> Result<PathBuf> {
    match std::env::var(ENV_SOCKET) {
        Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path.trim())),
        _ => default_socket_path().context("could not determine daemon socket path"),
    }
}
