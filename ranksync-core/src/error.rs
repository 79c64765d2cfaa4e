//! Error types for ranksync-core.

use thiserror::Error;

/// Errors raised while loading configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset, empty, or still holds a placeholder.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A variable is present but cannot be parsed.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// `dirs::home_dir()` returned `None` and no socket path was configured.
    #[error("cannot determine home directory; set $HOME or RANKSYNC_SOCKET")]
    HomeNotFound,
}
