//! Error types for ranksync-sync.

use thiserror::Error;

use ranksync_core::GuildId;

/// Failures talking to the guild directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Non-2xx answer from the directory.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Connection, TLS or timeout failure before a status was received.
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The response body did not match the expected shape.
    #[error("could not decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// A snowflake field was not a decimal integer.
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
}

/// Failures reading the membership source. Never surfaced past
/// [`crate::MembershipSource::fetch_members`]; kept for logging and tests.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("membership source returned HTTP {status}")]
    Http { status: u16 },

    #[error("membership source transport error: {0}")]
    Transport(String),

    #[error("membership payload could not be decoded: {0}")]
    Decode(String),
}

/// Errors that end a pass before any member is evaluated.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("guild {0} not found")]
    GuildNotFound(GuildId),

    #[error("guild directory error: {0}")]
    Directory(#[from] DirectoryError),
}
