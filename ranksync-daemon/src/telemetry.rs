//! Process-wide tracing subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Set to `json` for one JSON object per log line.
pub const LOG_FORMAT_ENV: &str = "RANKSYNC_LOG_FORMAT";

/// Installs the global subscriber once; later calls are no-ops.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Logs go to stderr.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
