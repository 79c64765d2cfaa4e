//! `ranksync run|status|stop`: daemon lifecycle.

use anyhow::{Context, Result};
use serde_json::json;

use ranksync_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::{load_config, socket_path};

pub fn run() -> Result<()> {
    let config = load_config()?;
    start_blocking(config).context("daemon exited with error")
}

pub fn status() -> Result<()> {
    let socket = socket_path()?;
    let payload = match request_status(&socket) {
        Ok(status) => status,
        Err(DaemonError::DaemonNotRunning { .. }) => json!({
            "running": false,
            "socket": socket.display().to_string(),
        }),
        Err(err) => return Err(err).context("failed to query daemon status"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?
    );
    Ok(())
}

pub fn stop() -> Result<()> {
    let socket = socket_path()?;
    match request_stop(&socket) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}
