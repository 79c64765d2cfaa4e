//! Newline-delimited JSON over the daemon's Unix socket.
//!
//! `status` and `stop` get one response line. The manual sync command gets
//! two: an immediate `deferred` acknowledgement, then the terminal result.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ranksync_core::GuildId;

use crate::error::{io_err, DaemonError};

pub const CMD_STATUS: &str = "status";
pub const CMD_STOP: &str = "stop";
/// The user-invocable manual trigger.
pub const CMD_SYNC: &str = "sync-wom-ranks";

pub const GUILD_NOT_FOUND: &str = "Guild not found!";

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// Guild the command was invoked from. Required by [`CMD_SYNC`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<u64>,
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    /// Set on the acknowledgement line that precedes a long-running result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            deferred: false,
            data: Some(data),
            error: None,
        }
    }

    pub fn deferred() -> Self {
        Self {
            ok: true,
            deferred: true,
            data: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            deferred: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Terminal answer to a manual sync.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualSyncReply {
    /// Whether the daemon acknowledged before running the pass.
    pub acknowledged: bool,
    pub message: String,
    pub report: Value,
}

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }

    UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })
}

fn write_request(
    stream: &mut UnixStream,
    socket: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))
}

fn read_response(
    reader: &mut BufReader<UnixStream>,
    socket: &Path,
) -> Result<DaemonResponse, DaemonError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let mut stream = connect(socket)?;
    write_request(&mut stream, socket, request)?;
    let mut reader = BufReader::new(stream);
    read_response(&mut reader, socket)
}

pub fn request_status(socket: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest {
        cmd: CMD_STATUS.to_string(),
        guild_id: None,
    };

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(socket, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(socket: &Path) -> Result<(), DaemonError> {
    let response = send_request(
        socket,
        &DaemonRequest {
            cmd: CMD_STOP.to_string(),
            guild_id: None,
        },
    )?;
    response_into_data(response).map(|_| ())
}

/// Invoke the manual trigger and wait for its terminal status.
pub fn request_manual_sync(
    socket: &Path,
    guild_id: Option<GuildId>,
) -> Result<ManualSyncReply, DaemonError> {
    let mut stream = connect(socket)?;
    write_request(
        &mut stream,
        socket,
        &DaemonRequest {
            cmd: CMD_SYNC.to_string(),
            guild_id: guild_id.map(|id| id.0),
        },
    )?;

    let mut reader = BufReader::new(stream);
    let mut response = read_response(&mut reader, socket)?;
    let acknowledged = response.deferred;
    if acknowledged {
        response = read_response(&mut reader, socket)?;
    }

    let data = response_into_data(response)?;
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ManualSyncReply {
        acknowledged,
        message,
        report: data.get("report").cloned().unwrap_or(Value::Null),
    })
}

/// Payload of a successful manual sync line.
pub fn manual_sync_payload(message: &str, report: Value) -> Value {
    json!({ "message": message, "report": report })
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Rejected(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
