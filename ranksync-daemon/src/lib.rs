//! ranksync daemon: pass worker, recurring timer, manual-trigger socket.

pub mod context;
mod error;
pub mod protocol;
mod runtime;
pub mod scheduler;
pub mod telemetry;

pub use context::AppContext;
pub use error::DaemonError;
pub use protocol::{
    request_manual_sync, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse, ManualSyncReply,
};
pub use runtime::{start_blocking, App, ShutdownHandle};
pub use scheduler::{PassFailure, SyncTimer, TriggerSource};
