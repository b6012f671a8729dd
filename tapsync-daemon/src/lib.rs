//! tapsync daemon: scheduled batch runs plus a Unix-socket control surface.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_check, request_status, request_stop, request_trigger, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking, JobOutput, RunRecord};
