use std::fmt;
use std::io;

use emp_client::{EmpError, Status};
use emp_frame::FrameError;
use emp_transport::TransportError;

// Exit code constants shared with the other platform CLIs.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { .. } | TransportError::Resolve { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn emp_error(context: &str, err: EmpError) -> CliError {
    match err {
        EmpError::Io(source) => io_error(context, source),
        EmpError::Transport(err) => transport_error(context, err),
        EmpError::Frame(err) => frame_error(context, err),
        EmpError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        EmpError::Closed | EmpError::CommunicationError => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        EmpError::MalformedResponse(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        EmpError::Status(Status::NOT_PERMITTED) => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        EmpError::Status(_) | EmpError::Busy => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        EmpError::NotInitialized | EmpError::Spawn(_) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn emp_errors_map_to_exit_codes() {
        assert_eq!(
            emp_error("send", EmpError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
        assert_eq!(emp_error("send", EmpError::Closed).code, TRANSPORT_ERROR);
        assert_eq!(
            emp_error("send", EmpError::Status(Status::NOT_FOUND)).code,
            FAILURE
        );
        assert_eq!(
            emp_error("send", EmpError::MalformedResponse(1)).code,
            DATA_INVALID
        );
        let refused = TransportError::Connect {
            addr: "127.0.0.1:9".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let err = emp_error("connect failed", EmpError::Transport(refused));
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: "));
    }
}
