use std::io;
use std::time::Duration;

use emp_frame::FrameError;
use emp_transport::TransportError;

use crate::status::Status;

/// Errors surfaced by the EMP client.
#[derive(Debug, thiserror::Error)]
pub enum EmpError {
    /// No live connection: `init` was never called or every consumer tore down.
    #[error("emp client not initialized")]
    NotInitialized,

    /// All 64 request ids are in flight.
    #[error("no free request slot")]
    Busy,

    /// Socket failure other than an orderly close.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The Agent closed or reset the connection.
    #[error("connection to agent closed")]
    Closed,

    /// No response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection is gone and every reconnect attempt failed.
    #[error("agent unreachable: reconnect attempts exhausted")]
    CommunicationError,

    /// A response payload too short to carry a status.
    #[error("malformed response: {0} byte payload")]
    MalformedResponse(usize),

    /// The Agent answered with a non-zero status.
    #[error("agent returned {0}")]
    Status(Status),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A reader, handler or recovery thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Spawn(io::Error),
}

impl EmpError {
    /// Map this error into the Agent's return-code space.
    pub fn status(&self) -> Status {
        match self {
            EmpError::NotInitialized => Status::NOT_INITIALIZED,
            EmpError::Busy => Status::BUSY,
            EmpError::Io(_) => Status::IO_ERROR,
            EmpError::Closed => Status::CLOSED,
            EmpError::Timeout(_) => Status::TIMEOUT,
            EmpError::CommunicationError => Status::COMMUNICATION_ERROR,
            EmpError::MalformedResponse(_) => Status::UNSPECIFIED_ERROR,
            EmpError::Status(status) => *status,
            EmpError::Transport(TransportError::Connect { .. } | TransportError::Resolve { .. }) => {
                Status::COMMUNICATION_ERROR
            }
            EmpError::Transport(_) => Status::IO_ERROR,
            EmpError::Frame(FrameError::PayloadTooLarge { .. }) => Status::OUT_OF_RANGE,
            EmpError::Frame(FrameError::ConnectionClosed) => Status::CLOSED,
            EmpError::Frame(FrameError::Io(_)) => Status::IO_ERROR,
            EmpError::Spawn(_) => Status::UNSPECIFIED_ERROR,
        }
    }

    /// True for failures of the link itself, as opposed to a refused request.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EmpError::Io(_)
                | EmpError::Closed
                | EmpError::CommunicationError
                | EmpError::Transport(_)
                | EmpError::Frame(FrameError::ConnectionClosed | FrameError::Io(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, EmpError>;
