//! Reader Task: the one thread that reads from the Agent socket.
//!
//! Responses are routed to their waiting slot, inbound commands to a fresh
//! handler thread. A read failure fails every pending request, then the
//! connection is re-established and recovery callbacks run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use emp_frame::{Frame, FrameKind, FrameReader};
use emp_transport::EmpStream;
use tracing::{debug, error, trace, warn};

use crate::connection::{classify_read_error, ReadFailure};
use crate::context::Shared;
use crate::error::{EmpError, Result};
use crate::registry::InboundCommand;
use crate::status::Status;
use crate::table::{Failure, RequestTable, Resolution, ResolveOutcome};

pub(crate) const READER_THREAD_NAME: &str = "emp-reader";

/// Inbound command handlers that have not answered yet.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    running: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
        if *running == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until no handler is running or `timeout` passes. Returns
    /// `true` once idle.
    pub(crate) fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let running = match timeout {
            None => self
                .idle
                .wait_while(running, |running| *running > 0)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.idle
                    .wait_timeout_while(running, timeout, |running| *running > 0)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        *running == 0
    }
}

pub(crate) fn spawn(shared: Arc<Shared>, reader: FrameReader<EmpStream>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(READER_THREAD_NAME.to_string())
        .spawn(move || run(shared, reader))
        .map_err(EmpError::Spawn)
}

fn run(shared: Arc<Shared>, mut reader: FrameReader<EmpStream>) {
    debug!("reader started");
    loop {
        let err = match reader.read_frame() {
            Ok(frame) => {
                dispatch(&shared, frame);
                continue;
            }
            Err(err) => err,
        };

        if shared.connection.is_shut_down() {
            debug!("reader stopped by teardown");
            return;
        }

        let failure = match classify_read_error(&err) {
            ReadFailure::Closed => Failure::Closed,
            ReadFailure::Io(kind, message) => Failure::Io { kind, message },
        };
        warn!(error = %err, "lost connection to agent");

        // Nothing may go out on the broken socket once its waiters are failed.
        if !shared.connection.detach() {
            return;
        }
        shared.table.fail_all(failure);

        match shared.connection.reconnect() {
            Ok(fresh) => {
                reader = fresh;
                shared.table.reclaim_timed_out();
                start_recovery_callbacks(&shared);
            }
            Err(EmpError::Closed) => {
                debug!("reconnect interrupted by teardown");
                return;
            }
            Err(err) => {
                error!(error = %err, "reader giving up on agent connection");
                shared.table.fail_all(Failure::CommunicationError);
                // Late responses can no longer arrive on the dead link.
                shared.table.reclaim_timed_out();
                return;
            }
        }
    }
}

fn dispatch(shared: &Arc<Shared>, frame: Frame) {
    trace!(
        command = frame.command,
        rid = frame.request_id,
        len = frame.payload.len(),
        kind = ?frame.kind,
        "frame received"
    );
    match frame.kind {
        FrameKind::Response => {
            deliver_response(&shared.table, frame);
        }
        FrameKind::Command => dispatch_command(shared, frame),
    }
}

/// Split status and body and hand them to the waiting slot.
pub(crate) fn deliver_response(table: &RequestTable, frame: Frame) -> ResolveOutcome {
    let resolution = match frame.response_status() {
        Some((status, body)) => Resolution::Response {
            status: Status(status),
            body,
        },
        None => {
            warn!(
                command = frame.command,
                rid = frame.request_id,
                len = frame.payload.len(),
                "response too short to carry a status"
            );
            Resolution::Failed(Failure::MalformedResponse(frame.payload.len()))
        }
    };

    let outcome = table.resolve(frame.request_id, resolution);
    if outcome == ResolveOutcome::Dropped {
        debug!(command = frame.command, rid = frame.request_id, "stray response dropped");
    }
    outcome
}

fn dispatch_command(shared: &Arc<Shared>, frame: Frame) {
    let Some(handler) = shared.registry.lookup(frame.command) else {
        debug!(command = frame.command, rid = frame.request_id, "no handler, command dropped");
        return;
    };

    let command = frame.command;
    let request_id = frame.request_id;
    let inbound = InboundCommand {
        command,
        request_id,
        payload: frame.payload,
    };

    shared.handlers.enter();
    let responder = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("emp-cmd-{command}"))
        .spawn(move || {
            let status = match catch_unwind(AssertUnwindSafe(|| handler(inbound))) {
                Ok(status) => status,
                Err(_) => {
                    error!(command, rid = request_id, "command handler panicked");
                    Status::UNSPECIFIED_ERROR
                }
            };
            respond(&responder, command, request_id, status);
            responder.handlers.leave();
        });

    if let Err(err) = spawned {
        error!(command, rid = request_id, error = %err, "failed to spawn command handler");
        respond(shared, command, request_id, Status::UNSPECIFIED_ERROR);
        shared.handlers.leave();
    }
}

fn respond(shared: &Shared, command: u16, request_id: u8, status: Status) {
    let frame = Frame::response(command, request_id, status.code(), &[]);
    match shared.connection.send(&frame) {
        Ok(()) => debug!(command, rid = request_id, %status, "command answered"),
        Err(err) => warn!(command, rid = request_id, error = %err, "failed to answer command"),
    }
}

fn start_recovery_callbacks(shared: &Shared) {
    let callbacks = shared.registry.recovery_callbacks();
    debug!(count = callbacks.len(), "running recovery callbacks");
    for (index, callback) in callbacks.into_iter().enumerate() {
        let spawned = thread::Builder::new()
            .name(format!("emp-recovery-{index}"))
            .spawn(move || callback());
        if let Err(err) = spawned {
            error!(index, error = %err, "failed to spawn recovery callback");
        }
    }
}
