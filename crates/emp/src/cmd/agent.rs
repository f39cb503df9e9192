use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emp_client::Status;
use emp_frame::{Frame, FrameError, FrameKind, FrameReader, FrameWriter};
use emp_transport::AgentListener;

use crate::cmd::listen::install_ctrlc_handler;
use crate::cmd::AgentArgs;
use crate::exit::{frame_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_exchange, Exchange, OutputFormat};

pub fn run(args: AgentArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = AgentListener::bind(&args.host, args.port)
        .map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(addr = %listener.local_addr(), status = %args.status, "mock agent listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut answered = 0usize;

    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        let read_half = stream
            .try_clone()
            .map_err(|err| transport_error("accept failed", err))?;
        tracing::info!(peer = ?stream.peer_addr().ok(), "client connected");

        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(stream);

        while running.load(Ordering::SeqCst) {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(err) if is_disconnect(&err) => {
                    tracing::info!("client disconnected");
                    break;
                }
                Err(err) => return Err(frame_error("receive failed", err)),
            };

            let Some(reply) = echo_reply(&frame, args.status) else {
                tracing::debug!(
                    command = frame.command,
                    rid = frame.request_id,
                    "response from client ignored"
                );
                continue;
            };
            if let Err(err) = writer.write_frame(&reply) {
                tracing::warn!(error = %err, "failed to answer, dropping client");
                break;
            }

            let exchange = Exchange::new(
                "request",
                frame.command,
                Some(frame.request_id),
                args.status,
                &frame.payload,
            );
            print_exchange(&exchange, &frame.payload, format);
            answered = answered.saturating_add(1);

            if let Some(count) = args.count {
                if answered >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}

/// The reply the mock Agent sends for `frame`: `status` followed by the
/// request payload. Responses coming from the client get no reply.
pub(crate) fn echo_reply(frame: &Frame, status: Status) -> Option<Frame> {
    (frame.kind == FrameKind::Command).then(|| {
        Frame::response(
            frame.command,
            frame.request_id,
            status.code(),
            &frame.payload,
        )
    })
}

fn is_disconnect(err: &FrameError) -> bool {
    match err {
        FrameError::ConnectionClosed => true,
        FrameError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        ),
        FrameError::PayloadTooLarge { .. } => false,
    }
}
