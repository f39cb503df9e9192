use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use emp_transport::EmpStream;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames
/// whose payload length matched the header.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached,
    /// whether between frames or in the middle of one.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                trace!(
                    command = frame.command,
                    rid = frame.request_id,
                    len = frame.payload.len(),
                    "frame decoded"
                );
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

impl FrameReader<EmpStream> {
    /// Create a frame reader for `EmpStream` and apply read timeout from config.
    pub fn with_config_stream(inner: EmpStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: emp_transport::TransportError) -> FrameError {
    match err {
        emp_transport::TransportError::Io(io) | emp_transport::TransportError::Accept(io) => {
            FrameError::Io(io)
        }
        emp_transport::TransportError::Resolve { source, .. }
        | emp_transport::TransportError::Bind { source, .. }
        | emp_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, FrameKind};

    fn wire(frames: &[Frame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let bytes = wire(&[Frame::command(42, 3, &b"ping"[..])]);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.command, 42);
        assert_eq!(frame.kind, FrameKind::Command);
        assert_eq!(frame.request_id, 3);
        assert_eq!(frame.payload.as_ref(), b"ping");
    }

    #[test]
    fn read_command_and_response_interleaved() {
        let bytes = wire(&[
            Frame::response(7, 1, 0, b"one"),
            Frame::command(8, 2, &b"two"[..]),
            Frame::response(9, 3, -5, b""),
        ]);

        let mut reader = FrameReader::new(Cursor::new(bytes));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert!(f1.is_response());
        assert_eq!(f1.request_id, 1);
        assert_eq!(f2.kind, FrameKind::Command);
        assert_eq!(f2.payload.as_ref(), b"two");
        assert_eq!(f3.response_status().map(|(status, _)| status), Some(-5));
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let bytes = wire(&[Frame::command(9, 0, payload.clone())]);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.command, 9);
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[Frame::command(4, 0, &b"slow"[..])]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.command, 4);
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_u16(2);
        partial.put_u8(0);
        partial.put_u8(0);
        partial.put_u32(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_u16(1);
        bytes.put_u8(0);
        bytes.put_u8(0);
        bytes.put_u32(1024);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(bytes.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            bytes: wire(&[Frame::response(8, 5, 0, b"ok")]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.command, 8);
        assert_eq!(frame.request_id, 5);
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn reset_propagates_io_error() {
        let mut framed = FrameReader::new(ResetReader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }

    struct ResetReader;

    impl Read for ResetReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::ConnectionReset))
        }
    }

    #[test]
    fn roundtrip_over_tcp_stream() {
        let listener = emp_transport::AgentListener::bind_loopback(0).unwrap();
        let port = listener.port();

        let agent = std::thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let mut reader = FrameReader::new(stream);
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.command, 11);
            assert_eq!(frame.payload.as_ref(), b"tcp");
        });

        let stream = emp_transport::connect("127.0.0.1", port).unwrap();
        let mut writer = crate::writer::FrameWriter::new(stream);
        writer.write_frame(&Frame::command(11, 0, &b"tcp"[..])).unwrap();

        agent.join().unwrap();
    }

    #[test]
    fn applies_read_timeout_for_stream() {
        let listener = emp_transport::AgentListener::bind_loopback(0).unwrap();
        let port = listener.port();
        let client = emp_transport::connect("127.0.0.1", port).unwrap();
        let _server = listener.accept().unwrap();

        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_stream(client, cfg).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        ));
    }
}
