use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: command (2) + type (1) + request id (1) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the status prefix carried by every response payload.
pub const STATUS_SIZE: usize = 2;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const RESPONSE_BIT: u8 = 0x01;

/// Whether a frame carries a command (request) or the response to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Command,
    Response,
}

impl FrameKind {
    /// Classify a raw type byte. Only bit 0 is significant.
    pub fn from_type_byte(byte: u8) -> Self {
        if byte & RESPONSE_BIT == 0 {
            FrameKind::Command
        } else {
            FrameKind::Response
        }
    }

    /// The type byte written on the wire.
    pub fn type_byte(self) -> u8 {
        match self {
            FrameKind::Command => 0,
            FrameKind::Response => RESPONSE_BIT,
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: u16,
    /// Raw type byte as received; see [`Header::kind`].
    pub type_byte: u8,
    pub request_id: u8,
    pub payload_len: u32,
}

impl Header {
    pub fn kind(&self) -> FrameKind {
        FrameKind::from_type_byte(self.type_byte)
    }
}

/// One EMP message: header fields plus owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u16,
    pub kind: FrameKind,
    pub request_id: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: u16, kind: FrameKind, request_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            kind,
            request_id,
            payload: payload.into(),
        }
    }

    /// A command frame.
    pub fn command(command: u16, request_id: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(command, FrameKind::Command, request_id, payload)
    }

    /// A response frame: `status` (big-endian `i16`) followed by `body`.
    pub fn response(command: u16, request_id: u8, status: i16, body: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(STATUS_SIZE + body.len());
        payload.put_i16(status);
        payload.put_slice(body);
        Self::new(command, FrameKind::Response, request_id, payload.freeze())
    }

    /// Split a response payload into status and body.
    ///
    /// Returns `None` when the payload is too short to hold a status.
    pub fn response_status(&self) -> Option<(i16, Bytes)> {
        if self.payload.len() < STATUS_SIZE {
            return None;
        }
        let status = i16::from_be_bytes([self.payload[0], self.payload[1]]);
        Some((status, self.payload.slice(STATUS_SIZE..)))
    }

    pub fn is_response(&self) -> bool {
        self.kind == FrameKind::Response
    }

    pub fn header(&self) -> Header {
        Header {
            command: self.command,
            type_byte: self.kind.type_byte(),
            request_id: self.request_id,
            payload_len: self.payload.len() as u32,
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────┬────────────┬────────────┬──────────────────┐
/// │ Command    │ Type │ Request id │ Length     │ Payload          │
/// │ (2B BE)    │ (1B) │ (1B)       │ (4B BE)    │ (Length bytes)   │
/// └────────────┴──────┴────────────┴────────────┴──────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let payload = frame.payload.as_ref();
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16(frame.command);
    dst.put_u8(frame.kind.type_byte());
    dst.put_u8(frame.request_id);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Extract header fields. No validation beyond the fixed length.
pub fn decode_header(raw: &[u8; HEADER_SIZE]) -> Header {
    Header {
        command: u16::from_be_bytes([raw[0], raw[1]]),
        type_byte: raw[2],
        request_id: raw[3],
        payload_len: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
    }
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(raw) = src.get(..HEADER_SIZE) else {
        return Ok(None);
    };
    let mut fixed = [0u8; HEADER_SIZE];
    fixed.copy_from_slice(raw);
    let header = decode_header(&fixed);

    let payload_len = header.payload_len as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        command: header.command,
        kind: header.kind(),
        request_id: header.request_id,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
