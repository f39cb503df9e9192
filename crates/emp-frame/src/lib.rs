//! EMP frame codec.
//!
//! Every message exchanged with the Agent is framed with an 8-byte header:
//! - A 2-byte big-endian command id
//! - A type byte whose low bit tells a response (1) from a command (0)
//! - A 1-byte request id correlating a response with its request
//! - A 4-byte big-endian payload length
//!
//! Response payloads start with a big-endian `i16` status. Everything else
//! about the payload is opaque to this layer.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::EmpCodec;
pub use codec::{
    decode_frame, decode_header, encode_frame, Frame, FrameConfig, FrameKind, Header,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, STATUS_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
