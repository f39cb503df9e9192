//! `tokio_util::codec` adapter for EMP frames.
//!
//! Wraps [`decode_frame`] / [`encode_frame`] so frames can be driven through
//! `Framed` on any `AsyncRead + AsyncWrite` transport.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

#[derive(Debug, Clone)]
pub struct EmpCodec {
    max_payload_size: usize,
}

impl EmpCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for EmpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for EmpCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for EmpCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if frame.payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::FrameKind;

    #[tokio::test]
    async fn framed_duplex_exchange() {
        let (client, agent) = tokio::io::duplex(1024);
        let mut outbound = FramedWrite::new(client, EmpCodec::default());
        let mut inbound = FramedRead::new(agent, EmpCodec::default());

        outbound
            .send(Frame::command(42, 0, &b"ping"[..]))
            .await
            .unwrap();
        outbound
            .send(Frame::response(42, 0, 0, b"pong"))
            .await
            .unwrap();

        let first = inbound.next().await.unwrap().unwrap();
        assert_eq!(first.kind, FrameKind::Command);
        assert_eq!(first.payload.as_ref(), b"ping");

        let second = inbound.next().await.unwrap().unwrap();
        assert_eq!(second.response_status().map(|(s, b)| (s, b.to_vec())), Some((0, b"pong".to_vec())));
    }

    #[tokio::test]
    async fn truncated_stream_reports_closed() {
        let (mut client, agent) = tokio::io::duplex(64);
        let mut inbound = FramedRead::new(agent, EmpCodec::default());

        client.write_all(&[0x00, 0x2a, 0x00, 0x00, 0x00]).await.unwrap();
        drop(client);

        let err = inbound.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = EmpCodec::new(2);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::command(1, 0, &b"abc"[..]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 3, max: 2 }));
        assert!(dst.is_empty());
    }
}
