//! Length-prefixed text frames.
//!
//! ```text
//! [length: u32 big endian] [payload: `length` bytes of UTF-8]
//! ```
//!
//! The prefix counts payload bytes only. A zero length or a length above the
//! configured maximum is rejected before anything is allocated.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// 64 KiB, the limit used by the default deployment.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors produced while framing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// An outgoing payload does not fit in a frame.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer sent a frame that breaks the framing rules.
    #[error("Protocol violation: {0}")]
    Violation(String),

    /// The stream ended before a complete frame was read.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// `true` when the peer simply went away. Every protocol error ends the
    /// session, but only these are expected.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed)
    }

    /// `true` when the peer broke the framing rules.
    pub fn is_violation(&self) -> bool {
        matches!(self, ProtocolError::Violation(_) | ProtocolError::MessageTooLarge { .. })
    }

    fn from_io(err: std::io::Error) -> Self {
        if is_peer_gone(&err) {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(err)
        }
    }
}

/// `true` for I/O failures that mean the peer went away.
pub fn is_peer_gone(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// Frame codec bound to a maximum payload size.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encodes `message` into a complete frame.
    pub fn encode(&self, message: &str) -> Result<Vec<u8>, ProtocolError> {
        let payload = message.as_bytes();
        if payload.len() > self.max_message_size || payload.len() > u32::MAX as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Decodes one frame from the start of `buf`.
    ///
    /// Returns the message and the number of bytes consumed, or `None` when
    /// `buf` does not hold a complete frame yet.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(String, usize)>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = self.check_length([buf[0], buf[1], buf[2], buf[3]])?;
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let text = Self::to_text(buf[HEADER_LEN..HEADER_LEN + len].to_vec())?;
        Ok(Some((text, HEADER_LEN + len)))
    }

    /// Encodes `message` and writes it to `writer`, then flushes.
    ///
    /// Nothing is written when the message is too large. A peer that reset
    /// the connection yields [`ProtocolError::ConnectionClosed`].
    pub async fn write_frame<W>(&self, writer: &mut W, message: &str) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = self.encode(message)?;
        writer.write_all(&frame).await.map_err(ProtocolError::from_io)?;
        writer.flush().await.map_err(ProtocolError::from_io)?;
        Ok(())
    }

    /// Reads exactly one frame from `reader`.
    ///
    /// A stream that ends or is reset anywhere inside the frame yields
    /// [`ProtocolError::ConnectionClosed`]; partial payloads are never returned.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<String, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .await
            .map_err(ProtocolError::from_io)?;
        let len = self.check_length(header)?;

        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(ProtocolError::from_io)?;
        Self::to_text(payload)
    }

    fn check_length(&self, header: [u8; HEADER_LEN]) -> Result<usize, ProtocolError> {
        let len = u32::from_be_bytes(header) as usize;
        if len == 0 {
            return Err(ProtocolError::Violation("empty frame".into()));
        }
        if len > self.max_message_size {
            return Err(ProtocolError::Violation(format!(
                "declared length {} exceeds maximum {}",
                len, self.max_message_size
            )));
        }
        Ok(len)
    }

    fn to_text(payload: Vec<u8>) -> Result<String, ProtocolError> {
        String::from_utf8(payload)
            .map_err(|e| ProtocolError::Violation(format!("payload is not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_encode_layout() {
        let codec = FrameCodec::default();
        let frame = codec.encode("LISTAR_PACIENTES").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 16]);
        assert_eq!(&frame[4..], b"LISTAR_PACIENTES");
    }

    #[test]
    fn test_encode_counts_utf8_bytes() {
        let codec = FrameCodec::default();
        let frame = codec.encode("Peña").unwrap();
        assert_eq!(u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]), 5);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = FrameCodec::new(8);
        let result = codec.encode("ñññññ");
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_decode_incomplete_buffer() {
        let codec = FrameCodec::default();
        let frame = codec.encode("RESULTADO: ok").unwrap();
        assert!(codec.decode(&frame[..3]).unwrap().is_none());
        assert!(codec.decode(&frame[..frame.len() - 1]).unwrap().is_none());
        let (text, used) = codec.decode(&frame).unwrap().unwrap();
        assert_eq!(text, "RESULTADO: ok");
        assert_eq!(used, frame.len());
    }

    #[test]
    fn test_decode_rejects_zero_length() {
        let codec = FrameCodec::default();
        assert!(matches!(
            codec.decode(&[0, 0, 0, 0]),
            Err(ProtocolError::Violation(_))
        ));
    }

    #[tokio::test]
    async fn test_round_trip_over_stream() {
        let codec = FrameCodec::default();
        let (mut client, mut server) = duplex(1024);

        codec.write_frame(&mut client, "ENVIAR_MUESTRA:123|ATCG").await.unwrap();
        codec.write_frame(&mut client, "Diagnóstico").await.unwrap();

        assert_eq!(codec.read_frame(&mut server).await.unwrap(), "ENVIAR_MUESTRA:123|ATCG");
        assert_eq!(codec.read_frame(&mut server).await.unwrap(), "Diagnóstico");
    }

    #[tokio::test]
    async fn test_oversized_write_sends_nothing() {
        let codec = FrameCodec::new(4);
        let mut sink: Vec<u8> = Vec::new();
        let result = codec.write_frame(&mut sink, "too long").await;
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_declaration() {
        let codec = FrameCodec::new(16);
        let mut input: &[u8] = &[0, 0, 1, 0, b'A'];
        let result = codec.read_frame(&mut input).await;
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let codec = FrameCodec::default();
        let mut input: &[u8] = &[0, 0, 0, 10, b'A', b'T', b'C'];
        let result = codec.read_frame(&mut input).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_clean_eof_is_connection_closed() {
        let codec = FrameCodec::default();
        let mut input: &[u8] = &[];
        let result = codec.read_frame(&mut input).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_violation() {
        let codec = FrameCodec::default();
        let mut input: &[u8] = &[0, 0, 0, 2, 0xC3, 0x28];
        let result = codec.read_frame(&mut input).await;
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn test_error_classification() {
        assert!(ProtocolError::ConnectionClosed.is_disconnect());
        assert!(!ProtocolError::ConnectionClosed.is_violation());
        assert!(ProtocolError::Violation("x".into()).is_violation());
        assert!(ProtocolError::MessageTooLarge { size: 2, max: 1 }.is_violation());
        let io = ProtocolError::from_io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!io.is_disconnect() && !io.is_violation());
        for kind in [
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::BrokenPipe,
        ] {
            assert!(ProtocolError::from_io(kind.into()).is_disconnect());
        }
    }

    struct BrokenPipeWriter;

    impl AsyncWrite for BrokenPipeWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_to_reset_peer_is_connection_closed() {
        let codec = FrameCodec::default();
        let result = codec.write_frame(&mut BrokenPipeWriter, "OK").await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
