use log::{debug, info};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};

use crate::core::protocol::{Frame, MessageType, TAG_LEN};
use crate::utils::{NodeUtils, P2PError, Result};

/// Upper bound on a declared payload length.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame layout: 4-byte tag, u32 big-endian length, payload.
pub struct Transport;

impl Transport {
    pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| P2PError::ConnectionFailed(format!("Timed out connecting to {}", addr)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    pub async fn listen(addr: SocketAddr) -> Result<TcpListener> {
        let listener = NodeUtils::create_server_listener(addr)?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
        if frame.payload.len() > MAX_FRAME_LEN {
            return Err(P2PError::MessageTooLarge(frame.payload.len()));
        }
        let len = frame.payload.len() as u32;

        let mut buf = Vec::with_capacity(TAG_LEN + 4 + frame.payload.len());
        buf.extend_from_slice(frame.msg_type.as_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&frame.payload);
        Ok(buf)
    }

    /// Write one frame with a single buffered write.
    pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = Self::encode(frame)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame.
    ///
    /// `Ok(None)` means the stream closed cleanly between frames. A stream
    /// that ends after some but not all bytes of a frame is an error, never a
    /// short payload.
    pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let mut tag = [0u8; TAG_LEN];
        let first = reader.read(&mut tag[..1]).await?;
        if first == 0 {
            return Ok(None);
        }

        reader
            .read_exact(&mut tag[1..])
            .await
            .map_err(|e| P2PError::TruncatedFrame(format!("message type: {}", e)))?;

        let len = reader
            .read_u32()
            .await
            .map_err(|e| P2PError::TruncatedFrame(format!("length: {}", e)))? as usize;

        if len > MAX_FRAME_LEN {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| P2PError::TruncatedFrame(format!("payload of {} bytes: {}", len, e)))?;

        Ok(Some(Frame::new(MessageType::from_bytes(tag), payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: &str, payload: &[u8]) -> Frame {
        Frame::new(MessageType::new(tag).unwrap(), payload.to_vec())
    }

    #[test]
    fn test_encode_layout() {
        let bytes = Transport::encode(&frame("ECHO", b"hi")).unwrap();
        assert_eq!(bytes, b"ECHO\x00\x00\x00\x02hi");
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let cases = [
            frame("ECHO", b"hi"),
            frame("MLRQ", b""),
            frame("bcrq", "STORE {\"k\": \"\u{00e9}\"}".as_bytes()),
            frame("IORS", &[0u8, 1, 2, 255, 254, 10, 13]),
        ];

        let mut wire = Vec::new();
        for f in &cases {
            Transport::write_frame(&mut wire, f).await.unwrap();
        }

        let mut reader = wire.as_slice();
        for expected in &cases {
            let got = Transport::read_frame(&mut reader).await.unwrap();
            assert_eq!(got.as_ref(), Some(expected));
        }
        assert!(Transport::read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_not_delivered() {
        let full = Transport::encode(&frame("ECHO", b"hello world")).unwrap();

        for cut in 1..full.len() {
            let mut reader = &full[..cut];
            let result = Transport::read_frame(&mut reader).await;
            assert!(
                matches!(result, Err(P2PError::TruncatedFrame(_))),
                "cut at {} returned {:?}",
                cut,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_empty_stream_is_end_of_stream() {
        let mut reader: &[u8] = &[];
        assert!(Transport::read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut wire = b"ECHO".to_vec();
        wire.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let mut reader = wire.as_slice();
        assert!(matches!(
            Transport::read_frame(&mut reader).await,
            Err(P2PError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_rejects_what_peers_would_drop() {
        let at_limit = Frame::new(MessageType::PING, vec![0u8; MAX_FRAME_LEN]);
        assert_eq!(
            Transport::encode(&at_limit).unwrap().len(),
            TAG_LEN + 4 + MAX_FRAME_LEN
        );

        let over = Frame::new(MessageType::PING, vec![0u8; MAX_FRAME_LEN + 1]);
        assert!(matches!(
            Transport::encode(&over),
            Err(P2PError::MessageTooLarge(n)) if n == MAX_FRAME_LEN + 1
        ));
    }
}
