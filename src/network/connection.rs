use log::debug;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::core::protocol::{Frame, MessageType};
use crate::network::Transport;
use crate::utils::Result;

/// One live socket plus the identity of whoever is on the other end.
///
/// Inbound connections have no known peer id; outbound ones carry the id
/// the caller resolved.
pub struct PeerConnection {
    peer_id: Option<String>,
    addr: SocketAddr,
    stream: TcpStream,
}

impl PeerConnection {
    pub fn new(peer_id: Option<String>, addr: SocketAddr, stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        Self {
            peer_id,
            addr,
            stream,
        }
    }

    pub async fn connect(peer_id: Option<String>, host: &str, port: u16) -> Result<Self> {
        let stream = Transport::connect(host, port).await?;
        let addr = stream.peer_addr()?;
        Ok(Self::new(peer_id, addr, stream))
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send one frame. Failures are logged and reported as `false`.
    pub async fn send(&mut self, frame: &Frame) -> bool {
        match Transport::write_frame(&mut self.stream, frame).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Send {} to {} failed: {}", frame.msg_type, self, e);
                false
            }
        }
    }

    pub async fn send_text(&mut self, msg_type: MessageType, payload: &str) -> bool {
        self.send(&Frame::text(msg_type, payload)).await
    }

    /// Receive one frame, or `None` at end of stream.
    ///
    /// Read errors and truncated frames are reported the same way as a clean
    /// close; only the log line tells them apart.
    pub async fn recv(&mut self) -> Option<Frame> {
        match Transport::read_frame(&mut self.stream).await {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                debug!("{} closed the stream", self);
                None
            }
            Err(e) => {
                debug!("Receive from {} failed: {}", self, e);
                None
            }
        }
    }

    /// Shut down the write half and drop the socket.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error closing connection to {}: {}", self.addr, e);
        }
    }
}

impl fmt::Display for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer_id {
            Some(id) => write!(f, "|{}| ({})", id, self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (PeerConnection, PeerConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (client, accepted) = tokio::join!(
            PeerConnection::connect(Some("server".to_string()), "127.0.0.1", port),
            listener.accept()
        );
        let (stream, addr) = accepted.unwrap();
        (client.unwrap(), PeerConnection::new(None, addr, stream))
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (mut client, mut server) = pair().await;
        let echo = MessageType::new("ECHO").unwrap();

        assert!(client.send_text(echo, "one").await);
        assert!(client.send_text(echo, "two").await);
        client.close().await;

        assert_eq!(server.recv().await, Some(Frame::text(echo, "one")));
        assert_eq!(server.recv().await, Some(Frame::text(echo, "two")));
        assert_eq!(server.recv().await, None);
    }

    #[tokio::test]
    async fn test_truncated_frame_reads_as_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let mut raw = TcpStream::connect(addr).await.unwrap();
            // Declares 10 payload bytes, sends 3.
            raw.write_all(b"ECHO\x00\x00\x00\x0aabc").await.unwrap();
            raw.shutdown().await.unwrap();
        });

        let (stream, peer) = listener.accept().await.unwrap();
        let mut conn = PeerConnection::new(None, peer, stream);
        writer.await.unwrap();

        assert_eq!(conn.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_failure_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(PeerConnection::connect(None, "127.0.0.1", port).await.is_err());
    }

    #[tokio::test]
    async fn test_display_includes_identity() {
        let (client, server) = pair().await;
        assert!(client.to_string().starts_with("|server|"));
        assert_eq!(server.to_string(), server.addr().to_string());
    }
}
