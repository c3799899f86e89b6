use std::fmt;

use crate::utils::{P2PError, Result};

/// Number of bytes in a message type tag.
pub const TAG_LEN: usize = 4;

/// Four-byte message type tag carried at the front of every frame.
///
/// Tags are upper-cased by convention. The wire does not enforce that, so a
/// tag read off the wire keeps whatever case the sender used.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType([u8; TAG_LEN]);

impl MessageType {
    pub const PING: MessageType = MessageType(*b"PING");
    pub const PONG: MessageType = MessageType(*b"PONG");

    /// Build a tag from a string of exactly four ASCII characters.
    pub fn new(tag: &str) -> Result<Self> {
        let bytes = tag.as_bytes();
        if bytes.len() != TAG_LEN || !tag.is_ascii() {
            return Err(P2PError::InvalidMessageType(tag.to_string()));
        }

        let mut raw = [0u8; TAG_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn from_bytes(raw: [u8; TAG_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }

    pub fn to_uppercase(&self) -> Self {
        Self(self.0.map(|b| b.to_ascii_uppercase()))
    }
}

impl TryFrom<&str> for MessageType {
    type Error = P2PError;

    fn try_from(tag: &str) -> Result<Self> {
        Self::new(tag)
    }
}

impl std::str::FromStr for MessageType {
    type Err = P2PError;

    fn from_str(tag: &str) -> Result<Self> {
        Self::new(tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self)
    }
}

/// One complete, self-delimited message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    pub fn text(msg_type: MessageType, payload: &str) -> Self {
        Self::new(msg_type, payload.as_bytes())
    }

    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| P2PError::SerializationError(format!("payload is not UTF-8: {}", e)))
    }

    /// Payload as text, replacing invalid sequences. Used for logs and display.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_must_be_four_ascii_chars() {
        assert!(MessageType::new("ECHO").is_ok());
        assert!(MessageType::new("ECH").is_err());
        assert!(MessageType::new("ECHOS").is_err());
        assert!(MessageType::new("").is_err());
        // Four characters, but more than four bytes.
        assert!(MessageType::new("ÉCHO").is_err());
    }

    #[test]
    fn test_uppercase_tag() {
        let tag = MessageType::new("mlRq").unwrap();
        assert_eq!(tag.to_uppercase(), MessageType::new("MLRQ").unwrap());
        assert_eq!(tag.to_string(), "mlRq");
    }

    #[test]
    fn test_frame_payload_text() {
        let frame = Frame::text(MessageType::PING, "127.0.0.1:6000");
        assert_eq!(frame.payload_str().unwrap(), "127.0.0.1:6000");

        let binary = Frame::new(MessageType::PING, vec![0xff, 0xfe]);
        assert!(binary.payload_str().is_err());
        assert_eq!(binary.payload_lossy(), "\u{fffd}\u{fffd}");
    }
}
