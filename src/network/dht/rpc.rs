use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contact::Contact;
use super::node_id::NodeId;

/// One UDP datagram. Replies echo the request's `rpc_id`.
///
/// The sender's address is taken from the datagram source, not from the
/// packet, so nodes bound to a wildcard address are still reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtPacket {
    pub rpc_id: Uuid,
    pub sender: NodeId,
    pub message: DhtMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DhtMessage {
    Ping,

    Pong,

    /// Ask for the K contacts closest to `target`.
    FindNode { target: NodeId },

    FindNodeResponse { contacts: Vec<Contact> },

    /// Ask for the value under `key`, or the closest contacts if absent.
    FindValue { key: String },

    FindValueResponse {
        value: Option<String>,
        contacts: Vec<Contact>,
    },

    Store { key: String, value: String },

    StoreResponse { success: bool },
}

impl DhtMessage {
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            DhtMessage::Ping
                | DhtMessage::FindNode { .. }
                | DhtMessage::FindValue { .. }
                | DhtMessage::Store { .. }
        )
    }

    pub fn is_response(&self) -> bool {
        !self.is_request()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_wire_shape() {
        let packet = DhtPacket {
            rpc_id: Uuid::new_v4(),
            sender: NodeId::random(),
            message: DhtMessage::Store {
                key: "svc:ML".to_string(),
                value: "[\"127.0.0.1:6000\"]".to_string(),
            },
        };

        let bytes = serde_json::to_vec(&packet).unwrap();
        let decoded: DhtPacket = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.rpc_id, packet.rpc_id);
        assert_eq!(decoded.sender, packet.sender);
        match decoded.message {
            DhtMessage::Store { key, value } => {
                assert_eq!(key, "svc:ML");
                assert_eq!(value, "[\"127.0.0.1:6000\"]");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_request_response_split() {
        assert!(DhtMessage::Ping.is_request());
        assert!(DhtMessage::FindValue { key: "k".into() }.is_request());
        assert!(DhtMessage::Pong.is_response());
        assert!(DhtMessage::StoreResponse { success: true }.is_response());
    }
}
