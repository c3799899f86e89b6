use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::node_id::NodeId;

/// A DHT node we can talk to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Contact {
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self {
            node_id,
            addr,
            last_seen: Some(Instant::now()),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Some(Instant::now());
    }

    /// Contacts received second-hand have never been seen by us and count as stale.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.last_seen
            .is_none_or(|last_seen| last_seen.elapsed() > max_age)
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.addr == other.addr
    }
}

impl Eq for Contact {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_contact_is_not_stale() {
        let contact = Contact::new(NodeId::random(), "127.0.0.1:16000".parse().unwrap());
        assert!(!contact.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_deserialized_contact_is_stale() {
        let contact = Contact::new(NodeId::random(), "127.0.0.1:16000".parse().unwrap());
        let json = serde_json::to_string(&contact).unwrap();
        let mut decoded: Contact = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, contact);
        assert!(decoded.is_stale(Duration::from_secs(60)));

        decoded.touch();
        assert!(!decoded.is_stale(Duration::from_secs(60)));
    }
}
