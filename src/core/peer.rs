use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Address card for one peer as this node knows it.
///
/// Records learned through the directory are cached copies and may go stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub capability: Option<String>,
}

impl PeerRecord {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            capability: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }
}

/// Table of known peers keyed by peer id.
///
/// Every access, read or write, goes through one mutex. Records are never
/// updated in place: re-adding an id fails and leaves the first record alone.
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, PeerRecord>>,
    max_peers: usize,
}

impl PeerRegistry {
    /// `max_peers == 0` means unbounded.
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            max_peers,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    fn at_capacity(&self, len: usize) -> bool {
        self.max_peers > 0 && len >= self.max_peers
    }

    /// Insert a record. Returns false if the id is already known or the
    /// registry is full; state is untouched in both cases.
    pub async fn add(&self, record: PeerRecord) -> bool {
        let mut peers = self.peers.lock().await;

        if peers.contains_key(&record.id) {
            debug!("Peer {} already known, not replacing", record.id);
            return false;
        }
        if self.at_capacity(peers.len()) {
            debug!(
                "Registry full ({} peers), rejecting {}",
                self.max_peers, record.id
            );
            return false;
        }

        info!(
            "Added peer: {} @ {}:{} ({})",
            record.id,
            record.host,
            record.port,
            peers.len() + 1
        );
        peers.insert(record.id.clone(), record);
        true
    }

    pub async fn add_peer(
        &self,
        id: &str,
        host: &str,
        port: u16,
        capability: Option<&str>,
    ) -> bool {
        let mut record = PeerRecord::new(id, host, port);
        record.capability = capability.map(str::to_string);
        self.add(record).await
    }

    /// Remove a peer. Absent ids are ignored.
    pub async fn remove(&self, id: &str) {
        let mut peers = self.peers.lock().await;
        if peers.remove(id).is_some() {
            info!("Removed peer: {} ({})", id, peers.len());
        }
    }

    /// Remove several peers under one lock acquisition.
    pub async fn remove_all(&self, ids: &[String]) {
        let mut peers = self.peers.lock().await;
        for id in ids {
            if peers.remove(id).is_some() {
                info!("Removed peer: {} ({})", id, peers.len());
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<PeerRecord> {
        self.peers.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.peers.lock().await.contains_key(id)
    }

    /// Snapshot of known ids. Order carries no meaning.
    pub async fn list_ids(&self) -> Vec<String> {
        self.peers.lock().await.keys().cloned().collect()
    }

    /// Snapshot of all records.
    pub async fn records(&self) -> Vec<PeerRecord> {
        self.peers.lock().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_full(&self) -> bool {
        let peers = self.peers.lock().await;
        self.at_capacity(peers.len())
    }

    /// First known peer advertising `capability` (case-insensitive).
    pub async fn find_by_capability(&self, capability: &str) -> Option<String> {
        let peers = self.peers.lock().await;
        let mut matches: Vec<&PeerRecord> = peers
            .values()
            .filter(|p| {
                p.capability
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(capability))
            })
            .collect();
        // HashMap order is arbitrary; pick deterministically.
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.first().map(|p| p.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_get_remove() {
        let registry = PeerRegistry::new(0);
        assert!(registry.add_peer("a", "10.0.0.1", 6000, Some("ML")).await);

        let record = registry.get("a").await.unwrap();
        assert_eq!(record.host, "10.0.0.1");
        assert_eq!(record.port, 6000);
        assert_eq!(record.capability.as_deref(), Some("ML"));

        registry.remove("a").await;
        registry.remove("a").await;
        assert!(registry.get("a").await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_add_is_not_an_update() {
        let registry = PeerRegistry::new(0);
        assert!(registry.add_peer("a", "10.0.0.1", 6000, None).await);
        assert!(!registry.add_peer("a", "10.0.0.2", 7000, Some("BC")).await);

        let record = registry.get("a").await.unwrap();
        assert_eq!(record, PeerRecord::new("a", "10.0.0.1", 6000));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let max = 3;
        let registry = PeerRegistry::new(max);

        for i in 0..max {
            assert!(registry.add_peer(&format!("p{}", i), "h", 1, None).await);
        }
        assert!(registry.is_full().await);
        assert!(!registry.add_peer("overflow", "h", 1, None).await);
        assert!(registry.get("overflow").await.is_none());
        assert_eq!(registry.count().await, max);

        registry.remove("p0").await;
        assert!(!registry.is_full().await);
        assert!(registry.add_peer("overflow", "h", 1, None).await);
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_capacity() {
        let registry = Arc::new(PeerRegistry::new(5));
        let mut tasks = Vec::new();
        for i in 0..50 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.add_peer(&format!("p{}", i), "h", 1, None).await
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(registry.count().await, 5);
    }

    #[tokio::test]
    async fn test_unbounded_registry_never_full() {
        let registry = PeerRegistry::new(0);
        for i in 0..100 {
            assert!(registry.add_peer(&format!("p{}", i), "h", 1, None).await);
        }
        assert!(!registry.is_full().await);
        assert_eq!(registry.list_ids().await.len(), 100);
    }

    #[tokio::test]
    async fn test_find_by_capability() {
        let registry = PeerRegistry::new(0);
        registry.add_peer("iot-1", "h", 1, Some("IOT")).await;
        registry.add_peer("ml-2", "h", 2, Some("ML")).await;
        registry.add_peer("ml-1", "h", 3, Some("ml")).await;
        registry.add_peer("plain", "h", 4, None).await;

        assert_eq!(registry.find_by_capability("ML").await.as_deref(), Some("ml-1"));
        assert_eq!(registry.find_by_capability("iot").await.as_deref(), Some("iot-1"));
        assert!(registry.find_by_capability("BC").await.is_none());
    }
}
