use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Duration, interval, sleep, timeout};
use uuid::Uuid;

use crate::utils::{NodeUtils, P2PError, Result};

use super::backend::DirectoryBackend;
use super::contact::Contact;
use super::node_id::NodeId;
use super::routing_table::{K, RoutingTable};
use super::rpc::{DhtMessage, DhtPacket};

/// Concurrent queries per lookup round.
const ALPHA: usize = 3;
const MAX_LOOKUP_ROUNDS: usize = 8;
const RPC_TIMEOUT: Duration = Duration::from_millis(1500);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
/// Contacts silent for this long get pinged during maintenance.
const REFRESH_AFTER: Duration = Duration::from_secs(5 * 60);
const MAX_DATAGRAM: usize = 65_507;

struct LookupResult {
    value: Option<String>,
    /// Contacts that answered, closest first.
    closest: Vec<Contact>,
}

/// Kademlia-style key-value node speaking JSON over UDP.
pub struct DhtNode {
    node_id: NodeId,
    local_addr: SocketAddr,
    routing_table: RwLock<RoutingTable>,
    storage: RwLock<HashMap<String, String>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<DhtMessage>>>,
    socket: UdpSocket,
}

impl DhtNode {
    /// Bind the UDP socket and start the listen and maintenance tasks on the
    /// current runtime.
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = NodeUtils::create_udp_socket(addr)?;
        let local_addr = socket.local_addr()?;
        let node_id = NodeId::random();

        info!("DHT node started on {} with ID: {}", local_addr, node_id);

        let node = Arc::new(Self {
            node_id,
            local_addr,
            routing_table: RwLock::new(RoutingTable::new(node_id)),
            storage: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            socket,
        });

        let listener = node.clone();
        tokio::spawn(async move { listener.listen_loop().await });
        let maintainer = node.clone();
        tokio::spawn(async move { maintainer.maintenance_loop().await });

        Ok(node)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn contact_count(&self) -> usize {
        self.routing_table.read().await.contact_count()
    }

    async fn listen_loop(&self) {
        let mut buffer = vec![0u8; MAX_DATAGRAM];

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, from)) => {
                    if let Err(e) = self.handle_datagram(&buffer[..len], from).await {
                        debug!("Error handling DHT message from {}: {}", from, e);
                    }
                }
                Err(e) => {
                    warn!("DHT socket error: {}", e);
                    sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Result<()> {
        let packet: DhtPacket = serde_json::from_slice(data)?;

        if packet.sender != self.node_id {
            self.routing_table
                .write()
                .await
                .add_contact(Contact::new(packet.sender, from));
        }

        if packet.message.is_response() {
            match self.pending.lock().await.remove(&packet.rpc_id) {
                Some(waiter) => {
                    let _ = waiter.send(packet.message);
                }
                None => debug!("Late or unsolicited DHT reply from {}", from),
            }
            return Ok(());
        }

        let reply = match packet.message {
            DhtMessage::Ping => DhtMessage::Pong,
            DhtMessage::FindNode { target } => DhtMessage::FindNodeResponse {
                contacts: self.closest(&target).await,
            },
            DhtMessage::FindValue { key } => {
                let value = self.storage.read().await.get(&key).cloned();
                match value {
                    Some(value) => DhtMessage::FindValueResponse {
                        value: Some(value),
                        contacts: Vec::new(),
                    },
                    None => DhtMessage::FindValueResponse {
                        value: None,
                        contacts: self.closest(&NodeId::for_key(&key)).await,
                    },
                }
            }
            DhtMessage::Store { key, value } => {
                debug!("Stored key {} from {}", key, packet.sender);
                self.storage.write().await.insert(key, value);
                DhtMessage::StoreResponse { success: true }
            }
            other => {
                debug!("Ignoring {:?} from {}", other, from);
                return Ok(());
            }
        };

        let response = DhtPacket {
            rpc_id: packet.rpc_id,
            sender: self.node_id,
            message: reply,
        };
        self.send_packet(&response, from).await
    }

    async fn closest(&self, target: &NodeId) -> Vec<Contact> {
        self.routing_table
            .read()
            .await
            .find_closest_contacts(target, K)
    }

    async fn send_packet(&self, packet: &DhtPacket, to: SocketAddr) -> Result<()> {
        let data = serde_json::to_vec(packet)?;
        self.socket.send_to(&data, to).await?;
        Ok(())
    }

    /// Send a request and wait for the reply carrying the same rpc id.
    async fn request(&self, to: SocketAddr, message: DhtMessage) -> Result<DhtMessage> {
        let rpc_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(rpc_id, reply_tx);

        let packet = DhtPacket {
            rpc_id,
            sender: self.node_id,
            message,
        };
        if let Err(e) = self.send_packet(&packet, to).await {
            self.pending.lock().await.remove(&rpc_id);
            return Err(e);
        }

        match timeout(RPC_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.pending.lock().await.remove(&rpc_id);
                Err(P2PError::NetworkError(format!("no DHT reply from {}", to)))
            }
        }
    }

    /// Iterative lookup towards `target`. With a key, stops at the first node
    /// holding a value for it.
    async fn lookup(self: &Arc<Self>, target: NodeId, key: Option<&str>) -> LookupResult {
        let mut shortlist = self.closest(&target).await;
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut responded: Vec<Contact> = Vec::new();

        for _ in 0..MAX_LOOKUP_ROUNDS {
            let batch: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.node_id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }

            let mut in_flight = JoinSet::new();
            for contact in batch {
                queried.insert(contact.node_id);
                let message = match key {
                    Some(key) => DhtMessage::FindValue {
                        key: key.to_string(),
                    },
                    None => DhtMessage::FindNode { target },
                };
                let node = self.clone();
                in_flight.spawn(async move {
                    let reply = node.request(contact.addr, message).await;
                    (contact, reply)
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                let Ok((contact, reply)) = joined else {
                    continue;
                };

                match reply {
                    Ok(DhtMessage::FindValueResponse {
                        value: Some(value), ..
                    }) => {
                        // Let the remaining queries finish and clear their pending slots.
                        in_flight.detach_all();
                        return LookupResult {
                            value: Some(value),
                            closest: responded,
                        };
                    }
                    Ok(
                        DhtMessage::FindValueResponse { contacts, .. }
                        | DhtMessage::FindNodeResponse { contacts },
                    ) => {
                        for found in contacts {
                            if found.node_id != self.node_id
                                && !shortlist.iter().any(|c| c.node_id == found.node_id)
                            {
                                shortlist.push(found);
                            }
                        }
                        responded.push(contact);
                    }
                    Ok(other) => debug!("Unexpected lookup reply from {}: {:?}", contact.addr, other),
                    Err(e) => {
                        debug!("Lookup query to {} failed: {}", contact.addr, e);
                        self.routing_table
                            .write()
                            .await
                            .remove_contact(&contact.node_id);
                        shortlist.retain(|c| c.node_id != contact.node_id);
                    }
                }
            }

            shortlist.sort_by_key(|c| c.node_id.distance(&target));
            shortlist.truncate(K);
        }

        responded.sort_by_key(|c| c.node_id.distance(&target));
        responded.truncate(K);
        LookupResult {
            value: None,
            closest: responded,
        }
    }

    pub async fn find_value(self: &Arc<Self>, key: &str) -> Option<String> {
        let local = self.storage.read().await.get(key).cloned();
        if local.is_some() {
            return local;
        }
        self.lookup(NodeId::for_key(key), Some(key)).await.value
    }

    /// Keep a copy locally and on the K closest nodes that answer.
    pub async fn store_value(self: &Arc<Self>, key: &str, value: &str) -> usize {
        self.storage
            .write()
            .await
            .insert(key.to_string(), value.to_string());

        let closest = self.lookup(NodeId::for_key(key), None).await.closest;
        let mut in_flight = JoinSet::new();
        for contact in closest {
            let node = self.clone();
            let message = DhtMessage::Store {
                key: key.to_string(),
                value: value.to_string(),
            };
            in_flight.spawn(async move { node.request(contact.addr, message).await });
        }

        let mut stored = 0;
        while let Some(joined) = in_flight.join_next().await {
            if matches!(joined, Ok(Ok(DhtMessage::StoreResponse { success: true }))) {
                stored += 1;
            }
        }

        debug!("Stored key {} on {} remote node(s)", key, stored);
        stored
    }

    /// Ping every seed, then look up our own id to fill the routing table.
    pub async fn join(self: &Arc<Self>, seeds: &[SocketAddr]) -> Result<()> {
        info!("Bootstrapping DHT via {} seed(s)", seeds.len());

        let mut reached = 0;
        for seed in seeds {
            match self.request(*seed, DhtMessage::Ping).await {
                Ok(DhtMessage::Pong) => reached += 1,
                Ok(other) => debug!("Unexpected reply from seed {}: {:?}", seed, other),
                Err(e) => warn!("Bootstrap seed {} unreachable: {}", seed, e),
            }
        }

        if reached == 0 && !seeds.is_empty() {
            return Err(P2PError::NetworkError(
                "no bootstrap seed answered".to_string(),
            ));
        }

        self.lookup(self.node_id, None).await;
        info!(
            "DHT bootstrapped: {} of {} seed(s) answered, {} contacts",
            reached,
            seeds.len(),
            self.contact_count().await
        );
        Ok(())
    }

    async fn maintenance_loop(&self) {
        let mut ticker = interval(MAINTENANCE_INTERVAL);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let stale: Vec<Contact> = self
                .routing_table
                .read()
                .await
                .all_contacts()
                .into_iter()
                .filter(|c| c.is_stale(REFRESH_AFTER))
                .collect();

            for contact in stale {
                if self.request(contact.addr, DhtMessage::Ping).await.is_err() {
                    debug!("Evicting unresponsive contact {}", contact.node_id);
                    self.routing_table
                        .write()
                        .await
                        .remove_contact(&contact.node_id);
                }
            }

            debug!(
                "DHT maintenance: {} contacts, {} stored values",
                self.contact_count().await,
                self.storage.read().await.len()
            );
        }
    }
}

#[async_trait]
impl DirectoryBackend for Arc<DhtNode> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.find_value(key).await)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store_value(key, value).await;
        Ok(())
    }

    async fn bootstrap(&self, seeds: &[SocketAddr]) -> Result<()> {
        self.join(seeds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn node() -> Arc<DhtNode> {
        DhtNode::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_fills_routing_tables() {
        let seed = node().await;
        let a = node().await;
        let b = node().await;

        a.join(&[seed.local_addr()]).await.unwrap();
        b.join(&[seed.local_addr()]).await.unwrap();

        assert!(seed.contact_count().await >= 2);
        assert!(b.contact_count().await >= 1);
    }

    #[tokio::test]
    async fn test_value_is_found_across_nodes() {
        let seed = node().await;
        let writer = node().await;
        writer.join(&[seed.local_addr()]).await.unwrap();

        assert!(writer.store_value("127.0.0.1:6000", "{\"host\":\"127.0.0.1\",\"port\":6000}").await >= 1);

        // Joins after the write, so nothing was pushed to it directly.
        let reader = node().await;
        reader.join(&[seed.local_addr()]).await.unwrap();

        let value = reader.find_value("127.0.0.1:6000").await;
        assert_eq!(
            value.as_deref(),
            Some("{\"host\":\"127.0.0.1\",\"port\":6000}")
        );
        assert!(reader.find_value("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_single_node_stores_locally() {
        let lonely = node().await;
        assert_eq!(lonely.store_value("svc:ML", "[\"a\"]").await, 0);
        assert_eq!(lonely.find_value("svc:ML").await.as_deref(), Some("[\"a\"]"));
    }

    #[tokio::test]
    async fn test_unreachable_seed_fails_bootstrap() {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let dead = probe.local_addr().unwrap();
        drop(probe);

        let lonely = node().await;
        assert!(lonely.join(&[dead]).await.is_err());
        assert_eq!(lonely.contact_count().await, 0);
    }
}
