use log::{debug, info, warn};
use std::sync::Arc;

use crate::core::peer::{PeerRecord, PeerRegistry};
use crate::core::protocol::{Frame, MessageType};
use crate::network::dht::DirectoryHandle;
use crate::network::{
    HandlerTable, MessageHandler, PeerConnection, Route, Router, ServiceDirectory,
};
use crate::utils::{P2PError, Result};
use tokio::time::{Duration, timeout};

/// Everything one peer owns: its identity, known peers, handlers, router and
/// service directory. Handlers receive it explicitly, so several peers can
/// live in one process.
pub struct PeerContext {
    identity: PeerRecord,
    registry: Arc<PeerRegistry>,
    handlers: HandlerTable,
    router: Router,
    services: Option<ServiceDirectory>,
}

impl PeerContext {
    pub fn new(
        identity: PeerRecord,
        registry: Arc<PeerRegistry>,
        directory: Option<DirectoryHandle>,
        route_timeout: Duration,
    ) -> Self {
        let services = directory
            .clone()
            .map(|directory| ServiceDirectory::new(directory, route_timeout));
        let router = Router::new(registry.clone(), directory, route_timeout);

        Self {
            identity,
            registry,
            handlers: HandlerTable::new(),
            router,
            services,
        }
    }

    pub fn my_id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &PeerRecord {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn services(&self) -> Option<&ServiceDirectory> {
        self.services.as_ref()
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Register `handler` for `msg_type`, replacing any earlier one.
    pub async fn add_handler<H>(&self, msg_type: MessageType, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.register(msg_type, Arc::new(handler)).await;
    }

    /// Serve one inbound connection: read a single frame, run the matching
    /// handler, then close the connection no matter what happened.
    ///
    /// A peer that sends nothing within `read_timeout` is disconnected.
    pub async fn handle_connection(&self, mut conn: PeerConnection, read_timeout: Duration) {
        debug!("Connected {}", conn);

        match timeout(read_timeout, conn.recv()).await {
            Err(_) => debug!("No frame from {} within {:?}", conn, read_timeout),
            Ok(Some(frame)) => {
                let msg_type = frame.msg_type.to_uppercase();
                match self.handlers.get(&msg_type).await {
                    Some(handler) => {
                        debug!("Handling peer msg: {}: {}", msg_type, frame.payload_lossy());
                        if let Err(e) = handler.handle(self, &mut conn, frame.payload).await {
                            warn!("Handler for {} from {} failed: {}", msg_type, conn, e);
                        }
                    }
                    None => debug!("Not handled: {}: {}", msg_type, frame.payload_lossy()),
                }
            }
            Ok(None) => debug!("No frame received from {}", conn),
        }

        debug!("Disconnecting {}", conn);
        conn.close().await;
    }

    /// Send one frame to a logical peer id.
    ///
    /// With `await_reply`, every frame the peer writes before closing is
    /// returned in order. Routing and transport failures give an empty list.
    pub async fn send_to_peer(
        &self,
        peer_id: &str,
        msg_type: MessageType,
        payload: &[u8],
        await_reply: bool,
    ) -> Vec<Frame> {
        let Some(route) = self.router.resolve(peer_id).await else {
            debug!("Unable to route {} to {}", msg_type, peer_id);
            return Vec::new();
        };

        let frame = Frame::new(msg_type, payload);
        match self.connect_and_send(&route, &frame, await_reply).await {
            Ok(replies) => replies,
            Err(e) => {
                debug!("{} to {} failed: {}", msg_type, route.id, e);
                Vec::new()
            }
        }
    }

    /// Open a fresh connection to `route`, send `frame`, optionally collect
    /// replies until the peer closes, then close.
    pub async fn connect_and_send(
        &self,
        route: &Route,
        frame: &Frame,
        await_reply: bool,
    ) -> Result<Vec<Frame>> {
        let mut conn =
            PeerConnection::connect(Some(route.id.clone()), &route.host, route.port).await?;

        if !conn.send(frame).await {
            conn.close().await;
            return Err(P2PError::NetworkError(format!(
                "failed to send {} to {}",
                frame.msg_type, route.id
            )));
        }
        debug!("Sent {}: {}", route.id, frame.msg_type);

        let mut replies = Vec::new();
        if await_reply {
            while let Some(reply) = conn.recv().await {
                debug!("Reply from {}: {}", route.id, reply.msg_type);
                replies.push(reply);
            }
        }

        conn.close().await;
        Ok(replies)
    }

    /// Ping every known peer and drop the ones that cannot be reached.
    /// Returns the removed ids.
    pub async fn check_live_peers(&self) -> Vec<String> {
        let mut dead = Vec::new();

        for record in self.registry.records().await {
            debug!("Ping {}", record.id);
            let ping = Frame::text(MessageType::PING, self.my_id());
            if let Err(e) = self.connect_and_send(&Route::from(&record), &ping, false).await {
                debug!("{} is unreachable: {}", record.id, e);
                dead.push(record.id);
            }
        }

        if !dead.is_empty() {
            self.registry.remove_all(&dead).await;
            info!("Dropped {} dead peer(s)", dead.len());
        }
        dead
    }

    /// First peer offering `capability`: the service directory if there is
    /// one, then the local registry.
    pub async fn find_service_peer(&self, capability: &str) -> Option<String> {
        if let Some(services) = &self.services
            && let Some(id) = services.find_first(capability, self.router.timeout()).await
        {
            return Some(id);
        }
        self.registry.find_by_capability(capability).await
    }

    /// Publish our own address record and announce our capability.
    pub async fn publish_self(&self) -> Result<()> {
        if !self.router.publish(&self.identity).await? {
            return Ok(());
        }

        if let (Some(services), Some(capability)) = (&self.services, &self.identity.capability) {
            services.announce(capability, self.my_id()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::dht::MemoryDirectory;

    fn context(id: &str, directory: Option<DirectoryHandle>) -> PeerContext {
        PeerContext::new(
            PeerRecord::new(id, "127.0.0.1", 1),
            Arc::new(PeerRegistry::new(0)),
            directory,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_unroutable_peer_gives_empty_replies() {
        let ctx = context("me", None);
        let replies = ctx
            .send_to_peer("nobody", MessageType::PING, b"me", true)
            .await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_peer_gives_empty_replies() {
        let ctx = context("me", None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        ctx.registry().add_peer("gone", "127.0.0.1", port, None).await;
        let replies = ctx.send_to_peer("gone", MessageType::PING, b"", true).await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_check_live_peers_drops_unreachable() {
        let ctx = context("me", None);
        let live = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = live.local_addr().unwrap().port();
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        ctx.registry().add_peer("live", "127.0.0.1", live_port, None).await;
        ctx.registry().add_peer("dead", "127.0.0.1", dead_port, None).await;

        let removed = ctx.check_live_peers().await;
        assert_eq!(removed, vec!["dead".to_string()]);
        assert_eq!(ctx.registry().list_ids().await, vec!["live".to_string()]);
        drop(live);
    }

    #[tokio::test]
    async fn test_publish_self_announces_capability() {
        let store = MemoryDirectory::new();
        let directory = DirectoryHandle::from_backend(store.clone()).await.unwrap();
        let ctx = PeerContext::new(
            PeerRecord::new("10.0.0.1:6000", "10.0.0.1", 6000).with_capability("ml"),
            Arc::new(PeerRegistry::new(0)),
            Some(directory),
            Duration::from_secs(1),
        );

        ctx.publish_self().await.unwrap();

        assert_eq!(
            ctx.find_service_peer("ML").await.as_deref(),
            Some("10.0.0.1:6000")
        );
        let record = ctx.router().resolve("10.0.0.1:6000").await.unwrap();
        assert_eq!(record.port, 6000);
    }

    #[tokio::test]
    async fn test_find_service_peer_falls_back_to_registry() {
        let ctx = context("me", None);
        ctx.registry().add_peer("iot", "127.0.0.1", 6001, Some("IOT")).await;
        assert_eq!(ctx.find_service_peer("iot").await.as_deref(), Some("iot"));
        assert!(ctx.find_service_peer("ml").await.is_none());
    }
}
