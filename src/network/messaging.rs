use async_trait::async_trait;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::PeerContext;
use crate::core::protocol::MessageType;
use crate::network::PeerConnection;
use crate::utils::Result;

/// Handles one inbound frame type.
///
/// The handler gets the open connection and may write any number of reply
/// frames to it. The connection is closed after `handle` returns, whether it
/// succeeded or not.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &PeerContext,
        conn: &mut PeerConnection,
        payload: Vec<u8>,
    ) -> Result<()>;
}

/// Tag to handler mapping. Tags are stored upper-cased.
///
/// Registering a tag that already has a handler replaces it (last
/// registration wins); the replacement is logged, not rejected.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler previously registered for the tag, if any.
    pub async fn register(
        &self,
        msg_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let msg_type = msg_type.to_uppercase();
        let previous = self.handlers.write().await.insert(msg_type, handler);
        if previous.is_some() {
            warn!("Handler for {} replaced", msg_type);
        } else {
            debug!("Handler registered for {}", msg_type);
        }
        previous
    }

    pub async fn get(&self, msg_type: &MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .await
            .get(&msg_type.to_uppercase())
            .cloned()
    }

    pub async fn tags(&self) -> Vec<MessageType> {
        self.handlers.read().await.keys().copied().collect()
    }
}

/// Answers `PING` with one `PONG` frame carrying this peer's id.
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(
        &self,
        ctx: &PeerContext,
        conn: &mut PeerConnection,
        payload: Vec<u8>,
    ) -> Result<()> {
        debug!(
            "Ping from {} ({})",
            String::from_utf8_lossy(&payload),
            conn.addr()
        );
        conn.send_text(MessageType::PONG, ctx.my_id()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl MessageHandler for Named {
        async fn handle(
            &self,
            _ctx: &PeerContext,
            conn: &mut PeerConnection,
            _payload: Vec<u8>,
        ) -> Result<()> {
            conn.send_text(MessageType::new("NAME")?, self.0).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tags_are_case_insensitive() {
        let table = HandlerTable::new();
        table
            .register(MessageType::new("echo").unwrap(), Arc::new(Named("a")))
            .await;

        assert!(table.get(&MessageType::new("ECHO").unwrap()).await.is_some());
        assert!(table.get(&MessageType::new("Echo").unwrap()).await.is_some());
        assert!(table.get(&MessageType::new("PING").unwrap()).await.is_none());
        assert_eq!(table.tags().await, vec![MessageType::new("ECHO").unwrap()]);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let table = HandlerTable::new();
        let tag = MessageType::new("MLRQ").unwrap();
        let first: Arc<dyn MessageHandler> = Arc::new(Named("first"));
        let second: Arc<dyn MessageHandler> = Arc::new(Named("second"));

        assert!(table.register(tag, first.clone()).await.is_none());
        let replaced = table.register(tag, second.clone()).await.unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&table.get(&tag).await.unwrap(), &second));
    }
}
