//! Two peers in one process: A serves a custom ECHO handler, B sends to it.

use async_trait::async_trait;
use mini_mesh::utils::setup_logging;
use mini_mesh::{Config, Frame, MessageHandler, MessageType, Node, PeerConnection, PeerContext};

struct Echo;

#[async_trait]
impl MessageHandler for Echo {
    async fn handle(
        &self,
        ctx: &PeerContext,
        conn: &mut PeerConnection,
        payload: Vec<u8>,
    ) -> mini_mesh::Result<()> {
        println!("{} echoing {} bytes", ctx.my_id(), payload.len());
        conn.send(&Frame::new(MessageType::new("ECHO")?, payload)).await;
        Ok(())
    }
}

fn local(id: &str) -> Config {
    Config {
        port: 0,
        host: Some("127.0.0.1".to_string()),
        peer_id: Some(id.to_string()),
        ..Config::default()
    }
}

#[tokio::main]
async fn main() -> mini_mesh::Result<()> {
    setup_logging(false);

    println!("Echo Demo");
    println!("=========");

    let a = Node::bind(local("peer-a")).await?;
    a.context().add_handler(MessageType::new("ECHO")?, Echo).await;
    let a_port = a.local_addr().port();
    let shutdown = a.shutdown_handle();
    let serving = tokio::spawn(a.serve());

    let b = Node::bind(local("peer-b")).await?;
    b.context()
        .registry()
        .add_peer("peer-a", "127.0.0.1", a_port, None)
        .await;

    let replies = b
        .context()
        .send_to_peer("peer-a", MessageType::new("echo")?, b"hello mesh", true)
        .await;
    for reply in &replies {
        println!("reply {}: {}", reply.msg_type, reply.payload_lossy());
    }

    shutdown.trigger();
    if let Ok(result) = serving.await {
        result?;
    }
    Ok(())
}
