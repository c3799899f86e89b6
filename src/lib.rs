//! Mini Mesh
//!
//! A small peer-to-peer messaging substrate: framed messages over TCP,
//! per-tag handlers, and peer resolution through a local registry backed by
//! a Kademlia DHT directory.

pub mod core;
pub mod network;
pub mod utils;

// Re-export main types
pub use core::{Config, Frame, MessageType, Node, PeerContext, PeerRecord, PeerRegistry};
pub use network::dht::{DhtNode, DirectoryBackend, DirectoryHandle, MemoryDirectory};
pub use network::{MessageHandler, PeerConnection, Router, ServiceDirectory};
pub use utils::{
    NodeUtils,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
