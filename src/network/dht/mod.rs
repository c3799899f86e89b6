//! Directory backends.
//!
//! The router and service directory only see [`DirectoryBackend`] through a
//! [`DirectoryHandle`]. [`DhtNode`] is the networked implementation, a
//! Kademlia-inspired store over UDP; [`MemoryDirectory`] serves single-process
//! setups and tests.

mod backend;
mod contact;
mod dht_node;
mod memory;
mod node_id;
mod routing_table;
mod rpc;

pub use backend::{DirectoryBackend, DirectoryHandle};
pub use contact::Contact;
pub use dht_node::DhtNode;
pub use memory::MemoryDirectory;
pub use node_id::NodeId;
pub use rpc::{DhtMessage, DhtPacket};

#[cfg(test)]
pub(crate) use backend::tests::{CountingDirectory, SilentDirectory};
