pub mod config;
pub mod context;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::Config;
pub use context::PeerContext;
pub use node::{Node, ShutdownHandle};
pub use peer::{PeerRecord, PeerRegistry};
pub use protocol::{Frame, MessageType};
