pub mod connection;
pub mod dht;
pub mod discovery;
pub mod messaging;
pub mod router;
pub mod transport;

pub use connection::PeerConnection;
pub use discovery::{ServiceDirectory, service_key};
pub use messaging::{HandlerTable, MessageHandler, PingHandler};
pub use router::{AddressRecord, Route, Router};
pub use transport::Transport;
