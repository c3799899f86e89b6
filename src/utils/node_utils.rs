use crate::utils::{P2PError, Result};
use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::{Duration, sleep};

const LISTEN_BACKLOG: i32 = 5;

pub struct NodeUtils;

impl NodeUtils {
    /// Determine the address of the interface used for outbound traffic.
    ///
    /// Connecting a UDP socket only selects a route; no packet is sent.
    pub fn local_ip() -> IpAddr {
        let probe = || -> std::io::Result<IpAddr> {
            let socket = StdUdpSocket::bind("0.0.0.0:0")?;
            socket.connect("8.8.8.8:80")?;
            Ok(socket.local_addr()?.ip())
        };

        match probe() {
            Ok(ip) if !ip.is_unspecified() => ip,
            Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Err(e) => {
                debug!("Could not detect outbound interface, using loopback: {}", e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    /// Create a TCP listener with SO_REUSEADDR and a small accept backlog.
    pub fn create_server_listener(addr: SocketAddr) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))?;
        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))?;

        TcpListener::from_std(socket.into())
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))
    }

    /// UDP socket for the DHT. No address reuse: a second peer on the same
    /// port must fail to bind rather than share its datagrams.
    pub fn create_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::BindFailed(format!("{}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set nonblocking: {}", e)))?;

        UdpSocket::from_std(socket.into()).map_err(|e| {
            P2PError::NetworkError(format!("Failed to convert to tokio socket: {}", e))
        })
    }

    /// Wait for a port to be ready (listening)
    pub async fn wait_for_port_ready(addr: SocketAddr, timeout_duration: Duration) -> bool {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout_duration {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }
}
