use log::{debug, error, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep, timeout};

use crate::core::peer::{PeerRecord, PeerRegistry};
use crate::core::protocol::MessageType;
use crate::core::{Config, PeerContext};
use crate::network::dht::{DhtNode, DirectoryHandle};
use crate::network::{PeerConnection, PingHandler, Transport};
use crate::utils::{NodeUtils, Result};

/// How long the DHT gets to find its seeds at start-up.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Stops a running [`Node::serve`] loop within one accept timeout.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bound peer: listening socket plus the context its handlers run in.
pub struct Node {
    config: Config,
    context: Arc<PeerContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    connection_limit: Arc<Semaphore>,
}

impl Node {
    /// Bind the listening port and, if `dht_port` is configured, start and
    /// bootstrap a DHT directory for this peer.
    pub async fn bind(config: Config) -> Result<Self> {
        let directory = match config.dht_port {
            Some(_) => Some(Self::start_directory(&config).await?),
            None => None,
        };
        Self::with_directory(config, directory).await
    }

    /// Bind the listening port using an already running directory, or none.
    ///
    /// Failing to bind is the only fatal start-up error. A failed
    /// self-announcement is logged and the node starts anyway.
    pub async fn with_directory(config: Config, directory: Option<DirectoryHandle>) -> Result<Self> {
        config.validate()?;

        let host = config
            .host
            .clone()
            .unwrap_or_else(|| NodeUtils::local_ip().to_string());
        let listener =
            Transport::listen(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port))
                .await?;
        let local_addr = listener.local_addr()?;

        let id = config
            .peer_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", host, local_addr.port()));
        let mut identity = PeerRecord::new(id, host, local_addr.port());
        identity.capability = config.capability.clone();

        let context = Arc::new(PeerContext::new(
            identity,
            Arc::new(PeerRegistry::new(config.max_peers)),
            directory,
            config.route_timeout(),
        ));
        context.add_handler(MessageType::PING, PingHandler).await;

        if let Err(e) = context.publish_self().await {
            warn!("Could not publish {} to the directory: {}", context.my_id(), e);
        }

        info!("Peer {} bound to {}", context.my_id(), local_addr);

        Ok(Self {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            context,
            listener,
            local_addr,
            shutdown: ShutdownHandle(Arc::new(AtomicBool::new(false))),
        })
    }

    async fn start_directory(config: &Config) -> Result<DirectoryHandle> {
        let addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            config.dht_port_or_default(),
        );
        let directory = DirectoryHandle::spawn(move || async move { DhtNode::bind(addr).await }).await?;

        let mut seeds = Vec::new();
        for seed in &config.bootstrap {
            match tokio::net::lookup_host(seed.as_str()).await {
                Ok(addrs) => seeds.extend(addrs.filter(|addr| addr.is_ipv4())),
                Err(e) => warn!("Ignoring bootstrap node {}: {}", seed, e),
            }
        }

        if !seeds.is_empty() {
            match directory.bootstrap(seeds, BOOTSTRAP_TIMEOUT).await {
                Ok(()) => info!("DHT bootstrapped"),
                Err(e) => warn!("DHT bootstrap failed, continuing alone: {}", e),
            }
        }

        Ok(directory)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<PeerContext> {
        &self.context
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is triggered.
    ///
    /// Each connection gets its own task, at most `max_connections` at a
    /// time. Both waiting for a free slot and waiting for a connection are
    /// bounded by the accept timeout so the shutdown flag is seen promptly.
    pub async fn serve(self) -> Result<()> {
        let accept_timeout = self.config.accept_timeout();
        let first_frame_timeout = self.config.first_frame_timeout();
        info!("Listening for peers on {}", self.local_addr);

        while !self.shutdown.is_triggered() {
            let permit = match timeout(
                accept_timeout,
                self.connection_limit.clone().acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break,
                Err(_) => {
                    debug!("All {} connection slots busy", self.config.max_connections);
                    continue;
                }
            };

            let (stream, addr) = match timeout(accept_timeout, self.listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("Failed to accept connection: {}", e);
                    sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
                Err(_) => continue,
            };

            let context = self.context.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let conn = PeerConnection::new(None, addr, stream);
                let handling = tokio::spawn(async move {
                    context.handle_connection(conn, first_frame_timeout).await
                });
                if let Err(e) = handling.await
                    && e.is_panic()
                {
                    error!("Handler for connection from {} panicked", addr);
                }
            });
        }

        info!("Server on {} stopped", self.local_addr);
        Ok(())
    }

    /// Periodically drop peers that no longer answer a PING. Stops with the
    /// server.
    pub fn start_heartbeat(&self, every: Duration) -> JoinHandle<()> {
        let context = self.context.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if shutdown.is_triggered() {
                    break;
                }
                let dropped = context.check_live_peers().await;
                debug!(
                    "Heartbeat: {} peer(s) known, {} dropped",
                    context.registry().count().await,
                    dropped.len()
                );
            }
        })
    }
}
