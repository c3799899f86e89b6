use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use mini_mesh::network::{PeerConnection, Route};
use mini_mesh::utils::setup_logging;
use mini_mesh::{Config, Frame, MessageType, Node, PeerContext, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "mini-mesh")]
#[command(about = "A peer-to-peer messaging mesh with DHT-backed routing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a peer and open its console
    Start(StartArgs),
    /// Send one frame to a peer and print the replies
    Send {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long)]
        port: u16,
        /// 4-character message type
        #[arg(short = 't', long = "type")]
        msg_type: String,
        #[arg(long, default_value = "")]
        payload: String,
        /// Do not wait for replies
        #[arg(long)]
        no_wait: bool,
        #[arg(long)]
        debug: bool,
    },
}

#[derive(Args)]
struct StartArgs {
    /// JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Advertised host (detected when omitted)
    #[arg(long)]
    host: Option<String>,
    /// Peer id (defaults to host:port)
    #[arg(long)]
    id: Option<String>,
    /// Capability this peer offers
    #[arg(long, alias = "type")]
    capability: Option<String>,
    /// Maximum cached peers, 0 for unbounded
    #[arg(long)]
    max_peers: Option<usize>,
    /// Start a DHT directory on this UDP port
    #[arg(long)]
    dht_port: Option<u16>,
    /// DHT seed node host:port (repeatable); implies a DHT on port + 10000
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// Seconds between liveness sweeps
    #[arg(long)]
    heartbeat: Option<u64>,
    #[arg(long)]
    debug: bool,
}

impl StartArgs {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if self.host.is_some() {
            config.host = self.host;
        }
        if self.id.is_some() {
            config.peer_id = self.id;
        }
        if self.capability.is_some() {
            config.capability = self.capability;
        }
        if let Some(max_peers) = self.max_peers {
            config.max_peers = max_peers;
        }
        if self.dht_port.is_some() {
            config.dht_port = self.dht_port;
        }
        if !self.bootstrap.is_empty() {
            config.bootstrap = self.bootstrap;
        }
        if !config.bootstrap.is_empty() && config.dht_port.is_none() {
            config.dht_port = Some(config.dht_port_or_default());
        }
        if self.heartbeat.is_some() {
            config.heartbeat_secs = self.heartbeat;
        }
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            let config = args.into_config()?;
            setup_logging(config.debug);
            run_peer(config).await?;
        }
        Commands::Send {
            host,
            port,
            msg_type,
            payload,
            no_wait,
            debug,
        } => {
            setup_logging(debug);
            let msg_type = MessageType::new(&msg_type)?;
            let mut conn = PeerConnection::connect(None, &host, port).await?;

            if !conn.send(&Frame::text(msg_type, &payload)).await {
                warn!("Failed to send {} to {}:{}", msg_type, host, port);
            } else if !no_wait {
                while let Some(reply) = conn.recv().await {
                    println!("{}: {}", reply.msg_type, reply.payload_lossy());
                }
            }
            conn.close().await;
        }
    }

    Ok(())
}

async fn run_peer(config: Config) -> Result<()> {
    let heartbeat = config.heartbeat_interval();
    let node = Node::bind(config).await?;
    let context = node.context().clone();
    let shutdown = node.shutdown_handle();

    if let Some(every) = heartbeat {
        node.start_heartbeat(every);
    }

    println!("Peer {} listening on {}", context.my_id(), node.local_addr());
    let serving = tokio::spawn(node.serve());

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&context, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    shutdown.trigger();
    match serving.await {
        Ok(result) => result,
        Err(e) => {
            warn!("Server task ended abnormally: {}", e);
            Ok(())
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  add <id> <host> <port> [capability]  remember a peer");
    println!("  list                                 known peers");
    println!("  ping <id>                            ping a peer");
    println!("  send <id> <type> [payload]           send a frame and print replies");
    println!("  find <capability>                    first peer offering a capability");
    println!("  announce                             publish this peer to the directory");
    println!("  heartbeat                            drop peers that do not answer");
    println!("  help | quit");
}

/// Returns `false` when the console should exit.
async fn run_command(context: &Arc<PeerContext>, line: &str) -> bool {
    let mut parts = line.splitn(4, ' ').filter(|part| !part.is_empty());
    let Some(command) = parts.next() else {
        return true;
    };

    match command.to_lowercase().as_str() {
        "add" => {
            let id = parts.next();
            let host = parts.next();
            let rest: Vec<&str> = parts.flat_map(|part| part.split_whitespace()).collect();
            let port = rest.first().and_then(|port| port.parse::<u16>().ok());
            match (id, host, port) {
                (Some(id), Some(host), Some(port)) => {
                    let capability = rest.get(1).copied();
                    if context.registry().add_peer(id, host, port, capability).await {
                        println!("Added {}", id);
                    } else {
                        println!("Not added: {} already known or registry full", id);
                    }
                }
                _ => println!("usage: add <id> <host> <port> [capability]"),
            }
        }
        "list" => {
            let records = context.registry().records().await;
            if records.is_empty() {
                println!("No known peers");
            }
            for record in records {
                println!(
                    "  {} -> {}:{} {}",
                    record.id,
                    record.host,
                    record.port,
                    record.capability.as_deref().unwrap_or("")
                );
            }
        }
        "ping" => match parts.next() {
            Some(id) => {
                let replies = context
                    .send_to_peer(id, MessageType::PING, context.my_id().as_bytes(), true)
                    .await;
                match replies.first() {
                    Some(pong) => println!("{} is alive ({})", id, pong.payload_lossy()),
                    None => println!("No answer from {}", id),
                }
            }
            None => println!("usage: ping <id>"),
        },
        "send" => {
            let id = parts.next();
            let msg_type = parts.next().map(MessageType::new);
            let payload = parts.next().unwrap_or("");
            match (id, msg_type) {
                (Some(id), Some(Ok(msg_type))) => {
                    let replies = context
                        .send_to_peer(id, msg_type, payload.as_bytes(), true)
                        .await;
                    if replies.is_empty() {
                        println!("No reply from {}", id);
                    }
                    for reply in replies {
                        println!("{}: {}", reply.msg_type, reply.payload_lossy());
                    }
                }
                (Some(_), Some(Err(e))) => println!("{}", e),
                _ => println!("usage: send <id> <type> [payload]"),
            }
        }
        "find" => match parts.next() {
            Some(capability) => match context.find_service_peer(capability).await {
                Some(id) => match context.router().resolve(&id).await {
                    Some(Route { host, port, .. }) => println!("{} at {}:{}", id, host, port),
                    None => println!("{} (address unknown)", id),
                },
                None => println!("Nobody offers {}", capability),
            },
            None => println!("usage: find <capability>"),
        },
        "announce" => match context.publish_self().await {
            Ok(()) if context.router().directory().is_some() => println!("Announced"),
            Ok(()) => println!("No directory configured"),
            Err(e) => println!("Announce failed: {}", e),
        },
        "heartbeat" => {
            let dropped = context.check_live_peers().await;
            println!("Dropped {} peer(s): {:?}", dropped.len(), dropped);
        }
        "help" => print_help(),
        "quit" | "exit" => return false,
        other => println!("Unknown command {}, try help", other),
    }

    true
}
