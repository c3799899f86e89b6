//! The directory backend and the driver thread that runs it.
//!
//! A backend is an eventually consistent string key-value store. It runs on
//! its own OS thread with its own runtime; callers hold a cheap
//! [`DirectoryHandle`] and talk to it through a command channel, waiting on a
//! oneshot reply with a deadline. A request that misses its deadline is
//! abandoned by the caller while the backend may still finish it; that late
//! result is dropped with the reply channel.

use async_trait::async_trait;
use log::{debug, error};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, timeout};

use crate::utils::{P2PError, Result};

#[async_trait]
pub trait DirectoryBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Join the network through known seed nodes.
    async fn bootstrap(&self, _seeds: &[SocketAddr]) -> Result<()> {
        Ok(())
    }
}

enum DirectoryCommand {
    Get {
        key: String,
        reply: oneshot::Sender<Result<Option<String>>>,
    },
    Set {
        key: String,
        value: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Bootstrap {
        seeds: Vec<SocketAddr>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to a running directory driver. The driver stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct DirectoryHandle {
    cmd_tx: mpsc::UnboundedSender<DirectoryCommand>,
}

impl DirectoryHandle {
    /// Start a driver thread and build the backend on it.
    ///
    /// The backend is constructed inside the driver's runtime so that any
    /// sockets or tasks it creates belong to that runtime.
    pub async fn spawn<F, Fut, B>(make_backend: F) -> Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<B>>,
        B: DirectoryBackend,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        std::thread::Builder::new()
            .name("directory-driver".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(P2PError::DirectoryUnavailable(format!(
                            "failed to build driver runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let backend = match make_backend().await {
                        Ok(backend) => Arc::new(backend),
                        Err(e) => {
                            error!("Directory backend failed to start: {}", e);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    let _ = ready_tx.send(Ok(()));
                    Self::drive(backend, cmd_rx).await;
                });

                debug!("Directory driver stopped");
            })
            .map_err(|e| {
                P2PError::DirectoryUnavailable(format!("failed to start driver thread: {}", e))
            })?;

        ready_rx.await.map_err(|_| {
            P2PError::DirectoryUnavailable("driver exited during start-up".to_string())
        })??;

        Ok(Self { cmd_tx })
    }

    /// Run an already constructed backend on a driver thread.
    pub async fn from_backend<B: DirectoryBackend>(backend: B) -> Result<Self> {
        Self::spawn(move || async move { Ok::<_, P2PError>(backend) }).await
    }

    async fn drive<B: DirectoryBackend>(
        backend: Arc<B>,
        mut cmd_rx: mpsc::UnboundedReceiver<DirectoryCommand>,
    ) {
        while let Some(command) = cmd_rx.recv().await {
            let backend = backend.clone();
            // One task per request so a slow lookup never holds up the queue.
            tokio::spawn(async move {
                match command {
                    DirectoryCommand::Get { key, reply } => {
                        let _ = reply.send(backend.get(&key).await);
                    }
                    DirectoryCommand::Set { key, value, reply } => {
                        let _ = reply.send(backend.set(&key, &value).await);
                    }
                    DirectoryCommand::Bootstrap { seeds, reply } => {
                        let _ = reply.send(backend.bootstrap(&seeds).await);
                    }
                }
            });
        }
    }

    pub async fn get(&self, key: &str, wait: Duration) -> Result<Option<String>> {
        let (reply, reply_rx) = oneshot::channel();
        self.submit(DirectoryCommand::Get {
            key: key.to_string(),
            reply,
        })?;
        Self::await_reply(reply_rx, wait).await
    }

    pub async fn set(&self, key: &str, value: &str, wait: Duration) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.submit(DirectoryCommand::Set {
            key: key.to_string(),
            value: value.to_string(),
            reply,
        })?;
        Self::await_reply(reply_rx, wait).await
    }

    pub async fn bootstrap(&self, seeds: Vec<SocketAddr>, wait: Duration) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.submit(DirectoryCommand::Bootstrap { seeds, reply })?;
        Self::await_reply(reply_rx, wait).await
    }

    fn submit(&self, command: DirectoryCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| P2PError::DirectoryUnavailable("driver has stopped".to_string()))
    }

    async fn await_reply<T>(reply_rx: oneshot::Receiver<Result<T>>, wait: Duration) -> Result<T> {
        match timeout(wait, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(P2PError::DirectoryUnavailable(
                "driver dropped the request".to_string(),
            )),
            Err(_) => Err(P2PError::DirectoryTimeout(wait.as_millis())),
        }
    }
}
