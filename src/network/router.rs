use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Duration;

use crate::core::peer::{PeerRecord, PeerRegistry};
use crate::network::dht::DirectoryHandle;
use crate::utils::Result;

pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where to open a connection for a peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl From<&PeerRecord> for Route {
    fn from(record: &PeerRecord) -> Self {
        Self {
            id: record.id.clone(),
            host: record.host.clone(),
            port: record.port,
        }
    }
}

/// Address record stored in the directory under a peer's id.
/// Older peers wrote the capability under `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub host: String,
    pub port: u16,
    #[serde(default, alias = "type")]
    pub capability: Option<String>,
}

/// Resolves peer ids: local registry first, then the directory.
pub struct Router {
    registry: Arc<PeerRegistry>,
    directory: Option<DirectoryHandle>,
    timeout: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<PeerRegistry>,
        directory: Option<DirectoryHandle>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            directory,
            timeout,
        }
    }

    pub fn directory(&self) -> Option<&DirectoryHandle> {
        self.directory.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `id` to an address, or `None`.
    ///
    /// A registry hit never touches the directory. Unknown ids, directory
    /// timeouts, an unreachable directory and unparsable records all come
    /// back as `None`.
    pub async fn resolve(&self, id: &str) -> Option<Route> {
        if let Some(record) = self.registry.get(id).await {
            return Some(Route::from(&record));
        }

        let directory = self.directory.as_ref()?;
        let raw = match directory.get(id, self.timeout).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No directory entry for {}", id);
                return None;
            }
            Err(e) => {
                debug!("Directory lookup for {} failed: {}", id, e);
                return None;
            }
        };

        let address: AddressRecord = match serde_json::from_str(&raw) {
            Ok(address) => address,
            Err(e) => {
                warn!("Malformed directory entry for {}: {}", id, e);
                return None;
            }
        };

        let record = PeerRecord {
            id: id.to_string(),
            host: address.host,
            port: address.port,
            capability: address.capability,
        };

        if !self.registry.add(record.clone()).await {
            // Someone cached this id while we were waiting; theirs wins.
            if let Some(existing) = self.registry.get(id).await {
                return Some(Route::from(&existing));
            }
            debug!("Registry full, using uncached route for {}", id);
        }

        Some(Route::from(&record))
    }

    /// Write `record` to the directory under its id so other peers can resolve it.
    pub async fn publish(&self, record: &PeerRecord) -> Result<bool> {
        let Some(directory) = &self.directory else {
            return Ok(false);
        };

        let address = AddressRecord {
            host: record.host.clone(),
            port: record.port,
            capability: record.capability.clone(),
        };
        directory
            .set(&record.id, &serde_json::to_string(&address)?, self.timeout)
            .await?;
        debug!("Published address of {}", record.id);
        Ok(true)
    }
}
