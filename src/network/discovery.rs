//! Service discovery on top of the directory.
//!
//! Each capability maps to one directory entry, `svc:<CAPABILITY>`, holding a
//! JSON array of peer ids. Announcing is a plain read-modify-write: two peers
//! announcing the same capability at the same moment can both read the old
//! list, and the later write drops the earlier peer. Nothing here detects or
//! repairs that; a peer that matters can simply announce again.

use log::{debug, info};
use tokio::time::Duration;

use crate::network::dht::DirectoryHandle;
use crate::utils::{P2PError, Result};

const SERVICE_KEY_PREFIX: &str = "svc:";

/// Directory key for a capability. Case-insensitive on the capability name.
pub fn service_key(capability: &str) -> String {
    format!("{}{}", SERVICE_KEY_PREFIX, capability.to_uppercase())
}

pub struct ServiceDirectory {
    directory: DirectoryHandle,
    timeout: Duration,
}

impl ServiceDirectory {
    pub fn new(directory: DirectoryHandle, timeout: Duration) -> Self {
        Self { directory, timeout }
    }

    /// Every peer id announced for `capability`, in announcement order.
    /// A missing entry is an empty list.
    pub async fn providers(&self, capability: &str, timeout: Duration) -> Result<Vec<String>> {
        let key = service_key(capability);
        match self.directory.get(&key, timeout).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                P2PError::SerializationError(format!("service list {}: {}", key, e))
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Append `peer_id` to the capability's list unless it is already there.
    ///
    /// Returns `true` when the list was written. Not atomic against other
    /// announcers of the same capability.
    pub async fn announce(&self, capability: &str, peer_id: &str) -> Result<bool> {
        let key = service_key(capability);
        let mut providers = self.providers(capability, self.timeout).await?;

        if providers.iter().any(|id| id == peer_id) {
            debug!("{} already announced under {}", peer_id, key);
            return Ok(false);
        }

        providers.push(peer_id.to_string());
        self.directory
            .set(&key, &serde_json::to_string(&providers)?, self.timeout)
            .await?;

        info!("Announced {} under {} ({} providers)", peer_id, key, providers.len());
        Ok(true)
    }

    /// The first announced provider of `capability`, or `None` if there is
    /// none or the read did not finish within `timeout`. No load balancing.
    pub async fn find_first(&self, capability: &str, timeout: Duration) -> Option<String> {
        match self.providers(capability, timeout).await {
            Ok(providers) => providers.into_iter().next(),
            Err(e) => {
                debug!("Service lookup for {} failed: {}", capability, e);
                None
            }
        }
    }
}
