use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const ID_LEN: usize = 20;
pub const ID_BITS: usize = ID_LEN * 8;

/// 160-bit identifier shared by DHT nodes and the keys they store.
/// Keys map onto the id space through the first 160 bits of SHA-256.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    pub fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Position of a directory key in the id space.
    pub fn for_key(key: &str) -> Self {
        let hash = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&hash[..ID_LEN]);
        Self(bytes)
    }

    /// XOR distance. Compare distances with `Ord`.
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; ID_LEN];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        NodeId(result)
    }

    /// Index of the k-bucket `other` belongs in, i.e. floor(log2(distance)).
    /// `None` for our own id.
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let distance = self.distance(other);

        distance
            .0
            .iter()
            .enumerate()
            .find(|(_, byte)| **byte != 0)
            .map(|(byte_idx, byte)| {
                ID_BITS - 1 - (byte_idx * 8 + byte.leading_zeros() as usize)
            })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}
