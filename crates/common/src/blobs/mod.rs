//! Content-addressed storage for sealed metachunks
//!
//! The envelope only needs `put` and `get`; where the bytes actually live
//! (IPFS, a bucket, a local directory) is up to the embedding application.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use multihash::Multihash;
use serde::{Deserialize, Serialize};

mod memory;

pub use memory::MemoryBlobStore;

/// Size of a BLAKE3 digest in bytes
pub const CONTENT_ID_SIZE: usize = 32;

/// Multicodec code for raw bytes
pub const RAW_CODEC: u64 = 0x55;
/// Multihash code for BLAKE3-256
pub const BLAKE3_CODE: u64 = 0x1e;

const IPFS_SCHEME: &str = "ipfs://";

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("blob not found: {0}")]
    NotFound(ContentId),
    #[error("invalid content id: {0}")]
    InvalidContentId(String),
}

/// Identifier of a stored blob, as an IPFS CID
///
/// Anything pinned to IPFS (`Qm…` v0 or `bafy…` v1) parses as-is. Blobs
/// written by [`MemoryBlobStore`] get a v1 raw CID over their BLAKE3 digest.
/// Parsing tolerates surrounding whitespace and an `ipfs://` prefix, and
/// reads a bare 64-char hex string as that BLAKE3 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Cid);

impl ContentId {
    pub fn for_bytes(data: &[u8]) -> Self {
        Self::from_blake3(*blake3::hash(data).as_bytes())
    }

    fn from_blake3(digest: [u8; CONTENT_ID_SIZE]) -> Self {
        // a 32-byte digest always fits the 64-byte multihash
        let hash = Multihash::<64>::wrap(BLAKE3_CODE, &digest)
            .expect("blake3 digest fits in a multihash");
        ContentId(Cid::new_v1(RAW_CODEC, hash))
    }

    pub fn cid(&self) -> &Cid {
        &self.0
    }

    /// Raw multihash digest
    pub fn bytes(&self) -> &[u8] {
        self.0.hash().digest()
    }
}

impl From<Cid> for ContentId {
    fn from(cid: Cid) -> Self {
        ContentId(cid)
    }
}

impl From<ContentId> for Cid {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentId {
    type Err = BlobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix(IPFS_SCHEME).unwrap_or(s);
        if s.len() == CONTENT_ID_SIZE * 2 {
            let mut buff = [0u8; CONTENT_ID_SIZE];
            if hex::decode_to_slice(s, &mut buff).is_ok() {
                return Ok(Self::from_blake3(buff));
            }
        }
        Cid::try_from(s)
            .map(ContentId)
            .map_err(|_| BlobStoreError::InvalidContentId(s.to_string()))
    }
}

impl Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data`, returning its content id. Storing the same bytes twice
    /// yields the same id.
    async fn put(&self, data: Vec<u8>) -> Result<ContentId, BlobStoreError>;

    /// Fetch the bytes stored under `id`
    async fn get(&self, id: &ContentId) -> Result<Bytes, BlobStoreError>;
}

#[cfg(test)]
mod test {
    use super::*;

    const PINNED_V0: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const PINNED_V1: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    #[test]
    fn test_content_id_parse_forms() {
        let id = ContentId::for_bytes(b"metachunk");
        let text = id.to_string();

        assert!(text.starts_with('b'));
        assert_eq!(id.cid().codec(), RAW_CODEC);
        assert_eq!(id.cid().hash().code(), BLAKE3_CODE);
        assert_eq!(id.bytes(), blake3::hash(b"metachunk").as_bytes());
        assert_eq!(text.parse::<ContentId>().unwrap(), id);
        assert_eq!(format!("ipfs://{text}").parse::<ContentId>().unwrap(), id);
        assert_eq!(format!("  {text}\n").parse::<ContentId>().unwrap(), id);
        assert!("ipfs://not-a-cid".parse::<ContentId>().is_err());
    }

    #[test]
    fn test_content_id_pinned_cids() {
        let v0: ContentId = format!("ipfs://{PINNED_V0}").parse().unwrap();
        assert_eq!(v0.to_string(), PINNED_V0);
        assert_eq!(v0.cid().version(), cid::Version::V0);

        let v1: ContentId = format!(" {PINNED_V1} ").parse().unwrap();
        assert_eq!(v1.to_string(), PINNED_V1);
        assert_eq!(v1.cid().version(), cid::Version::V1);
    }

    #[test]
    fn test_content_id_bare_digest() {
        let digest = blake3::hash(b"metachunk");
        let id: ContentId = hex::encode(digest.as_bytes()).parse().unwrap();
        assert_eq!(id, ContentId::for_bytes(b"metachunk"));
    }

    #[test]
    fn test_content_id_serde() {
        let id = ContentId::for_bytes(b"metachunk");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
