use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{BlobStore, BlobStoreError, ContentId};

/// In-memory blob store using a HashMap
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<RwLock<HashMap<ContentId, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Vec<u8>) -> Result<ContentId, BlobStoreError> {
        let id = ContentId::for_bytes(&data);
        let mut inner = self
            .inner
            .write()
            .map_err(|e| anyhow::anyhow!("failed to acquire write lock: {}", e))?;
        inner.insert(id, Bytes::from(data));
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Bytes, BlobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| anyhow::anyhow!("failed to acquire read lock: {}", e))?;
        inner.get(id).cloned().ok_or(BlobStoreError::NotFound(*id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryBlobStore::new();
        let id = store.put(b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(id, ContentId::for_bytes(b"hello"));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"same".to_vec()).await.unwrap();
        let b = store.put(b"same".to_vec()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = MemoryBlobStore::new();
        let id = ContentId::for_bytes(b"never stored");
        assert!(matches!(
            store.get(&id).await,
            Err(BlobStoreError::NotFound(missing)) if missing == id
        ));
    }
}
