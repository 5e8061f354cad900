//! Shared test utilities for document integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::blobs::{BlobStore, MemoryBlobStore};
use common::config::Config;
use common::crypto::{blind_chain, peel_chain};
use common::document::{seal_document, ChainOrder, DocumentMetadata, Metachunk, SealRequest};
use common::signer::{LocalSigner, Signer, SignerError};
use tracing_subscriber::EnvFilter;

pub const TIMESTAMP: &str = "2024-01-01T00:00:00Z";
pub const COUNTER: u64 = 42;
pub const CONTENT: &[u8] =
    b"Deed of sale, parcel 17, lots 3 through 5, signed by both parties and witnessed on 2024-01-01.";

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Set up an owner and an empty blob store
pub fn setup_test_env() -> (LocalSigner, MemoryBlobStore, Config) {
    init_tracing();
    (LocalSigner::generate(), MemoryBlobStore::new(), Config::default())
}

/// Seal [`CONTENT`] as `owner`
pub async fn seal_sample(
    owner: &dyn Signer,
    store: &MemoryBlobStore,
    config: &Config,
) -> DocumentMetadata {
    let request = SealRequest::new(TIMESTAMP, COUNTER)
        .with_file_type("text/plain")
        .with_file_extension("txt")
        .with_field("name", "deed");
    seal_document(owner, store, CONTENT, request, config)
        .await
        .unwrap()
}

pub async fn load_metachunk(store: &MemoryBlobStore, metadata: &DocumentMetadata) -> Metachunk {
    let blob = store.get(&metadata.content_id().unwrap()).await.unwrap();
    Metachunk::from_bytes(&blob).unwrap()
}

/// Store `text` and point `metadata` at it
pub async fn replace_blob(store: &MemoryBlobStore, metadata: &mut DocumentMetadata, text: String) {
    let cid = store.put(text.into_bytes()).await.unwrap();
    metadata.encrypted_file_cid = cid.to_string();
}

/// Re-blind the stored ciphertext chain of `metadata` in a different operand
/// order, the way some older clients built it
pub async fn rechain(
    store: &MemoryBlobStore,
    metadata: &mut DocumentMetadata,
    owner_operand: &str,
    order: ChainOrder,
) {
    let metachunk = load_metachunk(store, metadata).await;
    let timestamp = metadata.timestamp().unwrap();
    let counter = metadata.counter().unwrap();

    let canonical = ChainOrder::CANONICAL.knowns(owner_operand, &timestamp, &counter);
    let payload = peel_chain(&metachunk.chunk_a, &canonical).unwrap();

    let knowns = order.knowns(owner_operand, &timestamp, &counter);
    let rechained = Metachunk::new(blind_chain(&payload, &knowns), metachunk.chunk_b);
    replace_blob(store, metadata, rechained.to_text()).await;
}

/// A browser wallet: signs, but exposes neither ECDH nor `eth_decrypt`
pub struct WalletOnly(pub LocalSigner);

#[async_trait]
impl Signer for WalletOnly {
    async fn address(&self) -> Result<String, SignerError> {
        self.0.address().await
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        self.0.sign_message(message).await
    }
}

/// A wallet whose provider implements `eth_decrypt`. Payloads are plain JSON
/// with the decrypted text under `ciphertext`.
pub struct ProviderWallet(pub LocalSigner);

#[async_trait]
impl Signer for ProviderWallet {
    async fn address(&self) -> Result<String, SignerError> {
        self.0.address().await
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        self.0.sign_message(message).await
    }

    async fn provider_decrypt(&self, payload_json: &str) -> Result<String, SignerError> {
        let payload: serde_json::Value =
            serde_json::from_str(payload_json).map_err(|e| anyhow::anyhow!(e))?;
        payload["ciphertext"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SignerError::Rejected("no ciphertext".into()))
    }
}

/// A wallet that reports its address in lowercase
pub struct LowercaseWallet(pub LocalSigner);

#[async_trait]
impl Signer for LowercaseWallet {
    async fn address(&self) -> Result<String, SignerError> {
        Ok(self.0.address().await?.to_lowercase())
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        self.0.sign_message(message).await
    }
}

/// A wallet with random signing nonces: every signature over the same
/// message comes out different
pub struct FlakyWallet {
    pub inner: LocalSigner,
    calls: AtomicU64,
}

impl FlakyWallet {
    pub fn new(inner: LocalSigner) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Signer for FlakyWallet {
    async fn address(&self) -> Result<String, SignerError> {
        self.inner.address().await
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_message(&format!("{message}#{n}")).await
    }
}
