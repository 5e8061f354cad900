use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::entry::{WrappedDeks, WrappedEntry};
use super::metachunk::Metachunk;
use super::metadata::{
    DocumentMetadata, COUNTER, FILE_EXTENSION, FILE_SIZE, FILE_TYPE, OWNER_NAME,
    TOKENIZATION_DATE,
};
use super::recovery::{owner_ciphertext, ChainOrder};
use super::DocumentError;
use crate::blobs::BlobStore;
use crate::config::Config;
use crate::crypto::{
    blind_chain, combine, normalize_address, Dek, DocumentNonce, KeyWrapError,
    KeyWrappingService, PublicKey,
};
use crate::signer::Signer;

/// Base64 SHA-256 of the plaintext, the value hidden in `chunk_b`
pub(crate) fn content_hash(plaintext: &[u8]) -> String {
    BASE64.encode(Sha256::digest(plaintext))
}

/// Base64 HMAC-SHA256 of the ciphertext keyed by owner and timestamp,
/// the operand `chunk_b` is blinded against
pub(crate) fn integrity_tag(owner: &str, timestamp: &str, ciphertext: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(format!("{owner}{timestamp}").as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(ciphertext);
    BASE64.encode(mac.finalize().into_bytes())
}

fn ciphertext_checksum(ciphertext: &[u8]) -> String {
    BASE64.encode(Sha256::digest(ciphertext))
}

/// Blind `ciphertext` against the document attributes and pair it with the
/// blinded integrity hashes
fn blind(
    owner: &str,
    timestamp: &str,
    counter: &str,
    ciphertext: &[u8],
    plaintext: &[u8],
) -> Metachunk {
    let knowns = ChainOrder::CANONICAL.knowns(owner, timestamp, counter);
    let chunk_a = blind_chain(&BASE64.encode(ciphertext), &knowns);
    let chunk_b = combine(
        &content_hash(plaintext),
        &integrity_tag(owner, timestamp, ciphertext),
    );
    Metachunk::new(chunk_a, chunk_b)
}

/// Encrypt and blind `plaintext`, store the metachunk, and wrap the fresh
/// DEK for `owner`. Returns the owner's wrapped entry alongside the cid and
/// ciphertext checksum.
async fn seal_content(
    owner: &dyn Signer,
    owner_address: &str,
    store: &dyn BlobStore,
    plaintext: &[u8],
    timestamp: &str,
    counter: u64,
    config: &Config,
) -> Result<(DocumentNonce, WrappedEntry, String, String), DocumentError> {
    let nonce = DocumentNonce::derive(owner_address, timestamp, counter);
    let dek = Dek::generate();
    let ciphertext = dek.encrypt(&nonce, plaintext)?;

    let metachunk = blind(
        owner_address,
        timestamp,
        &counter.to_string(),
        &ciphertext,
        plaintext,
    );
    let cid = store.put(metachunk.to_text().into_bytes()).await?;
    tracing::debug!(%cid, ciphertext_len = ciphertext.len(), "stored metachunk");

    let wrap = KeyWrappingService::new(config)
        .wrap_self(owner, &dek, &nonce)
        .await?;
    let mut entry = WrappedEntry::new(&wrap.wrapped_dek);
    entry.dek_sha256_b64 = Some(wrap.dek_sha256_b64);

    Ok((nonce, entry, cid.to_string(), ciphertext_checksum(&ciphertext)))
}

/// What to seal a new document with
#[derive(Debug, Clone, Default)]
pub struct SealRequest {
    /// Value of the `Tokenization Date` attribute, a chain operand
    pub timestamp: String,
    /// Version counter, a chain operand
    pub counter: u64,
    pub file_type: Option<String>,
    pub file_extension: Option<String>,
    pub owner_name: Option<String>,
    /// Free-form metadata fields (name, description, ...)
    pub extra: Map<String, Value>,
}

impl SealRequest {
    pub fn new(timestamp: impl Into<String>, counter: u64) -> Self {
        Self {
            timestamp: timestamp.into(),
            counter,
            ..Default::default()
        }
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = Some(extension.into());
        self
    }

    pub fn with_owner_name(mut self, name: impl Into<String>) -> Self {
        self.owner_name = Some(name.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Seal `plaintext` as a new document owned by `signer`.
///
/// The metachunk goes to `store`; the returned metadata references it and
/// holds the owner's self-wrapped DEK.
pub async fn seal_document(
    signer: &dyn Signer,
    store: &dyn BlobStore,
    plaintext: &[u8],
    request: SealRequest,
    config: &Config,
) -> Result<DocumentMetadata, DocumentError> {
    let owner = signer.address().await?;
    let (nonce, entry, cid, checksum) = seal_content(
        signer,
        &owner,
        store,
        plaintext,
        &request.timestamp,
        request.counter,
        config,
    )
    .await?;

    let mut metadata = DocumentMetadata {
        encrypted_file_cid: cid,
        nonce: Some(nonce.to_hex()),
        wrapped_deks: WrappedDeks::new(),
        attributes: Vec::new(),
        encrypted_data_sha256_b64: Some(checksum),
        extra: request.extra,
    };
    metadata.wrapped_deks.insert(&owner, entry);
    metadata.set_attribute(TOKENIZATION_DATE, request.timestamp);
    metadata.set_attribute(COUNTER, request.counter.to_string());
    metadata.set_attribute(FILE_SIZE, plaintext.len().to_string());
    if let Some(file_type) = request.file_type {
        metadata.set_attribute(FILE_TYPE, file_type);
    }
    if let Some(extension) = request.file_extension {
        metadata.set_attribute(FILE_EXTENSION, extension);
    }
    if let Some(name) = request.owner_name {
        metadata.set_attribute(OWNER_NAME, name);
    }

    tracing::info!(
        owner = %normalize_address(&owner),
        cid = %metadata.encrypted_file_cid,
        "sealed document"
    );
    Ok(metadata)
}

/// Changes applied when sealing a new version
#[derive(Debug, Clone, Default)]
pub struct ResealRequest {
    /// Counter of the new version. Defaults to the previous one plus one.
    pub counter: Option<u64>,
    pub file_type: Option<String>,
    pub file_extension: Option<String>,
}

/// Seal `plaintext` as the next version of `metadata`'s document.
///
/// The timestamp and descriptive attributes carry over. The DEK, nonce and
/// metachunk are all new, so entries shared with other holders are dropped.
pub async fn reseal_document(
    signer: &dyn Signer,
    store: &dyn BlobStore,
    metadata: &DocumentMetadata,
    plaintext: &[u8],
    request: ResealRequest,
    config: &Config,
) -> Result<DocumentMetadata, DocumentError> {
    let owner = signer.address().await?;
    match metadata.wrapped_deks.find(&owner) {
        Some((_, entry)) if entry.is_self_wrapped() => {}
        _ => {
            return Err(DocumentError::AccessDenied {
                address: normalize_address(&owner),
            })
        }
    }

    let timestamp = metadata.timestamp()?;
    let counter = match request.counter {
        Some(counter) => counter,
        None => metadata.counter_value()?.saturating_add(1),
    };

    let (nonce, entry, cid, checksum) =
        seal_content(signer, &owner, store, plaintext, &timestamp, counter, config).await?;

    let mut next = metadata.clone();
    let dropped = next.wrapped_deks.len().saturating_sub(1);
    next.wrapped_deks.retain_only(&owner);
    next.wrapped_deks.insert(&owner, entry);
    next.encrypted_file_cid = cid;
    next.nonce = Some(nonce.to_hex());
    next.encrypted_data_sha256_b64 = Some(checksum);
    next.set_attribute(COUNTER, counter.to_string());
    next.set_attribute(FILE_SIZE, plaintext.len().to_string());
    if let Some(file_type) = request.file_type {
        next.set_attribute(FILE_TYPE, file_type);
    }
    if let Some(extension) = request.file_extension {
        next.set_attribute(FILE_EXTENSION, extension);
    }

    if dropped > 0 {
        tracing::warn!(dropped, "resealed document, shared entries no longer apply");
    }
    tracing::info!(counter, cid = %next.encrypted_file_cid, "resealed document");
    Ok(next)
}

async fn holder_dek(
    signer: &dyn Signer,
    metadata: &DocumentMetadata,
    config: &Config,
) -> Result<(String, Dek, DocumentNonce), DocumentError> {
    let address = signer.address().await?;
    let (_, entry) = metadata
        .wrapped_deks
        .find(&address)
        .ok_or_else(|| DocumentError::AccessDenied {
            address: normalize_address(&address),
        })?;
    let nonce = metadata.nonce_for(entry)?;

    let dek = KeyWrappingService::new(config)
        .unwrap(signer, &entry.scheme(), &entry.wrapped_dek_bytes()?, &nonce)
        .await?;

    if let Some(expected) = &entry.dek_sha256_b64 {
        let actual = dek.checksum();
        if &actual != expected {
            return Err(DocumentError::KeyMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok((address, dek, nonce))
}

/// Unwrap the DEK of `metadata`'s document as the holder behind `signer`,
/// checking it against the entry's checksum.
pub async fn owner_dek(
    signer: &dyn Signer,
    metadata: &DocumentMetadata,
    config: &Config,
) -> Result<Dek, DocumentError> {
    let (_, dek, _) = holder_dek(signer, metadata, config).await?;
    Ok(dek)
}

/// How a shared DEK is wrapped for its recipient
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShareScheme {
    /// KEK from the owner's signature, salted with the recipient address
    #[default]
    Signature,
    /// KEK from ECDH with the recipient's public key (hex, base64, raw,
    /// uncompressed or compressed)
    Ecdh { recipient_public_key: String },
    /// An `eth_decrypt` payload the owner produced out of band from
    /// [`provider_plaintext`](crate::crypto::provider_plaintext)
    Provider { payload_json: String },
}

/// Checksum of the stored ciphertext, reconstructed the way the owner built
/// it. Falls back to the recorded checksum when the chain does not open
/// under `owner`'s address.
async fn reconstructed_checksum(
    store: &dyn BlobStore,
    metadata: &DocumentMetadata,
    owner: &str,
    dek: &Dek,
    nonce: &DocumentNonce,
) -> Result<Option<String>, DocumentError> {
    let blob = store.get(&metadata.content_id()?).await?;
    let metachunk = Metachunk::from_bytes(&blob)?;
    let timestamp = metadata.timestamp()?;
    let counter = metadata.counter()?;

    match owner_ciphertext(&metachunk.chunk_a, owner, &timestamp, &counter, dek, nonce) {
        Some(ciphertext) => Ok(Some(ciphertext_checksum(&ciphertext))),
        None => {
            tracing::warn!(
                owner,
                "chain does not open under the sharer's address, keeping recorded checksum"
            );
            Ok(metadata.encrypted_data_sha256_b64.clone())
        }
    }
}

/// Wrap the DEK of `metadata`'s document for `recipient` and add the entry.
///
/// Returns the new entry. An existing entry for the recipient is replaced.
pub async fn share_document(
    owner: &dyn Signer,
    store: &dyn BlobStore,
    metadata: &mut DocumentMetadata,
    recipient: &str,
    scheme: ShareScheme,
    config: &Config,
) -> Result<WrappedEntry, DocumentError> {
    let (owner_address, dek, nonce) = holder_dek(owner, metadata, config).await?;
    if normalize_address(&owner_address) == normalize_address(recipient) {
        return Err(anyhow::anyhow!("cannot share a document with its own holder").into());
    }

    let checksum = reconstructed_checksum(store, metadata, &owner_address, &dek, &nonce).await?;
    let wrapping = KeyWrappingService::new(config);

    let mut entry = match &scheme {
        ShareScheme::Signature => {
            let wrap = wrapping
                .wrap_with_signature(owner, recipient, &dek, &nonce)
                .await?;
            let mut entry = WrappedEntry::new(&wrap.wrapped_dek);
            entry.owner_signature = Some(wrap.owner_signature);
            entry.dek_sha256_b64 = Some(wrap.dek_sha256_b64);
            entry
        }
        ShareScheme::Ecdh {
            recipient_public_key,
        } => {
            let key = PublicKey::parse(recipient_public_key).map_err(KeyWrapError::from)?;
            #[allow(deprecated)]
            let wrap = wrapping.wrap_ecdh(owner, &key, &dek, &nonce).await?;
            let mut entry = WrappedEntry::new(&wrap.wrapped_dek);
            entry.owner_ephemeral_pubkey = Some(wrap.ephemeral_public_key.to_base64());
            entry.dek_sha256_b64 = Some(wrap.dek_sha256_b64);
            entry
        }
        ShareScheme::Provider { payload_json } => {
            serde_json::from_str::<Value>(payload_json)
                .map_err(|e| KeyWrapError::ProviderPayload(e.to_string()))?;
            WrappedEntry {
                provider_encrypted: Some(payload_json.clone()),
                dek_sha256_b64: Some(dek.checksum()),
                ..Default::default()
            }
        }
    };
    entry.encrypted_data_sha256_b64 = checksum.clone();
    if metadata.nonce.is_none() {
        entry.nonce = Some(nonce.to_hex());
    }

    metadata.wrapped_deks.insert(recipient, entry.clone());
    if checksum.is_some() {
        metadata.encrypted_data_sha256_b64 = checksum;
    }

    let scheme_name = match scheme {
        ShareScheme::Signature => "signature",
        ShareScheme::Ecdh { .. } => "ecdh",
        ShareScheme::Provider { .. } => "provider",
    };
    tracing::info!(
        recipient = %normalize_address(recipient),
        scheme = scheme_name,
        "shared document"
    );
    Ok(entry)
}
