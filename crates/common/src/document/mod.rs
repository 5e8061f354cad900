//! Sealed documents and the flows that produce and open them
//!
//! - **[`seal_document`]**: encrypt a file, blind its ciphertext against the
//!   document attributes, store the metachunk, wrap the DEK for the owner
//! - **[`reseal_document`]**: the same for a new version of an existing record
//! - **[`share_document`]**: wrap the owner's DEK for another holder
//! - **[`open_document`]**: run the [`RecoveryProtocol`] as the acting holder
//!
//! # Layout
//!
//! ```text
//! metadata record (public)                 blob store
//! +---------------------------+            +-----------------------------+
//! | encrypted_file_cid -------+----------->| ESSENTIALIS[ base64(        |
//! | nonce                     |            |   chunk_a |SPLIT| chunk_b ) ]|
//! | wrapped_deks { addr: .. } |            +-----------------------------+
//! | attributes [ Tokenization |
//! |   Date, Counter, .. ]     |    chunk_a = chain(b64(ct); owner, date, counter)
//! +---------------------------+    chunk_b = combine(b64(sha256(pt)), b64(hmac(ct)))
//! ```
//!
//! Holders unwrap the DEK from their entry, peel `chunk_a` back to the
//! ciphertext, decrypt, and check `chunk_b` against the result.

mod entry;
mod metachunk;
mod metadata;
mod recovery;
mod seal;

pub use entry::{EntryError, WrappedDeks, WrappedEntry};
pub use metachunk::{Metachunk, MetachunkError, PREFIX, SEPARATOR};
pub use metadata::{
    Attribute, DocumentMetadata, MetadataError, COUNTER, FILE_EXTENSION, FILE_SIZE, FILE_TYPE,
    OWNER_NAME, TOKENIZATION_DATE,
};
pub use recovery::{
    decode_payload, open_document, ChainOperand, ChainOrder, IntegrityStatus, RecoveredDocument,
    RecoveryMode, RecoveryProtocol,
};
pub use seal::{
    owner_dek, reseal_document, seal_document, share_document, ResealRequest, SealRequest,
    ShareScheme,
};

pub mod codec {
    //! Merge/split and envelope helpers for metachunk text
    pub use super::metachunk::{decode, encode, merge, split};
}

use crate::blobs::BlobStoreError;
use crate::crypto::{CapsuleError, DekError, KeyWrapError};
use crate::signer::{Capability, SignerError};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    /// Malformed capsule, product, metachunk or payload bytes
    #[error("format error: {0}")]
    Format(String),
    /// The acting holder has no wrapped entry
    #[error("access denied: no wrapped key for {address}")]
    AccessDenied { address: String },
    /// The unwrapped DEK does not match the entry's checksum
    #[error("derived DEK does not match the stored checksum (expected {expected}, got {actual}), ask the holder to re-share")]
    KeyMismatch { expected: String, actual: String },
    /// AES-GCM rejected the reconstructed ciphertext
    #[error("AES-GCM decrypt failed (ciphertext {ciphertext_len} bytes, nonce {nonce_len} bytes)")]
    Decrypt {
        ciphertext_len: usize,
        nonce_len: usize,
    },
    /// The content decrypted, but the blinded hash pair disagrees with it
    #[error("verification failed, the data may be corrupt or tampered with")]
    Integrity,
    #[error("{capability} unsupported for {}: {hint}", .address.as_deref().unwrap_or("unknown holder"))]
    CapabilityUnsupported {
        capability: Capability,
        address: Option<String>,
        hint: &'static str,
    },
    #[error("key wrap error: {0}")]
    KeyWrap(KeyWrapError),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<KeyWrapError> for DocumentError {
    fn from(err: KeyWrapError) -> Self {
        match err {
            KeyWrapError::CapabilityUnsupported {
                capability,
                address,
                hint,
            } => DocumentError::CapabilityUnsupported {
                capability,
                address,
                hint,
            },
            other => DocumentError::KeyWrap(other),
        }
    }
}

impl From<DekError> for DocumentError {
    fn from(err: DekError) -> Self {
        match err {
            DekError::Authentication {
                ciphertext_len,
                nonce_len,
            } => DocumentError::Decrypt {
                ciphertext_len,
                nonce_len,
            },
            other => DocumentError::Default(other.into()),
        }
    }
}

impl From<CapsuleError> for DocumentError {
    fn from(err: CapsuleError) -> Self {
        DocumentError::Format(err.to_string())
    }
}

impl From<MetachunkError> for DocumentError {
    fn from(err: MetachunkError) -> Self {
        DocumentError::Format(err.to_string())
    }
}

impl From<EntryError> for DocumentError {
    fn from(err: EntryError) -> Self {
        DocumentError::Format(err.to_string())
    }
}
