/**
 * Content-addressed storage for sealed
 *  metachunks, and an in-memory store
 *  for tests and embedders.
 */
pub mod blobs;
/**
 * Tunables for sealing and recovery.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Blind capsules and capsule chains
 *  - Document keys, nonces and content encryption
 *  - Per-holder key wrapping
 */
pub mod crypto;
/**
 * Document metadata records and the flows
 *  that seal, share, reseal and open them.
 */
pub mod document;
/**
 * The wallet-shaped signing capability
 *  every key derivation goes through.
 */
pub mod signer;

pub mod prelude {
    pub use crate::blobs::{BlobStore, ContentId, MemoryBlobStore};
    pub use crate::config::Config;
    pub use crate::crypto::{Dek, DocumentNonce, PublicKey, SecretKey};
    pub use crate::document::{
        open_document, reseal_document, seal_document, share_document, DocumentError,
        DocumentMetadata, RecoveredDocument, ResealRequest, SealRequest, ShareScheme,
        WrappedEntry,
    };
    pub use crate::signer::{LocalSigner, Signer};
}
