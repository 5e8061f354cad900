//! The signing capability documents are sealed and opened with
//!
//! Key material never enters this crate directly. Everything that needs a
//! holder's secret goes through a [`Signer`]: a wallet (or anything shaped
//! like one) that reports an address, signs fixed messages, and optionally
//! exposes ECDH or provider-level decryption.
//!
//! Calls into a signer may suspend for as long as a user takes to approve a
//! prompt. Nothing here imposes a timeout on them.

use async_trait::async_trait;

use crate::crypto::PublicKey;

mod local;

pub use local::LocalSigner;

/// Optional signer capabilities, named in errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Raw secp256k1 ECDH with the holder's private key
    Ecdh,
    /// `eth_decrypt`-style decryption performed by the wallet provider
    ProviderDecrypt,
    /// Signing a fixed message to the same signature every time
    DeterministicSigning,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Ecdh => write!(f, "ecdh"),
            Capability::ProviderDecrypt => write!(f, "eth_decrypt"),
            Capability::DeterministicSigning => write!(f, "deterministic signing"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signer error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("signer does not support {0}")]
    Unsupported(Capability),
    #[error("signing request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// The holder's address, in whatever casing the wallet reports it
    async fn address(&self) -> Result<String, SignerError>;

    /// Sign a fixed UTF-8 message, returning a `0x`-prefixed 65-byte
    /// signature (`r || s || v`) as hex
    ///
    /// Several wrap schemes derive keys from this output, so it must be a
    /// deterministic function of the message for a given holder.
    async fn sign_message(&self, message: &str) -> Result<String, SignerError>;

    /// X coordinate of the ECDH shared point between the holder's private
    /// key and `peer`
    async fn ecdh_shared_secret(&self, _peer: &PublicKey) -> Result<[u8; 32], SignerError> {
        Err(SignerError::Unsupported(Capability::Ecdh))
    }

    /// Ask the wallet provider to decrypt an `eth_decrypt` payload.
    /// Returns the decrypted text, which for wrapped keys is base64.
    async fn provider_decrypt(&self, _payload_json: &str) -> Result<String, SignerError> {
        Err(SignerError::Unsupported(Capability::ProviderDecrypt))
    }
}
