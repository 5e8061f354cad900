//! Content encryption using AES-256-GCM
//!
//! Every document version is encrypted under its own random data encryption
//! key ([`Dek`]). The GCM nonce is not random: it is derived from the public
//! document attributes (owner address, tokenization timestamp, counter), so
//! uniqueness relies on that tuple changing for every version.
//!
//! The same nonce also protects the wrapped copies of the DEK, each under a
//! distinct key-encryption key.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256-GCM key in bytes
pub const DEK_SIZE: usize = 32;
/// Size of an AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum DekError {
    #[error("dek error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid key size, expected 32, got {0}")]
    KeySize(usize),
    #[error("invalid nonce: {0}")]
    Nonce(String),
    #[error("aes-gcm authentication failed (ciphertext {ciphertext_len} bytes, nonce {nonce_len} bytes)")]
    Authentication {
        ciphertext_len: usize,
        nonce_len: usize,
    },
}

/// A 256-bit data encryption key
///
/// Zeroed on drop and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; DEK_SIZE]);

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dek(..)")
    }
}

impl From<[u8; DEK_SIZE]> for Dek {
    fn from(bytes: [u8; DEK_SIZE]) -> Self {
        Dek(bytes)
    }
}

impl Dek {
    /// Generate a new random key using the OS RNG
    pub fn generate() -> Self {
        let mut buff = [0; DEK_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Create a key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `DEK_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, DekError> {
        if data.len() != DEK_SIZE {
            return Err(DekError::KeySize(data.len()));
        }
        let mut buff = [0; DEK_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Get a reference to the key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Base64 SHA-256 of the key, safe to publish alongside a wrapped copy
    pub fn checksum(&self) -> String {
        BASE64.encode(Sha256::digest(self.0))
    }

    /// Encrypt `data` under this key. Output is `ciphertext || tag`.
    pub fn encrypt(&self, nonce: &DocumentNonce, data: &[u8]) -> Result<Vec<u8>, DekError> {
        seal(&self.0, nonce, data)
    }

    /// Decrypt `ciphertext || tag` under this key.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::Authentication`] if the tag does not verify, which
    /// means a wrong key, wrong nonce or tampered ciphertext.
    pub fn decrypt(&self, nonce: &DocumentNonce, data: &[u8]) -> Result<Vec<u8>, DekError> {
        open(&self.0, nonce, data)
    }
}

/// AES-256-GCM encryption under an arbitrary 32-byte key
pub(crate) fn seal(
    key: &[u8; DEK_SIZE],
    nonce: &DocumentNonce,
    data: &[u8],
) -> Result<Vec<u8>, DekError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce.bytes()), data)
        .map_err(|_| anyhow::anyhow!("aes-gcm encrypt error").into())
}

/// AES-256-GCM decryption under an arbitrary 32-byte key
pub(crate) fn open(
    key: &[u8; DEK_SIZE],
    nonce: &DocumentNonce,
    data: &[u8],
) -> Result<Vec<u8>, DekError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce.bytes()), data)
        .map_err(|_| DekError::Authentication {
            ciphertext_len: data.len(),
            nonce_len: NONCE_SIZE,
        })
}

/// The deterministic 12-byte nonce of a document version
///
/// `SHA-256(owner || timestamp || counter)[..12]`, where the counter is its
/// decimal string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentNonce([u8; NONCE_SIZE]);

impl From<[u8; NONCE_SIZE]> for DocumentNonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        DocumentNonce(bytes)
    }
}

impl DocumentNonce {
    /// Derive the nonce for a document version.
    ///
    /// The owner string is hashed exactly as given, so its casing matters.
    pub fn derive(owner: &str, timestamp: &str, counter: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner.as_bytes());
        hasher.update(timestamp.as_bytes());
        hasher.update(counter.to_string().as_bytes());
        let digest = hasher.finalize();

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        DocumentNonce(nonce)
    }

    /// Parse a nonce from hex, with or without a `0x` prefix
    pub fn from_hex(hex: &str) -> Result<Self, DekError> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; NONCE_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|e| DekError::Nonce(format!("hex decode error: {e}")))?;
        Ok(DocumentNonce(buff))
    }

    /// `0x`-prefixed hex form, as stored in document metadata
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}
