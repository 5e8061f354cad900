//! Wrapping a document DEK for its holders
//!
//! Every holder gets its own AES-256-GCM encryption of the DEK under a
//! 32-byte KEK. How the KEK comes about depends on the scheme:
//!
//! | scheme      | KEK                                                         |
//! |-------------|-------------------------------------------------------------|
//! | self        | HKDF(sig(owner, [`SELF_WRAP_MESSAGE`]), salt = owner address) |
//! | ecdh        | HKDF(X of ECDH(ephemeral, recipient), no salt)              |
//! | signature   | HKDF(sig(owner, [`SHARE_DEK_MESSAGE`]), salt = lowercase recipient) |
//! | provider    | none, the wallet provider decrypts the DEK itself           |
//!
//! The ECDH ephemeral key is `SHA-256` of the owner's signature over
//! [`SHARE_SESSION_MESSAGE`], so the owner never has to store it. All of
//! this relies on signatures being deterministic for a fixed message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::dek::{self, Dek, DekError, DocumentNonce, DEK_SIZE};
use super::keys::{normalize_address, KeyError, PublicKey, SecretKey};
use crate::config::Config;
use crate::signer::{Capability, Signer, SignerError};

/// Message signed to derive the owner's own KEK
pub const SELF_WRAP_MESSAGE: &str = "NFTDoc-KEK-DERIVATION-v1";
/// Message signed by the owner to derive a recipient KEK
pub const SHARE_DEK_MESSAGE: &str = "Essentialis-Share-DEK-v1";
/// Message signed by the owner to derive the ECDH ephemeral key
pub const SHARE_SESSION_MESSAGE: &str = "Essentialis-Share-Session-v1";

const ECDH_HINT: &str = "the recipient's signer does not expose a private key, so the ECDH share \
     cannot be unwrapped locally. Use a signer that exposes its key, or ask the owner to \
     re-share with the signature scheme";
const PROVIDER_HINT: &str = "the recipient's wallet provider does not support eth_decrypt. \
     Use a provider that does, or ask the owner to re-share with the signature scheme";
const SIGNING_HINT: &str = "the signer returned different signatures for the same message, so \
     keys derived from it would not be reproducible. Use a signer with RFC 6979 \
     deterministic nonces";

#[derive(Debug, thiserror::Error)]
pub enum KeyWrapError {
    #[error("key wrap error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("cipher error: {0}")]
    Cipher(#[from] DekError),
    #[error("invalid signature encoding: {0}")]
    Signature(String),
    #[error("invalid provider payload: {0}")]
    ProviderPayload(String),
    #[error("{capability} unsupported for {}: {hint}", .address.as_deref().unwrap_or("unknown holder"))]
    CapabilityUnsupported {
        capability: Capability,
        address: Option<String>,
        hint: &'static str,
    },
}

/// How a holder's DEK copy was wrapped, with the public material needed to
/// unwrap it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapScheme {
    /// The holder wrapped the DEK for itself
    SelfSigned,
    /// Deprecated ECDH share, carrying the owner's base64 ephemeral key
    Ecdh { ephemeral_public_key: String },
    /// Share keyed by the owner's signature and the recipient's address
    Signature { owner_signature: String },
    /// `eth_decrypt` payload produced out of band
    Provider { payload_json: String },
}

impl WrapScheme {
    pub fn name(&self) -> &'static str {
        match self {
            WrapScheme::SelfSigned => "self",
            WrapScheme::Ecdh { .. } => "ecdh",
            WrapScheme::Signature { .. } => "signature",
            WrapScheme::Provider { .. } => "provider",
        }
    }
}

/// Output of a self wrap
///
/// Every wrap output carries `dek_sha256_b64`, the [`dek_checksum`] of the
/// wrapped key, so the holder can check what it unwraps later.
#[derive(Debug, Clone)]
pub struct SelfWrap {
    pub wrapped_dek: Vec<u8>,
    pub dek_sha256_b64: String,
}

/// Output of an ECDH wrap
#[derive(Debug, Clone)]
pub struct EcdhWrap {
    pub wrapped_dek: Vec<u8>,
    pub ephemeral_public_key: PublicKey,
    pub dek_sha256_b64: String,
}

/// Output of a signature-scheme wrap
#[derive(Debug, Clone)]
pub struct SignatureWrap {
    pub wrapped_dek: Vec<u8>,
    pub owner_signature: String,
    pub dek_sha256_b64: String,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Kek([u8; DEK_SIZE]);

impl Kek {
    fn derive(ikm: &[u8], salt: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = [0u8; DEK_SIZE];
        hk.expand(&[], &mut okm)
            .expect("32 bytes is a valid hkdf-sha256 output length");
        Kek(okm)
    }

    fn wrap(&self, dek: &Dek, nonce: &DocumentNonce) -> Result<Vec<u8>, KeyWrapError> {
        Ok(dek::seal(&self.0, nonce, dek.bytes())?)
    }

    fn unwrap(&self, wrapped: &[u8], nonce: &DocumentNonce) -> Result<Dek, KeyWrapError> {
        let mut bytes = dek::open(&self.0, nonce, wrapped)?;
        let dek = Dek::from_slice(&bytes);
        bytes.zeroize();
        Ok(dek?)
    }
}

/// Decode a `0x`-hex signature into the bytes used as HKDF input
fn signature_bytes(signature: &str) -> Result<Vec<u8>, KeyWrapError> {
    let signature = signature.trim();
    let hex = signature.strip_prefix("0x").unwrap_or(signature);
    hex::decode(hex).map_err(|e| KeyWrapError::Signature(e.to_string()))
}

/// Non-secret checksum of a DEK: base64 SHA-256
pub fn dek_checksum(dek: &Dek) -> String {
    dek.checksum()
}

/// The plaintext an owner hands to `eth_getEncryptionPublicKey`-style
/// encryption when sharing through a wallet provider
pub fn provider_plaintext(dek: &Dek) -> String {
    BASE64.encode(dek.bytes())
}

/// Wraps and unwraps DEKs through a [`Signer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyWrappingService {
    verify_signer_determinism: bool,
}

impl KeyWrappingService {
    pub fn new(config: &Config) -> Self {
        Self {
            verify_signer_determinism: config.verify_signer_determinism,
        }
    }

    async fn sign_fixed(
        &self,
        signer: &dyn Signer,
        message: &'static str,
    ) -> Result<String, KeyWrapError> {
        let signature = signer.sign_message(message).await?;
        if self.verify_signer_determinism {
            let again = signer.sign_message(message).await?;
            if again != signature {
                let address = signer.address().await.ok().map(|a| normalize_address(&a));
                tracing::warn!(message, ?address, "signer is not deterministic");
                return Err(KeyWrapError::CapabilityUnsupported {
                    capability: Capability::DeterministicSigning,
                    address,
                    hint: SIGNING_HINT,
                });
            }
        }
        Ok(signature)
    }

    async fn self_kek(&self, signer: &dyn Signer) -> Result<Kek, KeyWrapError> {
        let signature = self.sign_fixed(signer, SELF_WRAP_MESSAGE).await?;
        let address = signer.address().await?;
        Ok(Kek::derive(&signature_bytes(&signature)?, address.as_bytes()))
    }

    /// Wrap `dek` for the signer itself.
    pub async fn wrap_self(
        &self,
        signer: &dyn Signer,
        dek: &Dek,
        nonce: &DocumentNonce,
    ) -> Result<SelfWrap, KeyWrapError> {
        let wrapped_dek = self.self_kek(signer).await?.wrap(dek, nonce)?;
        tracing::debug!(scheme = "self", len = wrapped_dek.len(), "wrapped dek");
        Ok(SelfWrap {
            wrapped_dek,
            dek_sha256_b64: dek_checksum(dek),
        })
    }

    /// Unwrap a DEK the signer wrapped for itself. The signer must report
    /// its address in the same casing it did at wrap time.
    pub async fn unwrap_self(
        &self,
        signer: &dyn Signer,
        wrapped: &[u8],
        nonce: &DocumentNonce,
    ) -> Result<Dek, KeyWrapError> {
        self.self_kek(signer).await?.unwrap(wrapped, nonce)
    }

    /// Wrap `dek` for `recipient` over ECDH with the owner's deterministic
    /// ephemeral key.
    #[deprecated(note = "recipients need raw private key access, use wrap_with_signature")]
    pub async fn wrap_ecdh(
        &self,
        owner: &dyn Signer,
        recipient: &PublicKey,
        dek: &Dek,
        nonce: &DocumentNonce,
    ) -> Result<EcdhWrap, KeyWrapError> {
        let signature = self.sign_fixed(owner, SHARE_SESSION_MESSAGE).await?;
        let ephemeral = SecretKey::from_signature(&signature)?;
        let shared_x = ephemeral.diffie_hellman(recipient);

        let wrapped_dek = Kek::derive(&shared_x, &[]).wrap(dek, nonce)?;
        tracing::debug!(scheme = "ecdh", len = wrapped_dek.len(), "wrapped dek");
        Ok(EcdhWrap {
            wrapped_dek,
            ephemeral_public_key: ephemeral.public(),
            dek_sha256_b64: dek_checksum(dek),
        })
    }

    /// Unwrap an ECDH share. Fails with
    /// [`KeyWrapError::CapabilityUnsupported`] when the signer cannot do ECDH.
    pub async fn unwrap_ecdh(
        &self,
        recipient: &dyn Signer,
        ephemeral_public_key: &str,
        wrapped: &[u8],
        nonce: &DocumentNonce,
    ) -> Result<Dek, KeyWrapError> {
        let ephemeral = PublicKey::parse(ephemeral_public_key)?;
        let shared_x = match recipient.ecdh_shared_secret(&ephemeral).await {
            Ok(x) => x,
            Err(SignerError::Unsupported(capability)) => {
                return Err(KeyWrapError::CapabilityUnsupported {
                    capability,
                    address: recipient.address().await.ok().map(|a| normalize_address(&a)),
                    hint: ECDH_HINT,
                })
            }
            Err(e) => return Err(e.into()),
        };
        Kek::derive(&shared_x, &[]).unwrap(wrapped, nonce)
    }

    /// Wrap `dek` for `recipient_address` using a KEK derived from the
    /// owner's signature. The signature goes into the entry; it is useless
    /// without the recipient's address as salt.
    pub async fn wrap_with_signature(
        &self,
        owner: &dyn Signer,
        recipient_address: &str,
        dek: &Dek,
        nonce: &DocumentNonce,
    ) -> Result<SignatureWrap, KeyWrapError> {
        let owner_signature = self.sign_fixed(owner, SHARE_DEK_MESSAGE).await?;
        let salt = normalize_address(recipient_address);
        let wrapped_dek =
            Kek::derive(&signature_bytes(&owner_signature)?, salt.as_bytes()).wrap(dek, nonce)?;
        tracing::debug!(scheme = "signature", recipient = %salt, "wrapped dek");
        Ok(SignatureWrap {
            wrapped_dek,
            owner_signature,
            dek_sha256_b64: dek_checksum(dek),
        })
    }

    /// Unwrap a signature-scheme share. Only the recipient's address is
    /// needed from the signer, no private key access.
    pub async fn unwrap_with_signature(
        &self,
        recipient: &dyn Signer,
        owner_signature: &str,
        wrapped: &[u8],
        nonce: &DocumentNonce,
    ) -> Result<Dek, KeyWrapError> {
        let address = recipient.address().await?;
        unwrap_with_signature(owner_signature, &address, wrapped, nonce)
    }

    /// Have the recipient's wallet provider decrypt an `eth_decrypt` payload
    /// holding the base64 DEK.
    pub async fn unwrap_with_provider(
        &self,
        recipient: &dyn Signer,
        payload_json: &str,
    ) -> Result<Dek, KeyWrapError> {
        serde_json::from_str::<serde_json::Value>(payload_json)
            .map_err(|e| KeyWrapError::ProviderPayload(e.to_string()))?;

        let plaintext = match recipient.provider_decrypt(payload_json).await {
            Ok(text) => text,
            Err(SignerError::Unsupported(capability)) => {
                return Err(KeyWrapError::CapabilityUnsupported {
                    capability,
                    address: recipient.address().await.ok().map(|a| normalize_address(&a)),
                    hint: PROVIDER_HINT,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut bytes = BASE64
            .decode(plaintext.trim())
            .map_err(|e| KeyWrapError::ProviderPayload(format!("decrypted dek is not base64: {e}")))?;
        let dek = Dek::from_slice(&bytes);
        bytes.zeroize();
        Ok(dek?)
    }

    /// Unwrap under whichever scheme the holder's entry declares.
    pub async fn unwrap(
        &self,
        signer: &dyn Signer,
        scheme: &WrapScheme,
        wrapped: &[u8],
        nonce: &DocumentNonce,
    ) -> Result<Dek, KeyWrapError> {
        tracing::debug!(scheme = scheme.name(), "unwrapping dek");
        match scheme {
            WrapScheme::SelfSigned => self.unwrap_self(signer, wrapped, nonce).await,
            WrapScheme::Signature { owner_signature } => {
                self.unwrap_with_signature(signer, owner_signature, wrapped, nonce)
                    .await
            }
            WrapScheme::Provider { payload_json } => {
                self.unwrap_with_provider(signer, payload_json).await
            }
            WrapScheme::Ecdh {
                ephemeral_public_key,
            } => {
                self.unwrap_ecdh(signer, ephemeral_public_key, wrapped, nonce)
                    .await
            }
        }
    }
}

/// Derive the signature-scheme KEK and unwrap, without a signer.
///
/// The recipient address is lowercased before use, so any casing works.
pub fn unwrap_with_signature(
    owner_signature: &str,
    recipient_address: &str,
    wrapped: &[u8],
    nonce: &DocumentNonce,
) -> Result<Dek, KeyWrapError> {
    let salt = normalize_address(recipient_address);
    Kek::derive(&signature_bytes(owner_signature)?, salt.as_bytes()).unwrap(wrapped, nonce)
}
