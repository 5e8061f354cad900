use async_trait::async_trait;
use sha3::{Digest, Keccak256};

use super::{Signer, SignerError};
use crate::crypto::{PublicKey, SecretKey};

/// A signer backed by an in-process secp256k1 key
///
/// Signs with EIP-191 personal-message hashing and RFC6979 nonces, so
/// signatures are byte-for-byte what an Ethereum wallet holding the same key
/// would produce. Exposes ECDH since the private key is at hand.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    secret: SecretKey,
    address: String,
}

impl From<SecretKey> for LocalSigner {
    fn from(secret: SecretKey) -> Self {
        let address = secret.public().address();
        Self { secret, address }
    }
}

impl LocalSigner {
    pub fn generate() -> Self {
        SecretKey::generate().into()
    }

    pub fn from_hex(hex: &str) -> Result<Self, SignerError> {
        let secret = SecretKey::from_hex(hex).map_err(|e| anyhow::anyhow!(e))?;
        Ok(secret.into())
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public()
    }

    /// Checksummed address, available without going through the async trait
    pub fn address_str(&self) -> &str {
        &self.address
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || message)`
pub(crate) fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

#[async_trait]
impl Signer for LocalSigner {
    async fn address(&self) -> Result<String, SignerError> {
        Ok(self.address.clone())
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        let hash = eip191_hash(message.as_bytes());
        let (signature, recovery_id) = self
            .secret
            .signing_key()
            .sign_prehash_recoverable(&hash)
            .map_err(|e| anyhow::anyhow!("ecdsa signing failed: {e}"))?;

        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }

    async fn ecdh_shared_secret(&self, peer: &PublicKey) -> Result<[u8; 32], SignerError> {
        Ok(self.secret.diffie_hellman(peer))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    const HARDHAT_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn test_signatures_are_deterministic() {
        let signer = LocalSigner::from_hex(HARDHAT_0).unwrap();
        let a = signer.sign_message("hello").await.unwrap();
        let b = signer.sign_message("hello").await.unwrap();
        let c = signer.sign_message("hello!").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 2 + 65 * 2);
    }

    #[tokio::test]
    async fn test_signature_recovers_to_address() {
        let signer = LocalSigner::generate();
        let sig_hex = signer.sign_message("recover me").await.unwrap();
        let bytes = hex::decode(&sig_hex[2..]).unwrap();

        let signature = Signature::from_slice(&bytes[..64]).unwrap();
        let recovery_id = RecoveryId::from_byte(bytes[64] - 27).unwrap();
        let hash = eip191_hash(b"recover me");
        let recovered =
            VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id).unwrap();

        let recovered = PublicKey::from(k256::PublicKey::from(&recovered));
        assert_eq!(recovered.address(), signer.address().await.unwrap());
    }

    #[tokio::test]
    async fn test_address_is_checksummed() {
        let signer = LocalSigner::from_hex(HARDHAT_0).unwrap();
        assert_eq!(
            signer.address().await.unwrap(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[tokio::test]
    async fn test_ecdh_matches_peer() {
        let alice = LocalSigner::generate();
        let bob = LocalSigner::generate();
        let ab = alice.ecdh_shared_secret(&bob.public_key()).await.unwrap();
        let ba = bob.ecdh_shared_secret(&alice.public_key()).await.unwrap();
        assert_eq!(ab, ba);
    }
}
