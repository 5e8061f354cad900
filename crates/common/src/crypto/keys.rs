use std::ops::Deref;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Size of a secp256k1 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an uncompressed SEC1 public key (`0x04 || X || Y`)
pub const UNCOMPRESSED_KEY_SIZE: usize = 65;
/// Size of a compressed SEC1 public key
pub const COMPRESSED_KEY_SIZE: usize = 33;
/// Size of a raw `X || Y` public key without the SEC1 tag byte
pub const RAW_KEY_SIZE: usize = 64;
/// Size of an EVM address in bytes
pub const ADDRESS_SIZE: usize = 20;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid public key format: {0}")]
    Format(String),
    #[error("invalid secp256k1 point")]
    InvalidPoint,
}

/// A secp256k1 public key used for the ECDH wrap scheme
///
/// Recipients hand these out in whatever form their wallet tooling produces,
/// so parsing is lenient about the text encoding and the point layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(k256::PublicKey);

impl Deref for PublicKey {
    type Target = k256::PublicKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<k256::PublicKey> for PublicKey {
    fn from(key: k256::PublicKey) -> Self {
        PublicKey(key)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;

    /// Accepts 65-byte uncompressed, 33-byte compressed, or 64-byte raw `X || Y`.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key = match bytes.len() {
            RAW_KEY_SIZE => {
                let mut tagged = [0u8; UNCOMPRESSED_KEY_SIZE];
                tagged[0] = 0x04;
                tagged[1..].copy_from_slice(bytes);
                k256::PublicKey::from_sec1_bytes(&tagged)
            }
            UNCOMPRESSED_KEY_SIZE | COMPRESSED_KEY_SIZE => k256::PublicKey::from_sec1_bytes(bytes),
            n => {
                return Err(KeyError::Format(format!(
                    "expected {RAW_KEY_SIZE}, {UNCOMPRESSED_KEY_SIZE} or {COMPRESSED_KEY_SIZE} bytes, got {n}"
                )))
            }
        };
        key.map(PublicKey).map_err(|_| KeyError::InvalidPoint)
    }
}

impl PublicKey {
    /// Parse a public key from text.
    ///
    /// Hex (with or without `0x`) is tried first, since a hex string is also
    /// valid base64; anything else is decoded as standard base64.
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(KeyError::Format("empty public key".into()));
        }

        let maybe_hex = text.strip_prefix("0x").unwrap_or(text);
        let bytes = if maybe_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            if maybe_hex.len() % 2 != 0 {
                return Err(KeyError::Format("odd-length hex string".into()));
            }
            hex::decode(maybe_hex).map_err(|e| KeyError::Format(e.to_string()))?
        } else {
            BASE64
                .decode(text)
                .map_err(|_| KeyError::Format("neither hex nor base64".into()))?
        };

        Self::try_from(bytes.as_slice())
    }

    /// Uncompressed SEC1 encoding (`0x04 || X || Y`)
    pub fn to_uncompressed(&self) -> [u8; UNCOMPRESSED_KEY_SIZE] {
        let point = self.0.to_encoded_point(false);
        let mut out = [0u8; UNCOMPRESSED_KEY_SIZE];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Base64 of the uncompressed encoding, the wire form of
    /// `owner_ephemeral_pubkey`
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_uncompressed())
    }

    /// EIP-55 checksummed address of this key
    pub fn address(&self) -> String {
        let uncompressed = self.to_uncompressed();
        let digest = Keccak256::digest(&uncompressed[1..]);
        to_checksum_address(&hex::encode(&digest[32 - ADDRESS_SIZE..]))
    }
}

/// Secret half of a secp256k1 keypair
///
/// Used for the owner's ephemeral ECDH key and by [`crate::signer::LocalSigner`].
#[derive(Clone)]
pub struct SecretKey(k256::SecretKey);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretKey").field(&self.public().address()).finish()
    }
}

impl SecretKey {
    /// Generate a new random secret key using the OS RNG
    pub fn generate() -> Self {
        loop {
            let mut bytes = [0u8; PRIVATE_KEY_SIZE];
            getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
            // out-of-range scalars are astronomically rare, just draw again
            if let Ok(key) = k256::SecretKey::from_slice(&bytes) {
                return Self(key);
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        k256::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| anyhow::anyhow!("private key out of range").into())
    }

    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Self::from_bytes(&buff)
    }

    /// Derive the deterministic ephemeral key of the ECDH scheme.
    ///
    /// The key is `SHA-256` of the signature's text form, so the owner can
    /// re-create it at any time by signing the same fixed message again.
    pub fn from_signature(signature: &str) -> Result<Self, KeyError> {
        let digest = Sha256::digest(signature.as_bytes());
        Self::from_bytes(&digest)
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// X coordinate of the ECDH shared point with `peer`
    pub fn diffie_hellman(&self, peer: &PublicKey) -> [u8; 32] {
        let shared = k256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer.0.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }

    pub(crate) fn signing_key(&self) -> k256::ecdsa::SigningKey {
        k256::ecdsa::SigningKey::from(&self.0)
    }
}

/// Normalize an address to lowercase `0x`-prefixed hex
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    let bare = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    format!("0x{}", bare.to_ascii_lowercase())
}

/// EIP-55 mixed-case checksum encoding of an address.
///
/// Input may be any casing, with or without `0x`. Strings that are not
/// 40 hex digits are returned lowercased and otherwise untouched.
pub fn to_checksum_address(address: &str) -> String {
    let lower = normalize_address(address);
    let bare = &lower[2..];
    if bare.len() != ADDRESS_SIZE * 2 || !bare.chars().all(|c| c.is_ascii_hexdigit()) {
        return lower;
    }

    let hash = Keccak256::digest(bare.as_bytes());
    let mut out = String::with_capacity(2 + bare.len());
    out.push_str("0x");
    for (i, c) in bare.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// The casings under which an address may have been used as a chain
/// operand: as given, lowercase, and checksummed. Duplicates are removed
/// while keeping first-seen order.
pub fn address_variants(address: &str) -> Vec<String> {
    let mut variants = Vec::with_capacity(3);
    for candidate in [
        address.trim().to_string(),
        normalize_address(address),
        to_checksum_address(address),
    ] {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_checksum_address_known_vectors() {
        // vectors from EIP-55
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            assert_eq!(to_checksum_address(&expected.to_lowercase()), expected);
            assert_eq!(to_checksum_address(expected), expected);
        }
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(" 0xABcD "), "0xabcd");
        assert_eq!(normalize_address("ABCD"), "0xabcd");
    }

    #[test]
    fn test_address_variants_dedupe() {
        let lower = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
        let variants = address_variants(lower);
        assert_eq!(
            variants,
            vec![
                lower.to_string(),
                "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string()
            ]
        );
    }

    #[test]
    fn test_known_private_key_address() {
        // well-known hardhat account #0
        let key = SecretKey::from_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            key.public().address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn test_public_key_parse_formats() {
        let key = SecretKey::generate().public();
        let uncompressed = key.to_uncompressed();
        let compressed = key.to_encoded_point(true);

        let forms = [
            hex::encode(uncompressed),
            format!("0x{}", hex::encode(uncompressed)),
            hex::encode(&uncompressed[1..]),
            hex::encode(compressed.as_bytes()),
            key.to_base64(),
            BASE64.encode(&uncompressed[1..]),
        ];
        for form in forms {
            assert_eq!(PublicKey::parse(&form).unwrap(), key, "form {form}");
        }
    }

    #[test]
    fn test_public_key_parse_rejects_garbage() {
        assert!(matches!(PublicKey::parse(""), Err(KeyError::Format(_))));
        assert!(matches!(PublicKey::parse("0xabc"), Err(KeyError::Format(_))));
        assert!(matches!(
            PublicKey::parse("not a key!"),
            Err(KeyError::Format(_))
        ));
        assert!(PublicKey::parse(&hex::encode([0x04u8; 65])).is_err());
    }

    #[test]
    fn test_ecdh_agreement() {
        let alice = SecretKey::generate();
        let bob = SecretKey::generate();
        assert_eq!(
            alice.diffie_hellman(&bob.public()),
            bob.diffie_hellman(&alice.public())
        );
    }

    #[test]
    fn test_ephemeral_from_signature_is_deterministic() {
        let a = SecretKey::from_signature("0xdeadbeef").unwrap();
        let b = SecretKey::from_signature("0xdeadbeef").unwrap();
        let c = SecretKey::from_signature("0xdeadbeee").unwrap();
        assert_eq!(a.public(), b.public());
        assert_ne!(a.public(), c.public());
    }

    #[test]
    fn test_secret_key_hex_roundtrip() {
        let key = SecretKey::generate();
        let recovered = SecretKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.public(), recovered.public());
        assert!(SecretKey::from_bytes(&[0u8; 32]).is_err());
        assert!(SecretKey::from_bytes(&[1u8; 31]).is_err());
    }
}
