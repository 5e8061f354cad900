use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{normalize_address, to_checksum_address, WrapScheme};

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("wrapped dek is not hex: {0}")]
    WrappedDek(#[from] hex::FromHexError),
}

/// One holder's wrapped copy of a document DEK
///
/// Which of `owner_signature`, `provider_encrypted` and
/// `owner_ephemeral_pubkey` is present selects the unwrap scheme; an entry
/// with none of them was wrapped by the holder for itself.
///
/// Field names are the stored wire names. Camel-case spellings written by
/// older clients are accepted on read, and a bare hex string is read as an
/// entry with only `wrapped_dek` set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EntryRepr")]
pub struct WrappedEntry {
    /// AES-GCM ciphertext of the DEK, hex
    pub wrapped_dek: String,
    /// Nonce override for this entry, hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Owner signature over the share message, hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_signature: Option<String>,
    /// Owner's ECDH ephemeral public key, base64
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_ephemeral_pubkey: Option<String>,
    /// `eth_decrypt` payload, as a JSON string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_encrypted: Option<String>,
    /// Base64 SHA-256 of the DEK
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dek_sha256_b64: Option<String>,
    /// Base64 SHA-256 of the content ciphertext
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_data_sha256_b64: Option<String>,
}

impl WrappedEntry {
    /// An entry holding only a wrapped DEK
    pub fn new(wrapped_dek: &[u8]) -> Self {
        Self {
            wrapped_dek: format!("0x{}", hex::encode(wrapped_dek)),
            ..Default::default()
        }
    }

    pub fn wrapped_dek_bytes(&self) -> Result<Vec<u8>, EntryError> {
        let text = self.wrapped_dek.trim();
        let text = text.strip_prefix("0x").unwrap_or(text);
        Ok(hex::decode(text)?)
    }

    /// The unwrap scheme this entry declares. A signature wins over a
    /// provider payload, which wins over an ephemeral key.
    pub fn scheme(&self) -> WrapScheme {
        if let Some(owner_signature) = &self.owner_signature {
            WrapScheme::Signature {
                owner_signature: owner_signature.clone(),
            }
        } else if let Some(payload_json) = &self.provider_encrypted {
            WrapScheme::Provider {
                payload_json: payload_json.clone(),
            }
        } else if let Some(ephemeral_public_key) = &self.owner_ephemeral_pubkey {
            WrapScheme::Ecdh {
                ephemeral_public_key: ephemeral_public_key.clone(),
            }
        } else {
            WrapScheme::SelfSigned
        }
    }

    /// Whether the holder wrapped this DEK for itself
    pub fn is_self_wrapped(&self) -> bool {
        self.scheme() == WrapScheme::SelfSigned
    }
}

/// An entry object as found in stored metadata
#[derive(Deserialize)]
struct EntryObject {
    /// Only present in the list form of `wrapped_deks`
    #[serde(default)]
    address: Option<String>,
    #[serde(default, alias = "wrappedDek", alias = "wrapped")]
    wrapped_dek: String,
    #[serde(default, alias = "nonce_hex")]
    nonce: Option<String>,
    #[serde(default, alias = "ownerSignature", alias = "owner_sig")]
    owner_signature: Option<String>,
    #[serde(
        default,
        alias = "ownerEphemPubKey",
        alias = "ownerEphemeralPubKey"
    )]
    owner_ephemeral_pubkey: Option<String>,
    #[serde(
        default,
        alias = "providerEncrypted",
        alias = "provider",
        deserialize_with = "json_text"
    )]
    provider_encrypted: Option<String>,
    #[serde(default, alias = "dekSha256B64", alias = "dek_sha")]
    dek_sha256_b64: Option<String>,
    #[serde(default)]
    encrypted_data_sha256_b64: Option<String>,
}

impl From<EntryObject> for WrappedEntry {
    fn from(object: EntryObject) -> Self {
        Self {
            wrapped_dek: object.wrapped_dek,
            nonce: object.nonce,
            owner_signature: object.owner_signature,
            owner_ephemeral_pubkey: object.owner_ephemeral_pubkey,
            provider_encrypted: object.provider_encrypted,
            dek_sha256_b64: object.dek_sha256_b64,
            encrypted_data_sha256_b64: object.encrypted_data_sha256_b64,
        }
    }
}

/// Provider payloads are usually stored as a JSON string, but some records
/// embed the payload object itself
fn json_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntryRepr {
    Hex(String),
    Object(EntryObject),
}

impl From<EntryRepr> for WrappedEntry {
    fn from(repr: EntryRepr) -> Self {
        match repr {
            EntryRepr::Hex(wrapped_dek) => Self {
                wrapped_dek,
                ..Default::default()
            },
            EntryRepr::Object(object) => object.into(),
        }
    }
}

/// Wrapped entries of a document, keyed by holder address
///
/// Always written as an object keyed by lowercase address. Reading also
/// accepts the list form, where every entry carries its own `address`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WrappedDeksRepr")]
pub struct WrappedDeks(BTreeMap<String, WrappedEntry>);

#[derive(Deserialize)]
#[serde(untagged)]
enum WrappedDeksRepr {
    Map(BTreeMap<String, WrappedEntry>),
    List(Vec<EntryObject>),
}

impl From<WrappedDeksRepr> for WrappedDeks {
    fn from(repr: WrappedDeksRepr) -> Self {
        match repr {
            WrappedDeksRepr::Map(map) => WrappedDeks(map),
            WrappedDeksRepr::List(list) => WrappedDeks(
                list.into_iter()
                    .filter_map(|object| {
                        let address = object.address.clone()?;
                        Some((address, WrappedEntry::from(object)))
                    })
                    .collect(),
            ),
        }
    }
}

impl WrappedDeks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert under the lowercase form of `address`, replacing any entry
    /// stored under another casing of it
    pub fn insert(&mut self, address: &str, entry: WrappedEntry) {
        let key = normalize_address(address);
        self.0.retain(|k, _| normalize_address(k) != key);
        self.0.insert(key, entry);
    }

    /// Find the entry of `address`: exact key, then lowercase, then
    /// checksummed, then any key equal ignoring case. Returns the stored key
    /// along with the entry.
    pub fn find(&self, address: &str) -> Option<(&str, &WrappedEntry)> {
        let address = address.trim();
        let lower = normalize_address(address);
        [address.to_string(), lower.clone(), to_checksum_address(address)]
            .iter()
            .find_map(|key| self.0.get_key_value(key.as_str()))
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| normalize_address(k) == lower)
            })
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Every stored holder address, as keyed
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WrappedEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop every entry except the one of `address`
    pub fn retain_only(&mut self, address: &str) {
        let key = normalize_address(address);
        self.0.retain(|k, _| normalize_address(k) == key);
    }
}
