use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entry::{WrappedDeks, WrappedEntry};
use crate::blobs::{BlobStoreError, ContentId};
use crate::crypto::{DekError, DocumentNonce};

/// Attribute holding the chain timestamp
pub const TOKENIZATION_DATE: &str = "Tokenization Date";
/// Attribute holding the version counter
pub const COUNTER: &str = "Counter";
pub const FILE_SIZE: &str = "File Size";
pub const FILE_TYPE: &str = "File Type";
pub const FILE_EXTENSION: &str = "File Extension";
pub const OWNER_NAME: &str = "Owner Name";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),
    #[error("invalid Counter attribute: {0}")]
    InvalidCounter(String),
    #[error("nonce not found in metadata or wrapped entry")]
    MissingNonce,
    #[error("invalid nonce: {0}")]
    InvalidNonce(#[from] DekError),
    #[error("invalid encrypted_file_cid: {0}")]
    InvalidCid(#[from] BlobStoreError),
}

/// A `{ trait_type, value }` pair of the metadata attribute list
///
/// Values are usually strings, but numbers show up in older records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: Value,
}

impl Attribute {
    pub fn new(trait_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            trait_type: trait_type.into(),
            value: value.into(),
        }
    }

    /// The value as text, for strings and numbers
    pub fn text(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// The document metadata record
///
/// Field names are part of the stored format. Fields this crate does not
/// interpret (name, description, image and so on) are carried in `extra` and
/// written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Content id of the stored metachunk
    pub encrypted_file_cid: String,
    /// Document nonce, hex
    #[serde(default, alias = "nonce_hex", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default)]
    pub wrapped_deks: WrappedDeks,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Base64 SHA-256 of the content ciphertext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_data_sha256_b64: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid metadata json: {e}").into())
    }

    pub fn to_json(&self) -> Result<String, MetadataError> {
        serde_json::to_string(self).map_err(|e| anyhow::anyhow!(e).into())
    }

    /// First attribute named exactly `trait_type`, else first one equal to it
    /// ignoring case
    pub fn attribute(&self, trait_type: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.trait_type == trait_type)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.trait_type.eq_ignore_ascii_case(trait_type))
            })
    }

    /// Replace the value of `trait_type`, appending it if missing
    pub fn set_attribute(&mut self, trait_type: &str, value: impl Into<Value>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.trait_type.eq_ignore_ascii_case(trait_type))
        {
            Some(attribute) => attribute.value = value,
            None => self.attributes.push(Attribute::new(trait_type, value)),
        }
    }

    /// The chain timestamp. Falls back to any attribute with "date" in its
    /// name for records that predate the `Tokenization Date` attribute.
    pub fn timestamp(&self) -> Result<String, MetadataError> {
        self.attribute(TOKENIZATION_DATE)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.trait_type.to_ascii_lowercase().contains("date"))
            })
            .and_then(Attribute::text)
            .ok_or(MetadataError::MissingAttribute(TOKENIZATION_DATE))
    }

    /// The counter exactly as stored, which is the form used as a chain operand
    pub fn counter(&self) -> Result<String, MetadataError> {
        self.attribute(COUNTER)
            .and_then(Attribute::text)
            .ok_or(MetadataError::MissingAttribute(COUNTER))
    }

    pub fn counter_value(&self) -> Result<u64, MetadataError> {
        let counter = self.counter()?;
        counter
            .trim()
            .parse()
            .map_err(|_| MetadataError::InvalidCounter(counter))
    }

    pub fn file_type(&self) -> Option<String> {
        self.attribute(FILE_TYPE).and_then(Attribute::text)
    }

    /// Nonce for `entry`: the entry's own if it carries one, else the
    /// document's
    pub fn nonce_for(&self, entry: &WrappedEntry) -> Result<DocumentNonce, MetadataError> {
        let hex = entry
            .nonce
            .as_deref()
            .or(self.nonce.as_deref())
            .ok_or(MetadataError::MissingNonce)?;
        Ok(DocumentNonce::from_hex(hex)?)
    }

    pub fn content_id(&self) -> Result<ContentId, MetadataError> {
        Ok(self.encrypted_file_cid.parse()?)
    }
}
