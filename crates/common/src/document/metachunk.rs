//! Textual storage envelope for a pair of blinded chains
//!
//! # Wire Format
//!
//! ```text
//! ESSENTIALIS[ base64( chunk_a "|SPLIT|" chunk_b ) ]
//! ```
//!
//! `chunk_a` is the blinded ciphertext chain, `chunk_b` the blinded
//! (plaintext hash, ciphertext HMAC) pair. Both are base64url products, so
//! neither contains the separator or brackets.
//!
//! Decoding also accepts the two older shapes seen in stored blobs: the
//! merged text placed between the brackets without base64, and the whole
//! bracketed envelope base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Envelope prefix, followed by `[`
pub const PREFIX: &str = "ESSENTIALIS";
/// Separator between the two merged chains
pub const SEPARATOR: &str = "|SPLIT|";

#[derive(Debug, thiserror::Error)]
pub enum MetachunkError {
    #[error("metachunk has no bracketed payload")]
    MissingPayload,
    #[error("metachunk payload is not valid text: {0}")]
    Encoding(String),
    #[error("metachunk payload holds {0} chunk(s), expected 2")]
    ChunkCount(usize),
}

/// Join two chains with [`SEPARATOR`]
pub fn merge(a: &str, b: &str) -> String {
    let mut merged = String::with_capacity(a.len() + SEPARATOR.len() + b.len());
    merged.push_str(a);
    merged.push_str(SEPARATOR);
    merged.push_str(b);
    merged
}

/// Split merged text at every [`SEPARATOR`]
pub fn split(merged: &str) -> Vec<&str> {
    merged.split(SEPARATOR).collect()
}

/// Wrap merged chain text in the storage envelope
pub fn encode(data: &str) -> String {
    format!("{PREFIX}[{}]", BASE64.encode(data))
}

/// Text between the first `[` and the first `]` after it
fn capture(text: &str) -> Option<&str> {
    let start = text.find('[')? + 1;
    let len = text[start..].find(']')?;
    Some(&text[start..start + len])
}

fn base64_text(data: &str) -> Option<String> {
    let bytes = BASE64.decode(data.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Unwrap the storage envelope, returning the merged chain text.
///
/// A missing `[` or `]` is an empty capture, not an error here;
/// [`Metachunk::parse`] rejects that as [`MetachunkError::MissingPayload`].
///
/// # Errors
///
/// [`MetachunkError::Encoding`] if the captured payload is neither merged
/// chain text nor base64 of it.
pub fn decode(text: &str) -> Result<String, MetachunkError> {
    let text = text.trim();

    let envelope = if text.contains('[') {
        text.to_string()
    } else {
        base64_text(text).unwrap_or_default()
    };

    let captured = capture(&envelope).unwrap_or_default();
    if captured.is_empty() || captured.contains(SEPARATOR) {
        return Ok(captured.to_string());
    }
    base64_text(captured)
        .ok_or_else(|| MetachunkError::Encoding("payload is neither merged text nor base64".into()))
}

/// The two chains held by a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metachunk {
    /// Ciphertext blinded against the document attributes
    pub chunk_a: String,
    /// Plaintext hash blinded against the ciphertext HMAC
    pub chunk_b: String,
}

impl Metachunk {
    pub fn new(chunk_a: String, chunk_b: String) -> Self {
        Self { chunk_a, chunk_b }
    }

    pub fn to_text(&self) -> String {
        encode(&merge(&self.chunk_a, &self.chunk_b))
    }

    pub fn parse(text: &str) -> Result<Self, MetachunkError> {
        let merged = decode(text)?;
        if merged.is_empty() {
            return Err(MetachunkError::MissingPayload);
        }
        match split(&merged).as_slice() {
            [a, b] => Ok(Self::new(a.to_string(), b.to_string())),
            parts => Err(MetachunkError::ChunkCount(parts.len())),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MetachunkError> {
        let text = std::str::from_utf8(data).map_err(|e| MetachunkError::Encoding(e.to_string()))?;
        Self::parse(text)
    }
}
