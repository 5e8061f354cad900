//! Two-operand mutual blinding
//!
//! `combine(x, y)` produces a *product* from which either operand can be
//! recovered by anyone who already knows the other one, via `reveal`.
//! This is a closed two-party construction, not a general commutative cipher:
//! it only answers "given one value, what was the other".
//!
//! # Wire Format
//!
//! Each operand is length-prefixed (`u32` big-endian) before use. A product is
//! two capsules sorted by raw byte value, concatenated and encoded as
//! base64url without padding:
//!
//! ```text
//! capsule = [ tag: 8 bytes ][ len: 4 bytes BE ][ ciphertext: len bytes ]
//! ```
//!
//! The capsule carrying `x` is tagged with `SHA-256(lenprefix(y))[..8]` and its
//! ciphertext is `lenprefix(x)` XOR a keystream seeded by that tag, and vice
//! versa. Sorting makes `combine(x, y) == combine(y, x)` byte for byte.
//!
//! # Chains
//!
//! A chain blinds a value against several knowns in sequence, using the
//! previous product as one operand each time. Chains must be peeled in the
//! exact reverse order of construction.
//!
//! # Legacy Input
//!
//! Products written by older encoders are not always well formed. Parsing falls
//! back to a boundary scan accepting little-endian length headers, and opening
//! a capsule falls back through little-endian, trailing-bytes and whole-buffer
//! interpretations of the recovered length prefix. Every fallback requires the
//! whole input to be consumed, so data is never silently dropped.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::keystream;

/// Size of a capsule tag in bytes
pub const TAG_SIZE: usize = 8;
/// Size of a length prefix in bytes
pub const LEN_SIZE: usize = 4;
/// Size of a capsule header (`tag || len`)
pub const HEADER_SIZE: usize = TAG_SIZE + LEN_SIZE;
/// Smallest payload accepted from a heuristic length fallback
pub const MIN_FALLBACK_LEN: usize = 32;

/// Errors that can occur while revealing a product
#[derive(Debug, thiserror::Error)]
pub enum CapsuleError {
    #[error("product is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("malformed product: {0}")]
    Malformed(String),
    #[error("known operand does not match product")]
    OperandMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    fn read(self, bytes: &[u8]) -> usize {
        let mut buf = [0u8; LEN_SIZE];
        buf.copy_from_slice(&bytes[..LEN_SIZE]);
        match self {
            ByteOrder::Big => u32::from_be_bytes(buf) as usize,
            ByteOrder::Little => u32::from_le_bytes(buf) as usize,
        }
    }
}

/// A parsed view over one capsule of a product
#[derive(Debug, Clone, Copy)]
struct Capsule<'a> {
    tag: &'a [u8],
    ciphertext: &'a [u8],
}

fn length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_SIZE + data.len());
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}

fn tag_of(encoded: &[u8]) -> [u8; TAG_SIZE] {
    let digest = Sha256::digest(encoded);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&digest[..TAG_SIZE]);
    tag
}

/// Tag identifying `operand` inside a product
fn operand_tag(operand: &str) -> [u8; TAG_SIZE] {
    tag_of(&length_prefixed(operand.as_bytes()))
}

fn seal_capsule(tag: &[u8; TAG_SIZE], encoded: &[u8]) -> Vec<u8> {
    let mut body = encoded.to_vec();
    keystream::apply(tag, &mut body);

    let mut capsule = Vec::with_capacity(HEADER_SIZE + body.len());
    capsule.extend_from_slice(tag);
    capsule.extend_from_slice(&(body.len() as u32).to_be_bytes());
    capsule.extend_from_slice(&body);
    capsule
}

/// Blind `x` and `y` against each other.
///
/// The result does not depend on argument order.
pub fn combine(x: &str, y: &str) -> String {
    let x_encoded = length_prefixed(x.as_bytes());
    let y_encoded = length_prefixed(y.as_bytes());

    let carries_x = seal_capsule(&tag_of(&y_encoded), &x_encoded);
    let carries_y = seal_capsule(&tag_of(&x_encoded), &y_encoded);

    let (low, high) = if carries_x <= carries_y {
        (carries_x, carries_y)
    } else {
        (carries_y, carries_x)
    };

    let mut product = low;
    product.extend_from_slice(&high);
    URL_SAFE_NO_PAD.encode(product)
}

/// Recover the operand that was combined with `known`.
///
/// # Errors
///
/// - [`CapsuleError::Encoding`] if the product is not base64url
/// - [`CapsuleError::Malformed`] if no two-capsule layout consumes the product
/// - [`CapsuleError::OperandMismatch`] if `known` opens neither capsule
pub fn reveal(product: &str, known: &str) -> Result<String, CapsuleError> {
    let raw = decode_product(product)?;
    let (first, second) = split_capsules(&raw)?;
    let tag = operand_tag(known);

    let candidates = if first.tag == tag {
        vec![first]
    } else if second.tag == tag {
        vec![second]
    } else {
        tracing::debug!("reveal: no capsule tag matches known operand, trying both");
        vec![first, second]
    };

    for capsule in candidates {
        if let Some(value) = open_capsule(&capsule, &tag, raw.len()) {
            return Ok(value);
        }
    }

    Err(CapsuleError::OperandMismatch)
}

/// Blind `value` against each of `knowns` in order.
///
/// The first known is combined with the value, each following known with the
/// previous product. An empty list returns the value unchanged.
pub fn blind_chain<S: AsRef<str>>(value: &str, knowns: &[S]) -> String {
    knowns
        .iter()
        .fold(value.to_string(), |product, known| {
            combine(&product, known.as_ref())
        })
}

/// Peel a chain built by [`blind_chain`] with the same `knowns`, given in
/// construction order. Reveals run in reverse.
pub fn peel_chain<S: AsRef<str>>(product: &str, knowns: &[S]) -> Result<String, CapsuleError> {
    knowns
        .iter()
        .rev()
        .try_fold(product.to_string(), |product, known| {
            reveal(&product, known.as_ref())
        })
}

fn decode_product(product: &str) -> Result<Vec<u8>, CapsuleError> {
    let trimmed = product.trim().trim_end_matches('=');
    if trimmed.contains(['+', '/']) {
        // tolerate the standard alphabet
        let normalized = trimmed.replace('+', "-").replace('/', "_");
        return Ok(URL_SAFE_NO_PAD.decode(normalized)?);
    }
    Ok(URL_SAFE_NO_PAD.decode(trimmed)?)
}

fn read_capsule(buf: &[u8], order: ByteOrder) -> Option<(Capsule<'_>, &[u8])> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let len = order.read(&buf[TAG_SIZE..HEADER_SIZE]);
    let end = HEADER_SIZE.checked_add(len)?;
    if end > buf.len() {
        return None;
    }
    let capsule = Capsule {
        tag: &buf[..TAG_SIZE],
        ciphertext: &buf[HEADER_SIZE..end],
    };
    Some((capsule, &buf[end..]))
}

fn strict_split(raw: &[u8]) -> Option<(Capsule<'_>, Capsule<'_>)> {
    let (first, rest) = read_capsule(raw, ByteOrder::Big)?;
    let (second, rest) = read_capsule(rest, ByteOrder::Big)?;
    rest.is_empty().then_some((first, second))
}

/// A whole buffer is one capsule if its header declares exactly the remaining
/// length in either byte order.
fn exact_capsule(buf: &[u8]) -> Option<Capsule<'_>> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let body = buf.len() - HEADER_SIZE;
    let header = &buf[TAG_SIZE..HEADER_SIZE];
    if ByteOrder::Big.read(header) == body || ByteOrder::Little.read(header) == body {
        return Some(Capsule {
            tag: &buf[..TAG_SIZE],
            ciphertext: &buf[HEADER_SIZE..],
        });
    }
    None
}

fn scan_split(raw: &[u8]) -> Option<(Capsule<'_>, Capsule<'_>)> {
    if raw.len() < 2 * HEADER_SIZE {
        return None;
    }
    (HEADER_SIZE..=raw.len() - HEADER_SIZE).find_map(|boundary| {
        let (head, tail) = raw.split_at(boundary);
        Some((exact_capsule(head)?, exact_capsule(tail)?))
    })
}

fn split_capsules(raw: &[u8]) -> Result<(Capsule<'_>, Capsule<'_>), CapsuleError> {
    if let Some(pair) = strict_split(raw) {
        return Ok(pair);
    }
    if let Some(pair) = scan_split(raw) {
        tracing::warn!(
            "reveal: product of {} bytes parsed by boundary scan",
            raw.len()
        );
        return Ok(pair);
    }
    Err(CapsuleError::Malformed(format!(
        "no two-capsule layout consumes {} bytes",
        raw.len()
    )))
}

fn exact_prefixed(plain: &[u8], order: ByteOrder) -> Option<String> {
    if plain.len() < LEN_SIZE || order.read(plain) != plain.len() - LEN_SIZE {
        return None;
    }
    String::from_utf8(plain[LEN_SIZE..].to_vec()).ok()
}

fn plausible(body: &[u8], cap: usize) -> Option<String> {
    if body.len() < MIN_FALLBACK_LEN || body.len() > cap {
        return None;
    }
    String::from_utf8(body.to_vec())
        .ok()
        .filter(|value| !value.is_empty())
}

fn open_capsule(capsule: &Capsule<'_>, tag: &[u8; TAG_SIZE], cap: usize) -> Option<String> {
    let mut plain = capsule.ciphertext.to_vec();
    keystream::apply(tag, &mut plain);

    if let Some(value) = exact_prefixed(&plain, ByteOrder::Big) {
        return Some(value);
    }
    if let Some(value) = exact_prefixed(&plain, ByteOrder::Little) {
        tracing::warn!("reveal: accepted little-endian length prefix");
        return Some(value);
    }
    if plain.len() > LEN_SIZE {
        if let Some(value) = plausible(&plain[LEN_SIZE..], cap) {
            tracing::warn!("reveal: length prefix ignored, trusting remaining bytes");
            return Some(value);
        }
    }
    if let Some(value) = plausible(&plain, cap) {
        tracing::warn!("reveal: treating whole capsule as payload");
        return Some(value);
    }
    None
}
