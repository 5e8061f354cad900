//! Opening a sealed document as one of its holders
//!
//! The holder who sealed a document knows exactly which owner string, in
//! which casing, went into the chain and in which order. Other holders do
//! not: records written by different clients disagree on address casing and
//! occasionally on operand order. Recovery therefore runs a bounded search.
//!
//! - **Owner mode** (self-wrapped entry): the canonical order
//!   owner, timestamp, counter, with the holder's own address in each of its
//!   casings.
//! - **Recipient mode** (any shared entry): every address keyed in
//!   `wrapped_deks`, in each casing, under the canonical order first and
//!   the five other orders after that if nothing acceptable turned up.
//!
//! A candidate is acceptable when its SHA-256 matches the recorded ciphertext
//! checksum (and it is long enough to be real), or, with no checksum on
//! record, when it is the longest one found. At most `6 * operands` reveals
//! are attempted.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::metachunk::Metachunk;
use super::metadata::DocumentMetadata;
use super::seal::{content_hash, integrity_tag};
use super::DocumentError;
use crate::blobs::BlobStore;
use crate::config::Config;
use crate::crypto::{
    address_variants, normalize_address, peel_chain, reveal, Dek, DocumentNonce,
    KeyWrappingService, WrapScheme, NONCE_SIZE,
};
use crate::signer::Signer;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A public attribute a ciphertext chain is blinded against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOperand {
    Owner,
    Timestamp,
    Counter,
}

impl fmt::Display for ChainOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainOperand::Owner => write!(f, "owner"),
            ChainOperand::Timestamp => write!(f, "timestamp"),
            ChainOperand::Counter => write!(f, "counter"),
        }
    }
}

/// The order operands were applied in when a chain was built.
/// Peeling runs in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOrder([ChainOperand; 3]);

impl ChainOrder {
    /// owner, then timestamp, then counter
    pub const CANONICAL: ChainOrder = ChainOrder([
        ChainOperand::Owner,
        ChainOperand::Timestamp,
        ChainOperand::Counter,
    ]);

    /// Every permutation, canonical first
    pub const ALL: [ChainOrder; 6] = {
        use ChainOperand::*;
        [
            ChainOrder([Owner, Timestamp, Counter]),
            ChainOrder([Owner, Counter, Timestamp]),
            ChainOrder([Timestamp, Owner, Counter]),
            ChainOrder([Timestamp, Counter, Owner]),
            ChainOrder([Counter, Owner, Timestamp]),
            ChainOrder([Counter, Timestamp, Owner]),
        ]
    };

    /// `None` unless `operands` names each operand exactly once
    pub fn new(operands: [ChainOperand; 3]) -> Option<Self> {
        let order = ChainOrder(operands);
        Self::ALL.contains(&order).then_some(order)
    }

    pub fn operands(&self) -> [ChainOperand; 3] {
        self.0
    }

    /// The five non-canonical orders
    pub fn alternates() -> impl Iterator<Item = ChainOrder> {
        Self::ALL.into_iter().skip(1)
    }

    /// Operand values in construction order
    pub fn knowns<'a>(&self, owner: &'a str, timestamp: &'a str, counter: &'a str) -> [&'a str; 3] {
        self.0.map(|operand| match operand {
            ChainOperand::Owner => owner,
            ChainOperand::Timestamp => timestamp,
            ChainOperand::Counter => counter,
        })
    }
}

impl Default for ChainOrder {
    fn default() -> Self {
        Self::CANONICAL
    }
}

impl fmt::Display for ChainOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a} > {b} > {c}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// The holder wrapped the DEK for itself
    Owner,
    /// The DEK was shared with the holder
    Recipient,
}

/// Outcome of the secondary integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    Verified,
    /// Only returned when integrity enforcement is switched off
    Failed,
}

#[derive(Debug, Clone)]
pub struct RecoveredDocument {
    pub plaintext: Vec<u8>,
    /// The owner string that opened the chain, in the casing it was built with
    pub owner_operand: String,
    pub chain_order: ChainOrder,
    pub mode: RecoveryMode,
    pub integrity: IntegrityStatus,
    /// The ciphertext was selected by its recorded checksum, not as the
    /// longest candidate
    pub checksum_matched: bool,
}

/// Decode the text revealed from a chain into ciphertext bytes.
///
/// Tries hex (with or without `0x`), then standard base64, then URL-safe
/// base64 with or without padding, and finally takes the raw text bytes.
/// Hex goes first: legacy records stored bare hex, and an even-length hex
/// string is usually valid base64 too.
pub fn decode_payload(text: &str) -> Vec<u8> {
    let trimmed = text.trim();
    let hex_digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if let Ok(bytes) = hex::decode(hex_digits) {
        return bytes;
    }
    if let Ok(bytes) = BASE64.decode(trimmed) {
        return bytes;
    }
    if let Ok(bytes) = URL_SAFE_LENIENT.decode(trimmed) {
        return bytes;
    }
    text.as_bytes().to_vec()
}

/// A ciphertext reconstructed from the chain under one operand and order
#[derive(Debug, Clone)]
struct Candidate {
    order: ChainOrder,
    operand: String,
    ciphertext: Vec<u8>,
}

impl Candidate {
    fn checksum(&self) -> String {
        BASE64.encode(Sha256::digest(&self.ciphertext))
    }
}

/// Peel `chunk_a` under every combination of `orders` and `operands`,
/// keeping whatever reveals cleanly
fn reconstruct<I>(
    chunk_a: &str,
    operands: &[String],
    timestamp: &str,
    counter: &str,
    orders: I,
) -> Vec<Candidate>
where
    I: IntoIterator<Item = ChainOrder>,
{
    let mut candidates = Vec::new();
    for order in orders {
        for operand in operands {
            let knowns = order.knowns(operand, timestamp, counter);
            match peel_chain(chunk_a, &knowns) {
                Ok(text) => {
                    let ciphertext = decode_payload(&text);
                    tracing::debug!(%order, %operand, len = ciphertext.len(), "chain revealed candidate");
                    candidates.push(Candidate {
                        order,
                        operand: operand.clone(),
                        ciphertext,
                    });
                }
                Err(e) => tracing::debug!(%order, %operand, "chain did not reveal: {e}"),
            }
        }
    }
    candidates
}

/// First of the longest candidates
fn longest(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().fold(None, |best: Option<&Candidate>, c| match best {
        Some(b) if b.ciphertext.len() >= c.ciphertext.len() => Some(b),
        _ => Some(c),
    })
}

/// Open the ciphertext chain as its owner, who holds the DEK, using AES-GCM
/// itself to pick the right operand casing
pub(super) fn owner_ciphertext(
    chunk_a: &str,
    owner: &str,
    timestamp: &str,
    counter: &str,
    dek: &Dek,
    nonce: &DocumentNonce,
) -> Option<Vec<u8>> {
    reconstruct(
        chunk_a,
        &address_variants(owner),
        timestamp,
        counter,
        [ChainOrder::CANONICAL],
    )
    .into_iter()
    .find(|c| dek.decrypt(nonce, &c.ciphertext).is_ok())
    .map(|c| c.ciphertext)
}

/// Recipient-side reconstruction and decryption of sealed documents
#[derive(Debug, Clone, Default)]
pub struct RecoveryProtocol {
    config: Config,
    wrapping: KeyWrappingService,
}

impl RecoveryProtocol {
    pub fn new(config: Config) -> Self {
        let wrapping = KeyWrappingService::new(&config);
        Self { config, wrapping }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checksum match if a checksum is on record, longest otherwise
    fn pick<'c>(&self, candidates: &'c [Candidate], target: Option<&str>) -> Option<&'c Candidate> {
        match target {
            Some(target) => candidates.iter().find(|c| {
                let matches = c.checksum() == target;
                if matches && c.ciphertext.len() < self.config.min_checksum_candidate_len {
                    tracing::debug!(len = c.ciphertext.len(), "checksum match too short, rejected");
                    return false;
                }
                matches
            }),
            None => longest(candidates),
        }
    }

    fn select_owner(
        &self,
        chunk_a: &str,
        holder: &str,
        timestamp: &str,
        counter: &str,
        target: Option<&str>,
    ) -> Option<(Candidate, bool)> {
        let candidates = reconstruct(
            chunk_a,
            &address_variants(holder),
            timestamp,
            counter,
            [ChainOrder::CANONICAL],
        );
        if let Some(found) = self.pick(&candidates, target) {
            return Some((found.clone(), target.is_some()));
        }
        longest(&candidates).map(|c| (c.clone(), false))
    }

    fn select_recipient(
        &self,
        chunk_a: &str,
        metadata: &DocumentMetadata,
        timestamp: &str,
        counter: &str,
        target: Option<&str>,
    ) -> Option<(Candidate, bool)> {
        let mut operands: Vec<String> = Vec::new();
        for address in metadata.wrapped_deks.addresses() {
            for variant in address_variants(address) {
                if !operands.contains(&variant) {
                    operands.push(variant);
                }
            }
        }
        tracing::debug!(operands = operands.len(), "recipient mode operand candidates");

        let mut candidates = reconstruct(
            chunk_a,
            &operands,
            timestamp,
            counter,
            [ChainOrder::CANONICAL],
        );
        if let Some(found) = self.pick(&candidates, target) {
            return Some((found.clone(), target.is_some()));
        }

        if self.config.widen_chain_orders {
            tracing::debug!("nothing acceptable under the canonical order, widening");
            let alternates = reconstruct(
                chunk_a,
                &operands,
                timestamp,
                counter,
                ChainOrder::alternates(),
            );
            if let Some(found) = self.pick(&alternates, target) {
                return Some((found.clone(), target.is_some()));
            }
            candidates.extend(alternates);
        }

        if target.is_some() {
            tracing::warn!("no candidate matches the recorded ciphertext checksum");
        }
        longest(&candidates).map(|c| (c.clone(), false))
    }

    /// Recover the plaintext of `metadata`'s document as the holder behind
    /// `signer`.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::AccessDenied`] if the holder has no wrapped entry
    /// - [`DocumentError::Format`] if no candidate ciphertext can be revealed
    /// - [`DocumentError::Decrypt`] if the ciphertext is too short or AES-GCM
    ///   rejects it
    /// - [`DocumentError::KeyMismatch`] if the unwrapped DEK fails its checksum
    /// - [`DocumentError::Integrity`] if the secondary check fails and is
    ///   enforced
    /// - [`DocumentError::CapabilityUnsupported`] if the entry's scheme needs
    ///   something the signer lacks
    pub async fn recover(
        &self,
        signer: &dyn Signer,
        metadata: &DocumentMetadata,
        metachunk: &Metachunk,
    ) -> Result<RecoveredDocument, DocumentError> {
        let holder = signer.address().await?;
        let (_, entry) =
            metadata
                .wrapped_deks
                .find(&holder)
                .ok_or_else(|| DocumentError::AccessDenied {
                    address: normalize_address(&holder),
                })?;

        let timestamp = metadata.timestamp()?;
        let counter = metadata.counter()?;
        let nonce = metadata.nonce_for(entry)?;

        let scheme = entry.scheme();
        let mode = if scheme == WrapScheme::SelfSigned {
            RecoveryMode::Owner
        } else {
            RecoveryMode::Recipient
        };
        tracing::debug!(%holder, ?mode, scheme = scheme.name(), "recovering document");

        let target = entry
            .encrypted_data_sha256_b64
            .as_deref()
            .or(metadata.encrypted_data_sha256_b64.as_deref());

        let (candidate, checksum_matched) = match mode {
            RecoveryMode::Owner => {
                self.select_owner(&metachunk.chunk_a, &holder, &timestamp, &counter, target)
            }
            RecoveryMode::Recipient => {
                self.select_recipient(&metachunk.chunk_a, metadata, &timestamp, &counter, target)
            }
        }
        .ok_or_else(|| {
            DocumentError::Format("no operand candidate reveals the ciphertext chain".into())
        })?;

        if candidate.ciphertext.len() < self.config.min_ciphertext_len {
            return Err(DocumentError::Decrypt {
                ciphertext_len: candidate.ciphertext.len(),
                nonce_len: NONCE_SIZE,
            });
        }
        tracing::debug!(
            order = %candidate.order,
            operand = %candidate.operand,
            len = candidate.ciphertext.len(),
            checksum_matched,
            "selected ciphertext candidate"
        );

        let wrapped = entry.wrapped_dek_bytes()?;
        let dek = self.wrapping.unwrap(signer, &scheme, &wrapped, &nonce).await?;

        if let Some(expected) = &entry.dek_sha256_b64 {
            let actual = dek.checksum();
            if &actual != expected {
                tracing::warn!(%expected, %actual, "dek checksum mismatch");
                return Err(DocumentError::KeyMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            tracing::debug!("dek checksum verified");
        }

        let plaintext = dek.decrypt(&nonce, &candidate.ciphertext).map_err(|e| {
            tracing::warn!(
                ciphertext_len = candidate.ciphertext.len(),
                nonce_len = NONCE_SIZE,
                "content decryption failed"
            );
            DocumentError::from(e)
        })?;

        let integrity = self.check_integrity(
            &metachunk.chunk_b,
            &candidate.operand,
            &timestamp,
            &candidate.ciphertext,
            &plaintext,
        )?;

        Ok(RecoveredDocument {
            plaintext,
            owner_operand: candidate.operand,
            chain_order: candidate.order,
            mode,
            integrity,
            checksum_matched,
        })
    }

    fn check_integrity(
        &self,
        chunk_b: &str,
        operand: &str,
        timestamp: &str,
        ciphertext: &[u8],
        plaintext: &[u8],
    ) -> Result<IntegrityStatus, DocumentError> {
        let expected = content_hash(plaintext);
        let verified = reveal(chunk_b, &integrity_tag(operand, timestamp, ciphertext))
            .map(|revealed| revealed == expected)
            .unwrap_or(false);

        if verified {
            tracing::debug!("integrity verified");
            return Ok(IntegrityStatus::Verified);
        }
        if self.config.enforce_integrity {
            tracing::warn!("integrity check failed");
            return Err(DocumentError::Integrity);
        }
        tracing::warn!("integrity check failed, returning plaintext anyway");
        Ok(IntegrityStatus::Failed)
    }
}

/// Fetch the metachunk of `metadata` from `store` and recover the document
/// as the holder behind `signer`.
pub async fn open_document(
    signer: &dyn Signer,
    store: &dyn BlobStore,
    metadata: &DocumentMetadata,
    config: &Config,
) -> Result<RecoveredDocument, DocumentError> {
    let cid = metadata.content_id()?;
    let blob = store.get(&cid).await?;
    let metachunk = Metachunk::from_bytes(&blob)?;
    RecoveryProtocol::new(config.clone())
        .recover(signer, metadata, &metachunk)
        .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::blind_chain;

    #[test]
    fn test_chain_orders() {
        assert_eq!(ChainOrder::ALL[0], ChainOrder::CANONICAL);
        assert_eq!(ChainOrder::alternates().count(), 5);
        assert!(ChainOrder::alternates().all(|o| o != ChainOrder::CANONICAL));
        for (i, a) in ChainOrder::ALL.iter().enumerate() {
            for b in &ChainOrder::ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(ChainOrder::new([ChainOperand::Owner; 3]).is_none());
        assert_eq!(ChainOrder::CANONICAL.to_string(), "owner > timestamp > counter");
    }

    #[test]
    fn test_knowns_follow_order() {
        let order = ChainOrder::new([
            ChainOperand::Counter,
            ChainOperand::Owner,
            ChainOperand::Timestamp,
        ])
        .unwrap();
        assert_eq!(order.knowns("o", "t", "c"), ["c", "o", "t"]);
    }

    #[test]
    fn test_decode_payload_forms() {
        let bytes = b"\x00\x01\xfe\xff some ciphertext".to_vec();
        assert_eq!(decode_payload(&format!("0x{}", hex::encode(&bytes))), bytes);
        assert_eq!(decode_payload(&BASE64.encode(&bytes)), bytes);
        assert_eq!(
            decode_payload(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes)),
            bytes
        );
        assert_eq!(decode_payload("abcdef"), vec![0xab, 0xcd, 0xef]);
        // also valid base64, but a bare hex record wins
        assert_eq!(decode_payload("deadbeef"), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_payload(&hex::encode(&bytes)), bytes);
        assert_eq!(decode_payload("not base64 or hex!"), b"not base64 or hex!".to_vec());
    }

    #[test]
    fn test_reconstruct_finds_matching_operand() {
        let payload = BASE64.encode([7u8; 48]);
        let chain = blind_chain(&payload, &["0xAbC", "ts", "1"]);
        let operands = vec!["0xabc".to_string(), "0xAbC".to_string()];

        let candidates = reconstruct(&chain, &operands, "ts", "1", [ChainOrder::CANONICAL]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].operand, "0xAbC");
        assert_eq!(candidates[0].ciphertext, vec![7u8; 48]);
    }

    #[test]
    fn test_pick_prefers_checksum_and_rejects_short_matches() {
        let protocol = RecoveryProtocol::default();
        let short = Candidate {
            order: ChainOrder::CANONICAL,
            operand: "a".into(),
            ciphertext: vec![1; 20],
        };
        let long = Candidate {
            order: ChainOrder::CANONICAL,
            operand: "b".into(),
            ciphertext: vec![2; 100],
        };
        let right = Candidate {
            order: ChainOrder::ALL[3],
            operand: "c".into(),
            ciphertext: vec![3; 80],
        };
        let candidates = vec![short.clone(), long, right.clone()];

        let picked = protocol.pick(&candidates, Some(&right.checksum())).unwrap();
        assert_eq!(picked.operand, "c");

        assert!(protocol.pick(&candidates, Some(&short.checksum())).is_none());
        assert_eq!(protocol.pick(&candidates, None).unwrap().operand, "b");
    }

    #[test]
    fn test_longest_keeps_first_on_ties() {
        let make = |operand: &str| Candidate {
            order: ChainOrder::CANONICAL,
            operand: operand.into(),
            ciphertext: vec![0; 32],
        };
        let candidates = vec![make("first"), make("second")];
        assert_eq!(longest(&candidates).unwrap().operand, "first");
        assert!(longest(&[]).is_none());
    }
}
