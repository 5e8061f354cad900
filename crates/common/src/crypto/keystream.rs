//! Deterministic keystream expansion
//!
//! Expands a short seed into an arbitrarily long pad by hashing
//! `seed || counter` with SHA-256, where `counter` is a 4-byte big-endian
//! block index starting at zero. Digests are concatenated and the result is
//! truncated to the requested length.
//!
//! The capsule engine uses this to derive XOR pads from 8-byte tags, so the
//! output for a given seed must never change.

use sha2::{Digest, Sha256};

/// Size of a single SHA-256 output block
pub const BLOCK_SIZE: usize = 32;

/// Number of bytes produced between two progress notifications
pub const PROGRESS_INTERVAL: usize = 1024 * 1024;

/// Expand `seed` into `len` pseudorandom bytes.
pub fn expand(seed: &[u8], len: usize) -> Vec<u8> {
    expand_with_progress(seed, len, |_, _| {})
}

/// Expand `seed` into `len` bytes, calling `progress(done, total)` roughly every
/// [`PROGRESS_INTERVAL`] bytes and once more when the pad is complete.
///
/// Large documents turn into pads of the same size, so callers driving a UI
/// can surface how far along the expansion is.
pub fn expand_with_progress<F>(seed: &[u8], len: usize, mut progress: F) -> Vec<u8>
where
    F: FnMut(usize, usize),
{
    let mut out = Vec::with_capacity(len);
    let mut counter: u32 = 0;
    let mut next_report = PROGRESS_INTERVAL;

    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        let block = hasher.finalize();

        let take = (len - out.len()).min(BLOCK_SIZE);
        out.extend_from_slice(&block[..take]);
        counter = counter.wrapping_add(1);

        if out.len() >= next_report {
            progress(out.len(), len);
            next_report += PROGRESS_INTERVAL;
        }
    }

    progress(out.len(), len);
    out
}

/// XOR `data` in place with the keystream derived from `seed`.
pub(crate) fn apply(seed: &[u8], data: &mut [u8]) {
    let pad = expand(seed, data.len());
    data.iter_mut().zip(pad.iter()).for_each(|(b, p)| *b ^= p);
}
