use serde::Deserialize;

/// Tunables for sealing and opening documents
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Treat a failed secondary integrity check as fatal (default: true).
    ///  When false the plaintext is returned alongside the failed status.
    pub enforce_integrity: bool,
    /// Shortest reconstructed payload accepted as a checksum match (default: 64)
    pub min_checksum_candidate_len: usize,
    /// Shortest reconstructed ciphertext handed to AES-GCM (default: 16,
    ///  the size of the authentication tag)
    pub min_ciphertext_len: usize,
    /// Sign every fixed message twice and refuse to continue if the two
    ///  signatures differ (default: false)
    pub verify_signer_determinism: bool,
    /// Let recipients search the five non-canonical chain orders when the
    ///  canonical one yields nothing acceptable (default: true)
    pub widen_chain_orders: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enforce_integrity: true,
            min_checksum_candidate_len: 64,
            min_ciphertext_len: 16,
            verify_signer_determinism: false,
            widen_chain_orders: true,
        }
    }
}
