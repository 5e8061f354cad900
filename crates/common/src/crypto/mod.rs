//! Cryptographic primitives for blinded document envelopes
//!
//! - **Keystream**: SHA-256 counter-mode expansion of short seeds into pads
//! - **Capsules**: the commutative two-operand blind/reveal construction and
//!   the chains built from it
//! - **Content encryption**: AES-256-GCM under a per-version DEK with a nonce
//!   derived from public document attributes
//! - **Key wrapping**: per-holder copies of the DEK, keyed by wallet
//!   signatures, secp256k1 ECDH, or the wallet provider
//!
//! # Capsules
//!
//! `combine(x, y)` produces a product from which either operand can be
//! revealed given the other. Products do not depend on argument order, so
//! a value can be blinded against several public attributes in sequence and
//! later peeled by anyone who knows those attributes and the order they
//! were applied in. Capsules are not encryption on their own: the
//! confidentiality of document content comes from AES-GCM, and the chain
//! only binds the ciphertext to its attributes.

pub mod capsule;
pub mod keystream;

mod dek;
mod key_wrap;
mod keys;

pub use capsule::{blind_chain, combine, peel_chain, reveal, CapsuleError};
pub use dek::{Dek, DekError, DocumentNonce, DEK_SIZE, NONCE_SIZE, TAG_SIZE};
pub use key_wrap::{
    dek_checksum, provider_plaintext, unwrap_with_signature, EcdhWrap, KeyWrapError,
    KeyWrappingService, SelfWrap, SignatureWrap, WrapScheme, SELF_WRAP_MESSAGE, SHARE_DEK_MESSAGE,
    SHARE_SESSION_MESSAGE,
};
pub use keys::{
    address_variants, normalize_address, to_checksum_address, KeyError, PublicKey, SecretKey,
};
