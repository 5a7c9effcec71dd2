//! Key derivation and authenticated encryption for stored credentials.
//!
//! ```text
//!  (user_id, server secret) ──PBKDF2──▶ DerivedKey ──AES-256-GCM──▶ "salt:nonce:tag:ciphertext"
//! ```
//!
//! Neither half keeps state: keys are recomputed per operation and the codec
//! is a pure transformation, so both are safe to call concurrently.

pub mod envelope;
pub mod kdf;

pub use envelope::{decrypt, encrypt};
pub use kdf::{derive_key, derive_stable_key, DerivedKey, ServerSecret, FALLBACK_SERVER_SECRET};
