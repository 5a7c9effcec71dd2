//! Per-user key derivation.
//!
//! Keys are derived with PBKDF2-HMAC-SHA256 from the user id and the
//! server-wide secret. The derivation is deterministic: the same inputs always
//! produce the same key, so ciphertext written today stays readable as long as
//! the server secret does not change.
//!
//! A session secret can still be supplied for reading records written by the
//! older session-bound scheme. Those records become unreadable once the session
//! ends, so new data must never be encrypted under a session-bound key.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the derived key in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// PBKDF2 iteration count. Changing it invalidates every stored record.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Used when no server secret is configured. Anyone who knows it can derive
/// every user's key, so startup warns loudly and production mode refuses it.
pub const FALLBACK_SERVER_SECRET: &str = "default-secret-change-in-production";

/// Process-wide secret mixed into every derived key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ServerSecret {
    value: String,
    fallback: bool,
}

impl ServerSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            fallback: false,
        }
    }

    /// The well-known weak default.
    pub fn fallback() -> Self {
        Self {
            value: FALLBACK_SERVER_SECRET.to_string(),
            fallback: true,
        }
    }

    /// Uses `value` when it is present and non-empty, the fallback otherwise.
    pub fn from_optional(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Self::new(v),
            _ => Self::fallback(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSecret")
            .field("value", &"[REDACTED]")
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// A 256-bit key that lives only for the duration of one encrypt/decrypt call.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { key: bytes }
    }

    /// Get key bytes (sensitive)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derives the encryption key for `user_id`.
///
/// The user id bytes are the salt. The password is `user_id:session_secret`
/// when a session secret is given, `user_id:server_secret` otherwise.
/// `user_id` must be non-empty; callers validate it at the vault boundary.
pub fn derive_key(
    user_id: &str,
    session_secret: Option<&str>,
    server_secret: &ServerSecret,
) -> DerivedKey {
    let secret = session_secret.unwrap_or_else(|| server_secret.expose());
    let password = Zeroizing::new(format!("{}:{}", user_id, secret));

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        user_id.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );

    let derived = DerivedKey::from_bytes(key);
    key.zeroize();
    derived
}

/// Derives the stable, session-independent key used for all new writes.
pub fn derive_stable_key(user_id: &str, server_secret: &ServerSecret) -> DerivedKey {
    derive_key(user_id, None, server_secret)
}
