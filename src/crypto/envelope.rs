//! AES-256-GCM envelope codec.
//!
//! Serialized form: `salt:nonce:tag:ciphertext`, each segment standard base64.
//! The salt is random filler kept for format compatibility; key salting happens
//! in [`super::kdf`]. Every call to [`encrypt`] uses a fresh random nonce.

use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    Aes256Gcm, AesGcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};

use super::kdf::DerivedKey;
use crate::error::CodecError;

/// AES-256-GCM with a 128-bit nonce, the layout existing records were written with
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Segment separator
pub const DELIMITER: char = ':';

/// Size of the decorative salt segment in bytes
pub const SALT_SIZE: usize = 64;

/// Nonce size used for new envelopes (128 bits)
pub const NONCE_SIZE: usize = 16;

/// Standard 96-bit GCM nonce, accepted on decrypt
pub const SHORT_NONCE_SIZE: usize = 12;

/// GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// Encrypts `plaintext` under `key` and returns the serialized envelope.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> Result<String, CodecError> {
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    // Generate random nonce (never reuse!)
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&nonce_bytes), b"", &mut buffer)
        .map_err(|_| CodecError::PlaintextTooLarge)?;

    Ok([
        BASE64.encode(salt),
        BASE64.encode(nonce_bytes),
        BASE64.encode(tag),
        BASE64.encode(&buffer),
    ]
    .join(&DELIMITER.to_string()))
}

/// Decrypts a serialized envelope.
///
/// Fails with [`CodecError::MalformedEnvelope`] when the blob does not have four
/// decodable segments and with [`CodecError::AuthenticationFailure`] when the tag
/// does not verify. No plaintext is returned on failure.
pub fn decrypt(blob: &str, key: &DerivedKey) -> Result<Vec<u8>, CodecError> {
    let segments: Vec<&str> = blob.split(DELIMITER).collect();
    if segments.len() != 4 {
        return Err(CodecError::MalformedEnvelope(format!(
            "expected 4 segments, found {}",
            segments.len()
        )));
    }

    // The salt carries no meaning but must still be well-formed
    decode_segment(segments[0], "salt")?;
    let nonce = decode_segment(segments[1], "nonce")?;
    let tag = decode_segment(segments[2], "tag")?;
    let mut buffer = decode_segment(segments[3], "ciphertext")?;

    if tag.len() != TAG_SIZE {
        return Err(CodecError::MalformedEnvelope(format!(
            "invalid tag size: expected {}, got {}",
            TAG_SIZE,
            tag.len()
        )));
    }
    let tag = Tag::from_slice(&tag);

    let verified = match nonce.len() {
        NONCE_SIZE => Aes256Gcm16::new(key.as_bytes().into()).decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&nonce),
            b"",
            &mut buffer,
            tag,
        ),
        SHORT_NONCE_SIZE => Aes256Gcm::new(key.as_bytes().into()).decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            b"",
            &mut buffer,
            tag,
        ),
        other => {
            return Err(CodecError::MalformedEnvelope(format!(
                "invalid nonce size: {}",
                other
            )))
        }
    };

    verified.map_err(|_| CodecError::AuthenticationFailure)?;
    Ok(buffer)
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(segment)
        .map_err(|e| CodecError::MalformedEnvelope(format!("{} is not valid base64: {}", name, e)))
}
