use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, Tag, aead::AeadInPlace};

use crate::error::{PrivNetError, Result};

pub const AEAD_KEY_BYTES: usize = 32;
pub const AEAD_NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;

/// ChaCha20-Poly1305 with the tag appended to the ciphertext.
pub fn encrypt_aead(
    key: &[u8; AEAD_KEY_BYTES],
    nonce: &[u8; AEAD_NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| PrivNetError::AeadFailure)?;
    let mut out = Vec::with_capacity(plaintext.len() + AEAD_TAG_BYTES);
    out.extend_from_slice(plaintext);
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut out)
        .map_err(|_| PrivNetError::AeadFailure)?;
    out.extend_from_slice(tag.as_slice());
    Ok(out)
}

pub fn decrypt_aead(
    key: &[u8; AEAD_KEY_BYTES],
    nonce: &[u8; AEAD_NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < AEAD_TAG_BYTES {
        return Err(PrivNetError::AeadFailure);
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| PrivNetError::AeadFailure)?;
    let (body, tag_bytes) = ciphertext.split_at(ciphertext.len() - AEAD_TAG_BYTES);
    let mut out = body.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut out,
            Tag::from_slice(tag_bytes),
        )
        .map_err(|_| PrivNetError::AeadFailure)?;
    Ok(out)
}
