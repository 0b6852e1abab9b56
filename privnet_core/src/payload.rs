//! KEM + AEAD payloads and the demo roundtrip served by the API layer.
//!
//! Wire layout: `kem_ciphertext || nonce || aead_ciphertext`. The KEM
//! ciphertext doubles as associated data, binding the AEAD layer to the
//! encapsulation it was keyed from.

use log::debug;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead::{AEAD_KEY_BYTES, AEAD_NONCE_BYTES, decrypt_aead, encrypt_aead};
use crate::error::{PrivNetError, Result};
use crate::kem::{
    KemCiphertext, PrivateKey, PublicKey, SharedSecret, decapsulate, encapsulate_with_rng,
    keygen_with_rng,
};
use crate::preset::SecurityLevel;
use crate::rng::{fill_entropy, secure_rng};

const PAYLOAD_KEY_CONTEXT: &str = "privnet 2026-10-18 payload aead key v1";

/// JSON body returned by the demo endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoResponse {
    pub original: String,
    /// Hex of the full sealed payload.
    pub encrypted: String,
    pub decrypted: String,
}

fn payload_key(secret: &SharedSecret) -> Zeroizing<[u8; AEAD_KEY_BYTES]> {
    Zeroizing::new(blake3::derive_key(PAYLOAD_KEY_CONTEXT, secret.as_bytes()))
}

pub fn seal_payload<R: CryptoRng + RngCore + ?Sized>(
    public_key: &PublicKey,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let (kem, secret) = encapsulate_with_rng(public_key, rng)?;
    let key = payload_key(&secret);
    let mut nonce = [0u8; AEAD_NONCE_BYTES];
    fill_entropy(rng, &mut nonce)?;
    let body = encrypt_aead(&key, &nonce, plaintext, kem.as_bytes())?;

    let mut out = Vec::with_capacity(kem.as_bytes().len() + nonce.len() + body.len());
    out.extend_from_slice(kem.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&body);
    debug!(
        "seal_payload level={} plaintext_len={} payload_len={}",
        public_key.level(),
        plaintext.len(),
        out.len()
    );
    Ok(out)
}

pub fn open_payload(private_key: &PrivateKey, payload: &[u8]) -> Result<Vec<u8>> {
    let kem_len = private_key.level().params().ciphertext_bytes();
    if payload.len() < kem_len + AEAD_NONCE_BYTES {
        return Err(PrivNetError::InvalidCiphertext {
            reason: "payload shorter than its header",
        });
    }
    let (kem_bytes, rest) = payload.split_at(kem_len);
    let (nonce_bytes, body) = rest.split_at(AEAD_NONCE_BYTES);
    let kem = KemCiphertext::from_bytes(private_key.level(), kem_bytes)?;
    let secret = decapsulate(private_key, &kem)?;
    let key = payload_key(&secret);
    let mut nonce = [0u8; AEAD_NONCE_BYTES];
    nonce.copy_from_slice(nonce_bytes);
    decrypt_aead(&key, &nonce, body, kem_bytes)
}

/// Fresh keys, one sealed message, and its recovery: the body of the demo endpoint.
pub fn demo_roundtrip(message: &str, level: SecurityLevel) -> Result<DemoResponse> {
    demo_roundtrip_with_rng(message, level, &mut secure_rng())
}

pub fn demo_roundtrip_with_rng<R: CryptoRng + RngCore + ?Sized>(
    message: &str,
    level: SecurityLevel,
    rng: &mut R,
) -> Result<DemoResponse> {
    let pair = keygen_with_rng(level, rng)?;
    let sealed = seal_payload(&pair.public_key, message.as_bytes(), rng)?;
    let opened = open_payload(&pair.private_key, &sealed)?;
    let decrypted = String::from_utf8(opened).map_err(|_| PrivNetError::InvalidCiphertext {
        reason: "recovered plaintext is not UTF-8",
    })?;
    Ok(DemoResponse {
        original: message.to_owned(),
        encrypted: hex::encode(&sealed),
        decrypted,
    })
}
