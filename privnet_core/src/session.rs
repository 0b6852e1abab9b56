use log::debug;
use rand_core::{CryptoRng, RngCore};

use crate::codec::{Tensor, check_scale, decode, encode};
use crate::error::{PrivNetError, Result};
use crate::kem::{
    KemCiphertext, PrivateKey, PublicKey, SharedSecret, decapsulate, encapsulate_with_rng,
    keygen_with_rng,
};
use crate::mask::{MaskKey, MaskedTensor, linear_only_masked, mask, unmask};
use crate::preset::SecurityLevel;

/// Keyed composition of the codec and the masking layer.
///
/// Holds only the explicit context every call needs (mask key and scale) and
/// never mutates it, so one session can serve concurrent callers as long as
/// each brings its own RNG.
#[derive(Clone, Debug)]
pub struct SecureSession {
    key: MaskKey,
    scale: f64,
}

impl SecureSession {
    pub fn from_shared_secret(secret: &SharedSecret, scale: f64) -> Result<Self> {
        check_scale(scale)?;
        Ok(Self {
            key: MaskKey::from_shared_secret(secret),
            scale,
        })
    }

    /// Sender side: encapsulates against `public_key` and keys a session with
    /// the resulting secret. The ciphertext goes to the key holder.
    pub fn initiate<R: CryptoRng + RngCore + ?Sized>(
        public_key: &PublicKey,
        scale: f64,
        rng: &mut R,
    ) -> Result<(Self, KemCiphertext)> {
        let (ciphertext, secret) = encapsulate_with_rng(public_key, rng)?;
        let session = Self::from_shared_secret(&secret, scale)?;
        debug!("session initiated level={} scale={}", public_key.level(), scale);
        Ok((session, ciphertext))
    }

    /// Key-holder side: recovers the secret from `ciphertext`.
    pub fn accept(private_key: &PrivateKey, ciphertext: &KemCiphertext, scale: f64) -> Result<Self> {
        let secret = decapsulate(private_key, ciphertext)?;
        debug!("session accepted level={} scale={}", private_key.level(), scale);
        Self::from_shared_secret(&secret, scale)
    }

    /// Both ends of a fresh session in one process: keygen, encapsulate,
    /// decapsulate. Returns `(sender, key_holder)`.
    pub fn establish<R: CryptoRng + RngCore + ?Sized>(
        level: SecurityLevel,
        scale: f64,
        rng: &mut R,
    ) -> Result<(Self, Self)> {
        let pair = keygen_with_rng(level, rng)?;
        let (sender, ciphertext) = Self::initiate(&pair.public_key, scale, rng)?;
        let holder = Self::accept(&pair.private_key, &ciphertext, scale)?;
        Ok((sender, holder))
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// `mask(encode(tensor, scale), key)`.
    pub fn secure_encode<R: CryptoRng + RngCore + ?Sized>(
        &self,
        tensor: &Tensor,
        rng: &mut R,
    ) -> Result<MaskedTensor> {
        let encoded = encode(tensor, self.scale)?;
        mask(&encoded, &self.key, rng)
    }

    /// `decode(unmask(masked, key))`.
    pub fn secure_decode(&self, masked: &MaskedTensor) -> Result<Tensor> {
        if masked.scale() != self.scale {
            return Err(PrivNetError::InvalidCiphertext {
                reason: "tensor scale does not match the session",
            });
        }
        let encoded = unmask(masked, &self.key)?;
        Ok(decode(&encoded))
    }

    /// Linear step on masked activations; needs no key, so any party may run it.
    pub fn secure_linear(masked: &MaskedTensor, plain: &Tensor) -> Result<MaskedTensor> {
        linear_only_masked(masked, plain)
    }
}
