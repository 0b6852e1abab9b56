//! Module-LWE key encapsulation with a Fujisaki-Okamoto transform.
//!
//! Keys and ciphertexts are opaque, fixed-length byte strings whose length is
//! set by the [`SecurityLevel`]. Decapsulating a well-formed ciphertext that
//! was not produced against the matching public key never fails: it yields
//! the implicit-rejection secret `J(z || ct)`, which is pseudorandom to anyone
//! without `z`.

use std::fmt;

use log::debug;
use rand_core::{CryptoRng, RngCore};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::crypto::{
    CpaPublicKey, CpaSecretKey, cpa_decrypt, cpa_encrypt, cpa_keygen, hash_g, hash_h, hash_j,
};
use crate::error::{PrivNetError, Result};
use crate::preset::{KemParams, SecurityLevel};
use crate::ring::MESSAGE_BYTES;
use crate::rng::{fill_entropy, secure_rng};
use crate::versioning::{KEM_CIPHERTEXT_VERSION, expect_version};

pub const KEM_SHARED_KEY_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    level: SecurityLevel,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Validates length and coefficient range before accepting the bytes.
    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self> {
        let key = Self {
            level,
            bytes: bytes.to_vec(),
        };
        key.decode()?;
        Ok(key)
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn decode(&self) -> Result<CpaPublicKey> {
        let params = self.level.params();
        if self.bytes.len() != params.public_key_bytes() {
            return Err(PrivNetError::InvalidKey {
                reason: "public key length",
            });
        }
        CpaPublicKey::from_bytes(&params, &self.bytes).ok_or(PrivNetError::InvalidKey {
            reason: "public key coefficient out of range",
        })
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("level", &self.level)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Private key bytes: packed `s || pk || H(pk) || z`. Wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    level: SecurityLevel,
    bytes: Zeroizing<Vec<u8>>,
}

struct DecodedPrivateKey<'a> {
    secret: CpaSecretKey,
    public: CpaPublicKey,
    public_hash: &'a [u8],
    rejection_seed: &'a [u8],
}

impl PrivateKey {
    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self> {
        let key = Self {
            level,
            bytes: Zeroizing::new(bytes.to_vec()),
        };
        key.decode()?;
        Ok(key)
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The public key embedded in the private key.
    pub fn public_key(&self) -> Result<PublicKey> {
        let params = self.level.params();
        let (_, rest) = self.split_secret(&params)?;
        PublicKey::from_bytes(self.level, &rest[..params.public_key_bytes()])
    }

    fn split_secret(&self, params: &KemParams) -> Result<(&[u8], &[u8])> {
        if self.bytes.len() != params.private_key_bytes() {
            return Err(PrivNetError::InvalidKey {
                reason: "private key length",
            });
        }
        let public_offset = params.private_key_bytes()
            - params.public_key_bytes()
            - 2 * MESSAGE_BYTES;
        Ok(self.bytes.split_at(public_offset))
    }

    fn decode(&self) -> Result<DecodedPrivateKey<'_>> {
        let params = self.level.params();
        let (secret_bytes, rest) = self.split_secret(&params)?;
        let (public_bytes, tail) = rest.split_at(params.public_key_bytes());
        let (public_hash, rejection_seed) = tail.split_at(MESSAGE_BYTES);
        let secret =
            CpaSecretKey::from_bytes(&params, secret_bytes).ok_or(PrivNetError::InvalidKey {
                reason: "private key coefficient out of range",
            })?;
        let public =
            CpaPublicKey::from_bytes(&params, public_bytes).ok_or(PrivNetError::InvalidKey {
                reason: "embedded public key coefficient out of range",
            })?;
        if hash_h(public_bytes).as_slice() != public_hash {
            return Err(PrivNetError::InvalidKey {
                reason: "embedded public key hash mismatch",
            });
        }
        Ok(DecodedPrivateKey {
            secret,
            public,
            public_hash,
            rejection_seed,
        })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// 32-byte shared secret, wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Zeroizing<[u8; KEM_SHARED_KEY_BYTES]>);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; KEM_SHARED_KEY_BYTES]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEM_SHARED_KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KemCiphertext {
    version: u16,
    level: SecurityLevel,
    bytes: Vec<u8>,
}

impl KemCiphertext {
    pub fn from_bytes(level: SecurityLevel, bytes: &[u8]) -> Result<Self> {
        check_ciphertext_len(level, bytes.len())?;
        Ok(Self {
            version: KEM_CIPHERTEXT_VERSION,
            level,
            bytes: bytes.to_vec(),
        })
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn check_ciphertext_len(level: SecurityLevel, len: usize) -> Result<()> {
    if len != level.params().ciphertext_bytes() {
        return Err(PrivNetError::InvalidCiphertext {
            reason: "ciphertext length",
        });
    }
    Ok(())
}

impl Serialize for KemCiphertext {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("KemCiphertext", 3)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("level", &self.level)?;
        state.serialize_field("bytes", &hex::encode(&self.bytes))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for KemCiphertext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            level: SecurityLevel,
            bytes: String,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, KEM_CIPHERTEXT_VERSION, "KemCiphertext")?;
        let bytes = hex::decode(&helper.bytes).map_err(D::Error::custom)?;
        KemCiphertext::from_bytes(helper.level, &bytes).map_err(D::Error::custom)
    }
}

pub fn keygen(level: SecurityLevel) -> Result<KeyPair> {
    let mut rng = secure_rng();
    keygen_with_rng(level, &mut rng)
}

/// Draws 64 fresh bytes (`d`, `z`) from `rng`; fails only when the source does.
pub fn keygen_with_rng<R: CryptoRng + RngCore + ?Sized>(
    level: SecurityLevel,
    rng: &mut R,
) -> Result<KeyPair> {
    let mut d = Zeroizing::new([0u8; MESSAGE_BYTES]);
    let mut z = Zeroizing::new([0u8; MESSAGE_BYTES]);
    fill_entropy(rng, d.as_mut_slice())?;
    fill_entropy(rng, z.as_mut_slice())?;
    Ok(keygen_derand(level, &d, &z))
}

/// Deterministic key generation from explicit seeds.
pub fn keygen_derand(
    level: SecurityLevel,
    d: &[u8; MESSAGE_BYTES],
    z: &[u8; MESSAGE_BYTES],
) -> KeyPair {
    let params = level.params();
    let (cpa_public, cpa_secret) = cpa_keygen(&params, d);
    let public_bytes = cpa_public.to_bytes();
    let mut private_bytes = Zeroizing::new(cpa_secret.to_bytes());
    private_bytes.extend_from_slice(&public_bytes);
    private_bytes.extend_from_slice(&hash_h(&public_bytes));
    private_bytes.extend_from_slice(z);
    debug!(
        "keygen level={} pk_len={} sk_len={}",
        level,
        public_bytes.len(),
        private_bytes.len()
    );
    KeyPair {
        public_key: PublicKey {
            level,
            bytes: public_bytes,
        },
        private_key: PrivateKey {
            level,
            bytes: private_bytes,
        },
    }
}

pub fn encapsulate(public_key: &PublicKey) -> Result<(KemCiphertext, SharedSecret)> {
    let mut rng = secure_rng();
    encapsulate_with_rng(public_key, &mut rng)
}

pub fn encapsulate_with_rng<R: CryptoRng + RngCore + ?Sized>(
    public_key: &PublicKey,
    rng: &mut R,
) -> Result<(KemCiphertext, SharedSecret)> {
    let mut message = Zeroizing::new([0u8; MESSAGE_BYTES]);
    fill_entropy(rng, message.as_mut_slice())?;
    encapsulate_derand(public_key, &message)
}

/// Encapsulation with an explicit 32-byte message in place of fresh randomness.
pub fn encapsulate_derand(
    public_key: &PublicKey,
    message: &[u8; MESSAGE_BYTES],
) -> Result<(KemCiphertext, SharedSecret)> {
    let params = public_key.level.params();
    let cpa_public = public_key.decode()?;
    let public_hash = hash_h(&public_key.bytes);
    let (shared, coins) = hash_g(&[message.as_slice(), &public_hash]);
    let coins = Zeroizing::new(coins);
    let bytes = cpa_encrypt(&params, &cpa_public, message, &coins);
    debug!(
        "encapsulate level={} ct_len={}",
        public_key.level,
        bytes.len()
    );
    let ciphertext = KemCiphertext {
        version: KEM_CIPHERTEXT_VERSION,
        level: public_key.level,
        bytes,
    };
    Ok((ciphertext, SharedSecret::from_bytes(shared)))
}

pub fn decapsulate(private_key: &PrivateKey, ciphertext: &KemCiphertext) -> Result<SharedSecret> {
    if ciphertext.version != KEM_CIPHERTEXT_VERSION {
        return Err(PrivNetError::VersionMismatch {
            context: "KemCiphertext",
            expected: KEM_CIPHERTEXT_VERSION,
            found: ciphertext.version,
        });
    }
    if ciphertext.level != private_key.level {
        return Err(PrivNetError::InvalidCiphertext {
            reason: "security level does not match the private key",
        });
    }
    check_ciphertext_len(private_key.level, ciphertext.bytes.len())?;
    let params = private_key.level.params();
    let key = private_key.decode()?;

    let message = Zeroizing::new(cpa_decrypt(&params, &key.secret, &ciphertext.bytes));
    let (candidate, coins) = hash_g(&[message.as_slice(), key.public_hash]);
    let coins = Zeroizing::new(coins);
    let reencrypted = cpa_encrypt(&params, &key.public, &message, &coins);

    // blake3::Hash equality is constant time.
    let accepted = blake3::hash(&reencrypted) == blake3::hash(&ciphertext.bytes);
    let rejection = hash_j(key.rejection_seed, &ciphertext.bytes);
    debug!(
        "decapsulate level={} ct_len={}",
        private_key.level,
        ciphertext.bytes.len()
    );
    Ok(SharedSecret::from_bytes(if accepted {
        candidate
    } else {
        rejection
    }))
}
