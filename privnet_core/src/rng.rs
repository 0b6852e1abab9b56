//! RNG helpers distinguishing deterministic derived streams and the secure system RNG.
//!
//! Matrix expansion, noise sampling and mask streams are derived from a seed
//! and a label using BLAKE3, feeding the result into `ChaCha20Rng`. Fresh
//! entropy for keys, encapsulation messages and mask nonces comes from the
//! caller's `CryptoRng`, which is `OsRng` unless a test seed is configured.

use blake3::Hasher;
use rand::rngs::OsRng;
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore, SeedableRng};

use crate::error::{PrivNetError, Result};

/// Convenience alias for the OS-backed RNG used for keygen/encapsulation.
pub type SecureRng = OsRng;

/// Deterministic RNG derived from a seed, stream index, and label.
pub fn derive_session_rng(seed: &[u8], index: u64, label: &[u8]) -> ChaCha20Rng {
    let mut hasher = Hasher::new();
    hasher.update(seed);
    hasher.update(&index.to_le_bytes());
    hasher.update(label);
    ChaCha20Rng::from_seed(*hasher.finalize().as_bytes())
}

/// Fills `out` from the derived stream for `(seed, index, label)`.
pub fn fill_session_bytes(seed: &[u8], index: u64, label: &[u8], out: &mut [u8]) {
    let mut rng = derive_session_rng(seed, index, label);
    rng.fill_bytes(out);
}

/// Draws fresh entropy, surfacing source failure instead of panicking.
pub fn fill_entropy<R: CryptoRng + RngCore + ?Sized>(rng: &mut R, out: &mut [u8]) -> Result<()> {
    rng.try_fill_bytes(out)
        .map_err(|_| PrivNetError::EntropyUnavailable)
}

pub fn secure_rng() -> SecureRng {
    OsRng
}

/// Generator selected by configuration: the OS source in normal operation,
/// a seeded ChaCha20 stream for reproducible runs.
#[derive(Clone, Debug)]
pub enum ConfiguredRng {
    Os(OsRng),
    Seeded(ChaCha20Rng),
}

pub fn configured_rng(seed: Option<u64>) -> ConfiguredRng {
    match seed {
        Some(seed) => ConfiguredRng::Seeded(ChaCha20Rng::seed_from_u64(seed)),
        None => ConfiguredRng::Os(OsRng),
    }
}

impl RngCore for ConfiguredRng {
    fn next_u32(&mut self) -> u32 {
        match self {
            Self::Os(rng) => rng.next_u32(),
            Self::Seeded(rng) => rng.next_u32(),
        }
    }

    fn next_u64(&mut self) -> u64 {
        match self {
            Self::Os(rng) => rng.next_u64(),
            Self::Seeded(rng) => rng.next_u64(),
        }
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        match self {
            Self::Os(rng) => rng.fill_bytes(dest),
            Self::Seeded(rng) => rng.fill_bytes(dest),
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        match self {
            Self::Os(rng) => rng.try_fill_bytes(dest),
            Self::Seeded(rng) => rng.try_fill_bytes(dest),
        }
    }
}

impl CryptoRng for ConfiguredRng {}
