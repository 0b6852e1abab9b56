//! Privacy core for PrivNet: a Module-LWE key encapsulation mechanism and a
//! fixed-point tensor codec whose linear operations run on masked data.
//!
//! The KEM follows the Kyber construction with BLAKE3 in the hash roles; it
//! has not been audited and must not guard production secrets.

pub mod aead;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod kem;
pub mod mask;
pub mod payload;
pub mod preset;
pub mod ring;
pub mod rng;
pub mod session;
pub mod versioning;

pub use crate::codec::{EncodedTensor, MAX_CODE, Tensor, decode, encode, linear_only};
pub use crate::config::CodecConfig;
pub use crate::error::{PrivNetError, Result};
pub use crate::kem::{
    KEM_SHARED_KEY_BYTES, KemCiphertext, KeyPair, PrivateKey, PublicKey, SharedSecret,
    decapsulate, encapsulate, encapsulate_with_rng, keygen, keygen_with_rng,
};
pub use crate::mask::{IntegerMatrix, MaskKey, MaskedTensor, linear_only_masked, mask, unmask};
pub use crate::payload::{
    DemoResponse, demo_roundtrip, demo_roundtrip_with_rng, open_payload, seal_payload,
};
pub use crate::preset::{KemParams, SecurityLevel};
pub use crate::ring::{RingElement, RingParams};
pub use crate::rng::{
    ConfiguredRng, SecureRng, configured_rng, derive_session_rng, fill_session_bytes, secure_rng,
};
pub use crate::session::SecureSession;
pub use crate::versioning::*;
