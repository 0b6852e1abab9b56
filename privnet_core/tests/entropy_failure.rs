use std::num::NonZeroU32;

use privnet_core::codec::{Tensor, encode};
use privnet_core::kem::{encapsulate_with_rng, keygen_derand, keygen_with_rng};
use privnet_core::mask::{MaskKey, mask};
use privnet_core::payload::seal_payload;
use privnet_core::preset::SecurityLevel;
use privnet_core::session::SecureSession;
use privnet_core::{PrivNetError, SharedSecret};
use rand_core::{CryptoRng, RngCore};

/// Entropy source that is always unavailable.
struct FailingRng;

impl RngCore for FailingRng {
    fn next_u32(&mut self) -> u32 {
        panic!("infallible draw from a failing source")
    }

    fn next_u64(&mut self) -> u64 {
        panic!("infallible draw from a failing source")
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {
        panic!("infallible draw from a failing source")
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand_core::Error> {
        let code = NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap();
        Err(rand_core::Error::from(code))
    }
}

impl CryptoRng for FailingRng {}

fn is_unavailable<T>(result: Result<T, PrivNetError>) -> bool {
    matches!(result, Err(PrivNetError::EntropyUnavailable))
}

#[test]
fn keygen_reports_missing_entropy() {
    for level in SecurityLevel::ALL {
        assert!(is_unavailable(keygen_with_rng(level, &mut FailingRng)));
    }
}

#[test]
fn encapsulate_reports_missing_entropy() {
    let pair = keygen_derand(SecurityLevel::High, &[1u8; 32], &[2u8; 32]);
    assert!(is_unavailable(encapsulate_with_rng(&pair.public_key, &mut FailingRng)));
    assert!(is_unavailable(SecureSession::initiate(&pair.public_key, 64.0, &mut FailingRng)));
    assert!(is_unavailable(seal_payload(&pair.public_key, b"hello", &mut FailingRng)));
}

#[test]
fn mask_reports_missing_entropy() {
    let key = MaskKey::from_shared_secret(&SharedSecret::from_bytes([7u8; 32]));
    let x = Tensor::from_rows(vec![vec![1.0, -2.0]]).unwrap();
    let encoded = encode(&x, 16.0).unwrap();
    assert!(is_unavailable(mask(&encoded, &key, &mut FailingRng)));

    let session = SecureSession::from_shared_secret(&SharedSecret::from_bytes([7u8; 32]), 16.0)
        .unwrap();
    assert!(is_unavailable(session.secure_encode(&x, &mut FailingRng)));
}
