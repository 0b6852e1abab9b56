use privnet_core::codec::{EncodedTensor, MAX_CODE, Tensor};
use privnet_core::kem::{KemCiphertext, decapsulate, keygen};
use privnet_core::mask::MaskedTensor;
use privnet_core::payload::open_payload;
use privnet_core::preset::SecurityLevel;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Arbitrary ciphertext bytes of the right length decapsulate to some key
    /// (implicit rejection); any other length is refused outright.
    #[test]
    fn decapsulate_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..1200)) {
        let pair = keygen(SecurityLevel::Standard).unwrap();
        match KemCiphertext::from_bytes(SecurityLevel::Standard, &bytes) {
            Ok(ct) => {
                prop_assert_eq!(bytes.len(), SecurityLevel::Standard.params().ciphertext_bytes());
                prop_assert!(decapsulate(&pair.private_key, &ct).is_ok());
            }
            Err(_) => prop_assert_ne!(bytes.len(), SecurityLevel::Standard.params().ciphertext_bytes()),
        }
    }

    #[test]
    fn open_payload_rejects_noise(bytes in proptest::collection::vec(any::<u8>(), 0..1000)) {
        let pair = keygen(SecurityLevel::Standard).unwrap();
        prop_assert!(open_payload(&pair.private_key, &bytes).is_err());
    }

    #[test]
    fn masked_tensor_json_is_validated(
        rows in 0usize..4,
        cols in 0usize..4,
        data in proptest::collection::vec(any::<u64>(), 0..16),
    ) {
        let zeros = [0u8; 16];
        let json = serde_json::json!({
            "version": 1,
            "shape": [rows, cols],
            "scale": 16.0,
            "nonce": zeros,
            "key_check": zeros,
            "data": data,
            "transforms": [],
            "bound": MAX_CODE,
        });
        let parsed = serde_json::from_value::<MaskedTensor>(json);
        prop_assert_eq!(parsed.is_ok(), rows * cols == data.len());
    }

    /// Shapes whose element count overflows `usize` are refused, not wrapped.
    #[test]
    fn huge_shapes_are_rejected(
        dims in proptest::collection::vec(1u64 << 20..1u64 << 40, 4..6),
        tail in 0u64..2,
    ) {
        let mut shape = dims;
        shape.push(tail);
        let zeros = [0u8; 16];
        let tensor = serde_json::json!({ "shape": shape, "data": [] });
        prop_assert!(serde_json::from_value::<Tensor>(tensor).is_err());
        let encoded = serde_json::json!({
            "version": 1, "shape": shape, "scale": 1.0, "data": [],
        });
        prop_assert!(serde_json::from_value::<EncodedTensor>(encoded).is_err());
        let masked = serde_json::json!({
            "version": 1,
            "shape": shape,
            "scale": 1.0,
            "nonce": zeros,
            "key_check": zeros,
            "data": [],
            "transforms": [],
            "bound": MAX_CODE,
        });
        prop_assert!(serde_json::from_value::<MaskedTensor>(masked).is_err());
        let transform = serde_json::json!({
            "version": 1,
            "shape": [0, 0],
            "scale": 1.0,
            "nonce": zeros,
            "key_check": zeros,
            "data": [],
            "transforms": [{ "rows": shape[0], "cols": shape[1], "data": [] }],
            "bound": MAX_CODE,
        });
        prop_assert!(serde_json::from_value::<MaskedTensor>(transform).is_err());
    }
}

#[test]
#[ignore]
fn fuzz_all_levels_roundtrip() {
    for level in SecurityLevel::ALL {
        let pair = keygen(level).unwrap();
        for _ in 0..64 {
            let (ct, secret) = privnet_core::kem::encapsulate(&pair.public_key).unwrap();
            let recovered = decapsulate(&pair.private_key, &ct).unwrap();
            assert_eq!(secret.as_bytes(), recovered.as_bytes());
        }
    }
}
