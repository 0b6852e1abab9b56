//! Additive masking of encoded tensors under a KEM-derived key.
//!
//! Codes are lifted into `Z_2^64` and offset by a keyed ChaCha20 stream, so a
//! masked tensor reveals its shape and scale and nothing else. Linear maps
//! with integral plaintext weights commute with the mask: the holder of the
//! key pushes the same stream through the recorded weight matrices and
//! subtracts it.

use std::fmt;

use blake3::Hasher;
use log::debug;
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroizing;

use crate::codec::{EncodedTensor, MAX_CODE, Tensor, element_count, matmul_dims};
use crate::error::{PrivNetError, Result};
use crate::kem::SharedSecret;
use crate::rng::fill_entropy;
use crate::versioning::{MASKED_TENSOR_VERSION, expect_version};

pub const MASK_NONCE_BYTES: usize = 16;
const KEY_CHECK_BYTES: usize = 16;
const MASK_KEY_CONTEXT: &str = "privnet 2026-10-18 tensor mask key v1";

/// Symmetric key for the masking stream. Wiped on drop.
#[derive(Clone)]
pub struct MaskKey(Zeroizing<[u8; 32]>);

impl MaskKey {
    pub fn from_shared_secret(secret: &SharedSecret) -> Self {
        Self(Zeroizing::new(blake3::derive_key(
            MASK_KEY_CONTEXT,
            secret.as_bytes(),
        )))
    }

    fn keyed(&self, label: &[u8], nonce: &[u8; MASK_NONCE_BYTES]) -> [u8; 32] {
        let mut hasher = Hasher::new_keyed(&self.0);
        hasher.update(label);
        hasher.update(nonce);
        *hasher.finalize().as_bytes()
    }

    fn stream(&self, nonce: &[u8; MASK_NONCE_BYTES]) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(self.keyed(b"privnet::mask-stream", nonce))
    }

    fn key_check(&self, nonce: &[u8; MASK_NONCE_BYTES]) -> [u8; KEY_CHECK_BYTES] {
        let mut check = [0u8; KEY_CHECK_BYTES];
        check.copy_from_slice(&self.keyed(b"privnet::mask-check", nonce)[..KEY_CHECK_BYTES]);
        check
    }
}

impl fmt::Debug for MaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MaskKey(..)")
    }
}

/// Plaintext weight matrix restricted to integers in the `i32` range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<i64>,
}

impl IntegerMatrix {
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let [rows, cols] = *tensor.shape() else {
            return Err(PrivNetError::DimensionMismatch {
                left: tensor.shape().to_vec(),
                right: vec![],
            });
        };
        let data = tensor
            .data()
            .iter()
            .map(|&w| {
                if w.fract() == 0.0 && w.abs() <= f64::from(i32::MAX) {
                    Ok(w as i64)
                } else {
                    Err(PrivNetError::NonIntegralWeights(w))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rows, cols, data })
    }

    /// Largest column L1 norm: how much one application can grow `max |code|`.
    fn growth(&self) -> u128 {
        if self.rows == 0 {
            return 0;
        }
        (0..self.cols)
            .map(|j| {
                (0..self.rows)
                    .map(|t| u128::from(self.data[t * self.cols + j].unsigned_abs()))
                    .sum::<u128>()
            })
            .max()
            .unwrap_or(0)
    }
}

/// Bound on `|code|` after `weights`, or `None` once it passes `i64::MAX` and
/// the `Z_2^64` result can no longer be read back as a signed code.
fn next_bound(bound: u64, weights: &IntegerMatrix) -> Option<u64> {
    u128::from(bound)
        .checked_mul(weights.growth())
        .filter(|&next| next <= i64::MAX as u128)
        .map(|next| next as u64)
}

/// `data (m x rows) * weights (rows x cols)` in `Z_2^64`.
fn wrapping_matmul(data: &[u64], m: usize, weights: &IntegerMatrix) -> Vec<u64> {
    let (k, n) = (weights.rows, weights.cols);
    let mut out = vec![0u64; m * n];
    for i in 0..m {
        for t in 0..k {
            let a = data[i * k + t];
            for j in 0..n {
                let w = weights.data[t * n + j] as u64;
                out[i * n + j] = out[i * n + j].wrapping_add(a.wrapping_mul(w));
            }
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaskedTensor {
    version: u16,
    shape: Vec<usize>,
    scale: f64,
    nonce: [u8; MASK_NONCE_BYTES],
    key_check: [u8; KEY_CHECK_BYTES],
    data: Vec<u64>,
    transforms: Vec<IntegerMatrix>,
    /// Upper bound on `|code|` under the mask, grown by every transform.
    bound: u64,
}

impl MaskedTensor {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn words(&self) -> &[u64] {
        &self.data
    }

    /// Plaintext weights applied since masking, in order.
    pub fn transforms(&self) -> &[IntegerMatrix] {
        &self.transforms
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    /// Element count of the tensor as originally masked.
    fn masked_len(&self) -> usize {
        match self.transforms.first() {
            Some(first) => self.shape[0] * first.rows,
            None => self.data.len(),
        }
    }
}

impl<'de> Deserialize<'de> for MaskedTensor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            shape: Vec<usize>,
            scale: f64,
            nonce: [u8; MASK_NONCE_BYTES],
            key_check: [u8; KEY_CHECK_BYTES],
            data: Vec<u64>,
            transforms: Vec<IntegerMatrix>,
            bound: u64,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, MASKED_TENSOR_VERSION, "MaskedTensor")?;
        if element_count(&helper.shape) != Some(helper.data.len()) {
            return Err(D::Error::custom("masked tensor shape does not match data"));
        }
        let well_formed = helper
            .transforms
            .iter()
            .all(|t| t.rows.checked_mul(t.cols) == Some(t.data.len()));
        let chained = helper
            .transforms
            .windows(2)
            .all(|pair| pair[0].cols == pair[1].rows);
        let last_matches = helper
            .transforms
            .last()
            .is_none_or(|last| helper.shape.len() == 2 && helper.shape[1] == last.cols);
        let source_fits = helper.transforms.first().is_none_or(|first| {
            helper
                .shape
                .first()
                .is_some_and(|&rows| rows.checked_mul(first.rows).is_some())
        });
        if !well_formed || !chained || !last_matches || !source_fits {
            return Err(D::Error::custom("masked tensor transforms are inconsistent"));
        }
        let bound = helper
            .transforms
            .iter()
            .try_fold(MAX_CODE as u64, |bound, weights| next_bound(bound, weights));
        if bound != Some(helper.bound) {
            return Err(D::Error::custom("masked tensor bound does not match its transforms"));
        }
        Ok(Self {
            version: helper.version,
            shape: helper.shape,
            scale: helper.scale,
            nonce: helper.nonce,
            key_check: helper.key_check,
            data: helper.data,
            transforms: helper.transforms,
            bound: helper.bound,
        })
    }
}

/// Masks `encoded` under `key` with a fresh random nonce.
pub fn mask<R: CryptoRng + RngCore + ?Sized>(
    encoded: &EncodedTensor,
    key: &MaskKey,
    rng: &mut R,
) -> Result<MaskedTensor> {
    let mut nonce = [0u8; MASK_NONCE_BYTES];
    fill_entropy(rng, &mut nonce)?;
    let mut stream = key.stream(&nonce);
    let data = encoded
        .codes()
        .iter()
        .map(|&code| (code as u64).wrapping_add(stream.next_u64()))
        .collect();
    debug!("mask shape={:?} scale={}", encoded.shape(), encoded.scale());
    Ok(MaskedTensor {
        version: MASKED_TENSOR_VERSION,
        shape: encoded.shape().to_vec(),
        scale: encoded.scale(),
        nonce,
        key_check: key.key_check(&nonce),
        data,
        transforms: Vec::new(),
        bound: MAX_CODE as u64,
    })
}

/// Removes the mask. Fails with `InvalidCiphertext` for a different key and
/// with `QuantizationOverflow` when a linear result left the code range.
/// The recorded bound keeps every true result below `2^63`, so reading the
/// unmasked word as `i64` is exact.
pub fn unmask(masked: &MaskedTensor, key: &MaskKey) -> Result<EncodedTensor> {
    if masked.version != MASKED_TENSOR_VERSION {
        return Err(PrivNetError::VersionMismatch {
            context: "MaskedTensor",
            expected: MASKED_TENSOR_VERSION,
            found: masked.version,
        });
    }
    if key.key_check(&masked.nonce) != masked.key_check {
        return Err(PrivNetError::InvalidCiphertext {
            reason: "tensor was masked under a different key",
        });
    }
    let mut stream = key.stream(&masked.nonce);
    let mut offsets: Vec<u64> = (0..masked.masked_len()).map(|_| stream.next_u64()).collect();
    let rows = masked.shape.first().copied().unwrap_or(0);
    for weights in &masked.transforms {
        offsets = wrapping_matmul(&offsets, rows, weights);
    }
    let codes = masked
        .data
        .iter()
        .zip(&offsets)
        .map(|(&word, &offset)| word.wrapping_sub(offset) as i64)
        .collect::<Vec<_>>();
    if let Some(&code) = codes.iter().find(|code| code.unsigned_abs() > MAX_CODE as u64) {
        return Err(PrivNetError::QuantizationOverflow {
            value: code as f64 / masked.scale,
            scale: masked.scale,
        });
    }
    EncodedTensor::from_codes(masked.shape.clone(), masked.scale, codes)
}

/// `linear_only` on masked data. Only integral weights commute exactly with
/// the `Z_2^64` mask; the weights are recorded for [`unmask`].
///
/// Fails with `QuantizationOverflow` when the worst-case result could wrap
/// around `Z_2^64`, even if the actual codes are small.
pub fn linear_only_masked(masked: &MaskedTensor, plain: &Tensor) -> Result<MaskedTensor> {
    let (m, _, n) = matmul_dims(&masked.shape, plain.shape())?;
    let weights = IntegerMatrix::from_tensor(plain)?;
    let bound = next_bound(masked.bound, &weights).ok_or_else(|| {
        PrivNetError::QuantizationOverflow {
            value: masked.bound as f64 * weights.growth() as f64 / masked.scale,
            scale: masked.scale,
        }
    })?;
    let data = wrapping_matmul(&masked.data, m, &weights);
    let mut transforms = masked.transforms.clone();
    transforms.push(weights);
    debug!(
        "linear_only_masked lhs={:?} rhs={:?} depth={}",
        masked.shape,
        plain.shape(),
        transforms.len()
    );
    Ok(MaskedTensor {
        version: masked.version,
        shape: vec![m, n],
        scale: masked.scale,
        nonce: masked.nonce,
        key_check: masked.key_check,
        data,
        transforms,
        bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, linear_only};
    use crate::rng::{derive_session_rng, secure_rng};
    use proptest::prelude::*;

    fn key(label: u8) -> MaskKey {
        MaskKey::from_shared_secret(&SharedSecret::from_bytes([label; 32]))
    }

    fn sample() -> Tensor {
        Tensor::from_rows(vec![vec![1.0, -0.5, 3.25], vec![0.25, 2.0, -7.75]]).unwrap()
    }

    #[test]
    fn mask_roundtrip() {
        let encoded = encode(&sample(), 256.0).unwrap();
        let masked = mask(&encoded, &key(1), &mut secure_rng()).unwrap();
        assert_eq!(masked.shape(), encoded.shape());
        assert_eq!(unmask(&masked, &key(1)).unwrap(), encoded);
    }

    #[test]
    fn masked_words_hide_codes() {
        let encoded = encode(&sample(), 256.0).unwrap();
        let masked = mask(&encoded, &key(1), &mut secure_rng()).unwrap();
        let plain_words: Vec<u64> = encoded.codes().iter().map(|&c| c as u64).collect();
        assert_ne!(masked.words(), plain_words.as_slice());
    }

    #[test]
    fn fresh_nonce_per_mask() {
        let encoded = encode(&sample(), 256.0).unwrap();
        let mut rng = secure_rng();
        let first = mask(&encoded, &key(1), &mut rng).unwrap();
        let second = mask(&encoded, &key(1), &mut rng).unwrap();
        assert_ne!(first.words(), second.words());
    }

    #[test]
    fn wrong_key_rejected() {
        let encoded = encode(&sample(), 256.0).unwrap();
        let masked = mask(&encoded, &key(1), &mut secure_rng()).unwrap();
        assert!(matches!(
            unmask(&masked, &key(2)),
            Err(PrivNetError::InvalidCiphertext { .. })
        ));
    }

    #[test]
    fn masked_linear_matches_plain_linear() {
        let encoded = encode(&sample(), 256.0).unwrap();
        let w1 = Tensor::from_rows(vec![vec![1.0, -2.0], vec![0.0, 3.0], vec![4.0, 1.0]]).unwrap();
        let w2 = Tensor::from_rows(vec![vec![2.0], vec![-1.0]]).unwrap();
        let mut rng = derive_session_rng(b"mask-linear", 0, b"test");
        let masked = mask(&encoded, &key(7), &mut rng).unwrap();
        let masked = linear_only_masked(&masked, &w1).unwrap();
        let masked = linear_only_masked(&masked, &w2).unwrap();
        assert_eq!(masked.shape(), &[2, 1]);
        assert_eq!(masked.transforms().len(), 2);
        let expected = linear_only(&linear_only(&encoded, &w1).unwrap(), &w2).unwrap();
        let recovered = unmask(&masked, &key(7)).unwrap();
        assert_eq!(recovered, expected);
        let plain = sample().matmul(&w1).unwrap().matmul(&w2).unwrap();
        assert_eq!(decode(&recovered), plain);
    }

    #[test]
    fn masked_linear_requires_integral_weights() {
        let encoded = encode(&sample(), 256.0).unwrap();
        let masked = mask(&encoded, &key(1), &mut secure_rng()).unwrap();
        let w = Tensor::from_rows(vec![vec![0.5], vec![1.0], vec![1.0]]).unwrap();
        assert!(matches!(
            linear_only_masked(&masked, &w),
            Err(PrivNetError::NonIntegralWeights(_))
        ));
        let wrong = Tensor::from_rows(vec![vec![1.0], vec![1.0]]).unwrap();
        assert!(matches!(
            linear_only_masked(&masked, &wrong),
            Err(PrivNetError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn masked_linear_overflow_surfaces_on_unmask() {
        let x = Tensor::from_rows(vec![vec![1.0e6, 1.0e6]]).unwrap();
        let encoded = encode(&x, 1000.0).unwrap();
        let masked = mask(&encoded, &key(3), &mut secure_rng()).unwrap();
        let w = Tensor::from_rows(vec![vec![2.0], vec![2.0]]).unwrap();
        let result = linear_only_masked(&masked, &w).unwrap();
        assert!(matches!(
            unmask(&result, &key(3)),
            Err(PrivNetError::QuantizationOverflow { .. })
        ));
    }

    #[test]
    fn wrapped_overflow_is_never_returned() {
        // The exact product is 2^64 + 1, which wraps to the small code 1.
        let mut row = vec![f64::from(1u32 << 30); 16];
        row.push(1.0);
        let x = Tensor::new(vec![1, 17], row.clone()).unwrap();
        let w = Tensor::new(vec![17, 1], row).unwrap();
        let encoded = encode(&x, 1.0).unwrap();
        assert!(matches!(
            linear_only(&encoded, &w),
            Err(PrivNetError::QuantizationOverflow { .. })
        ));
        let masked = mask(&encoded, &key(5), &mut secure_rng()).unwrap();
        assert!(matches!(
            linear_only_masked(&masked, &w),
            Err(PrivNetError::QuantizationOverflow { .. })
        ));
    }

    #[test]
    fn bound_grows_with_column_norm() {
        let encoded = encode(&sample(), 16.0).unwrap();
        let masked = mask(&encoded, &key(6), &mut secure_rng()).unwrap();
        assert_eq!(masked.bound(), MAX_CODE as u64);
        let w = Tensor::from_rows(vec![vec![1.0, -3.0], vec![2.0, 0.0], vec![0.0, 4.0]]).unwrap();
        let once = linear_only_masked(&masked, &w).unwrap();
        assert_eq!(once.bound(), 7 * MAX_CODE as u64);
        let square =
            Tensor::from_rows(vec![vec![f64::from(1u32 << 29), 0.0], vec![0.0, 1.0]]).unwrap();
        let twice = linear_only_masked(&once, &square).unwrap();
        assert_eq!(twice.bound(), 7 * (MAX_CODE as u64) << 29);
        assert!(matches!(
            linear_only_masked(&twice, &square),
            Err(PrivNetError::QuantizationOverflow { .. })
        ));
    }

    #[test]
    fn tampered_bound_is_rejected() {
        let encoded = encode(&sample(), 64.0).unwrap();
        let masked = mask(&encoded, &key(4), &mut secure_rng()).unwrap();
        let w = Tensor::from_rows(vec![vec![1.0], vec![2.0], vec![1.0]]).unwrap();
        let masked = linear_only_masked(&masked, &w).unwrap();
        let mut value = serde_json::to_value(&masked).unwrap();
        value["bound"] = serde_json::json!(MAX_CODE);
        assert!(serde_json::from_value::<MaskedTensor>(value).is_err());
        let mut huge = serde_json::to_value(&masked).unwrap();
        huge["transforms"][0]["rows"] = serde_json::json!(1u64 << 32);
        huge["transforms"][0]["cols"] = serde_json::json!(1u64 << 32);
        assert!(serde_json::from_value::<MaskedTensor>(huge).is_err());
    }

    #[test]
    fn json_roundtrip_preserves_transforms() {
        let encoded = encode(&sample(), 64.0).unwrap();
        let masked = mask(&encoded, &key(4), &mut secure_rng()).unwrap();
        let w = Tensor::from_rows(vec![vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        let masked = linear_only_masked(&masked, &w).unwrap();
        let json = serde_json::to_string(&masked).unwrap();
        let back: MaskedTensor = serde_json::from_str(&json).unwrap();
        assert_eq!(unmask(&back, &key(4)).unwrap(), unmask(&masked, &key(4)).unwrap());
    }

    fn tensor_strategy(
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
    ) -> impl Strategy<Value = Tensor> {
        (rows, cols).prop_flat_map(|(m, k)| {
            prop::collection::vec(-1.0e4f64..1.0e4, m * k)
                .prop_map(move |data| Tensor::new(vec![m, k], data).unwrap())
        })
    }

    proptest! {
        #[test]
        fn unmask_restores_codes(
            x in tensor_strategy(1..5, 1..6),
            scale in prop::sample::select(vec![1.0, 16.0, 256.0, 1.0e5]),
            label in any::<u8>(),
            seed in any::<u64>(),
        ) {
            let encoded = encode(&x, scale).unwrap();
            let mut rng = derive_session_rng(&seed.to_le_bytes(), 0, b"mask-prop");
            let masked = mask(&encoded, &key(label), &mut rng).unwrap();
            prop_assert_eq!(unmask(&masked, &key(label)).unwrap(), encoded);
        }

        #[test]
        fn masked_linear_agrees_with_codes(
            (x, w) in (1usize..4, 1usize..5, 1usize..4).prop_flat_map(|(m, k, n)| (
                prop::collection::vec(-100.0f64..100.0, m * k)
                    .prop_map(move |d| Tensor::new(vec![m, k], d).unwrap()),
                prop::collection::vec(-8i32..8, k * n)
                    .prop_map(move |d| {
                        Tensor::new(vec![k, n], d.into_iter().map(f64::from).collect()).unwrap()
                    }),
            )),
            label in any::<u8>(),
        ) {
            let encoded = encode(&x, 256.0).unwrap();
            let masked = mask(&encoded, &key(label), &mut secure_rng()).unwrap();
            let product = linear_only_masked(&masked, &w).unwrap();
            prop_assert_eq!(
                unmask(&product, &key(label)).unwrap(),
                linear_only(&encoded, &w).unwrap()
            );
        }
    }
}
