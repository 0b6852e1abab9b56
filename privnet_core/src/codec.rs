//! Fixed-point tensor codec with one linear operation evaluated on codes.
//!
//! Every real `v` maps to `round_half_even(v * scale)`. Codes are held in
//! `i64` but are limited to the signed 32-bit range ([`MAX_CODE`]), which
//! keeps products with `f64` weights inside the 53-bit mantissa and leaves
//! headroom for the masking layer's `Z_2^64` arithmetic.
//!
//! Decoding is `code / scale`, so for any `|v| < MAX_CODE / scale` the
//! roundtrip error is at most `1 / (2 * scale)`.

use log::debug;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PrivNetError, Result};
use crate::versioning::{ENCODED_TENSOR_VERSION, expect_version};

/// Largest code magnitude the codec will produce.
pub const MAX_CODE: i64 = i32::MAX as i64;

/// Dense row-major tensor of `f64` values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        check_len(&shape, data.len())?;
        Ok(Self { shape, data })
    }

    /// Builds a 2-D tensor from equal-length rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let shape = vec![rows.len(), cols];
        if let Some(ragged) = rows.iter().find(|row| row.len() != cols) {
            return Err(PrivNetError::ShapeMismatch {
                shape: vec![1, cols],
                expected: cols,
                found: ragged.len(),
            });
        }
        let data: Vec<f64> = rows.into_iter().flatten().collect();
        Self::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        match as_matrix(&self.shape) {
            Some((rows, 0)) => vec![Vec::new(); rows],
            Some((_, cols)) => self.data.chunks(cols).map(<[f64]>::to_vec).collect(),
            None => vec![self.data.clone()],
        }
    }

    /// Plain `f64` matrix product, the reference for [`linear_only`].
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let (m, k, n) = matmul_dims(&self.shape, &other.shape)?;
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for t in 0..k {
                let a = self.data[i * k + t];
                for j in 0..n {
                    out[i * n + j] += a * other.data[t * n + j];
                }
            }
        }
        Tensor::new(vec![m, n], out)
    }
}

impl<'de> Deserialize<'de> for Tensor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Helper {
            shape: Vec<usize>,
            data: Vec<f64>,
        }
        let helper = Helper::deserialize(deserializer)?;
        Tensor::new(helper.shape, helper.data).map_err(D::Error::custom)
    }
}

/// Fixed-point codes for a tensor at a given scale.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedTensor {
    version: u16,
    shape: Vec<usize>,
    scale: f64,
    data: Vec<i64>,
}

impl EncodedTensor {
    /// Wraps existing codes, checking shape, scale and the code range.
    pub fn from_codes(shape: Vec<usize>, scale: f64, data: Vec<i64>) -> Result<Self> {
        check_scale(scale)?;
        check_len(&shape, data.len())?;
        if let Some(&code) = data.iter().find(|code| code.unsigned_abs() > MAX_CODE as u64) {
            return Err(PrivNetError::QuantizationOverflow {
                value: code as f64 / scale,
                scale,
            });
        }
        Ok(Self {
            version: ENCODED_TENSOR_VERSION,
            shape,
            scale,
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn codes(&self) -> &[i64] {
        &self.data
    }
}

impl Serialize for EncodedTensor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EncodedTensor", 4)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("shape", &self.shape)?;
        state.serialize_field("scale", &self.scale)?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for EncodedTensor {
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
            data: Vec<i64>,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, ENCODED_TENSOR_VERSION, "EncodedTensor")?;
        EncodedTensor::from_codes(helper.shape, helper.scale, helper.data)
            .map_err(D::Error::custom)
    }
}

pub(crate) fn check_scale(scale: f64) -> Result<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(PrivNetError::InvalidScale(scale))
    }
}

/// Number of elements `shape` describes, or `None` if it overflows `usize`.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// An overflowing shape is reported with `expected == usize::MAX`.
fn check_len(shape: &[usize], found: usize) -> Result<()> {
    let count = element_count(shape);
    if count != Some(found) {
        return Err(PrivNetError::ShapeMismatch {
            shape: shape.to_vec(),
            expected: count.unwrap_or(usize::MAX),
            found,
        });
    }
    Ok(())
}

fn as_matrix(shape: &[usize]) -> Option<(usize, usize)> {
    match *shape {
        [rows, cols] => Some((rows, cols)),
        _ => None,
    }
}

/// `(m, k) x (k, n)` dimensions, or `DimensionMismatch`. An `m x n` result
/// too large to index also counts as a mismatch.
pub(crate) fn matmul_dims(left: &[usize], right: &[usize]) -> Result<(usize, usize, usize)> {
    match (as_matrix(left), as_matrix(right)) {
        (Some((m, k)), Some((k2, n))) if k == k2 && m.checked_mul(n).is_some() => Ok((m, k, n)),
        _ => Err(PrivNetError::DimensionMismatch {
            left: left.to_vec(),
            right: right.to_vec(),
        }),
    }
}

/// Rounds to the nearest code (ties to even) and range-checks it.
fn quantize(scaled: f64, value: f64, scale: f64) -> Result<i64> {
    let code = scaled.round_ties_even();
    if !code.is_finite() || code.abs() > MAX_CODE as f64 {
        return Err(PrivNetError::QuantizationOverflow { value, scale });
    }
    Ok(code as i64)
}

pub fn encode(tensor: &Tensor, scale: f64) -> Result<EncodedTensor> {
    check_scale(scale)?;
    let data = tensor
        .data
        .iter()
        .map(|&v| quantize(v * scale, v, scale))
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "encode shape={:?} scale={} elements={}",
        tensor.shape,
        scale,
        data.len()
    );
    Ok(EncodedTensor {
        version: ENCODED_TENSOR_VERSION,
        shape: tensor.shape.clone(),
        scale,
        data,
    })
}

pub fn decode(encoded: &EncodedTensor) -> Tensor {
    let data = encoded
        .data
        .iter()
        .map(|&code| code as f64 / encoded.scale)
        .collect();
    Tensor {
        shape: encoded.shape.clone(),
        data,
    }
}

/// Multiplies the codes by an unscaled plaintext matrix. The result keeps the
/// input scale; each output element is the correctly rounded sum of `k`
/// products, so the decoded error is at most `(sum_k |w_kj| + 1) / (2 * scale)`.
pub fn linear_only(encoded: &EncodedTensor, plain: &Tensor) -> Result<EncodedTensor> {
    let (m, k, n) = matmul_dims(&encoded.shape, &plain.shape)?;
    let mut data = Vec::with_capacity(m * n);
    for i in 0..m {
        let row = &encoded.data[i * k..(i + 1) * k];
        for j in 0..n {
            let acc: f64 = row
                .iter()
                .enumerate()
                .map(|(t, &code)| code as f64 * plain.data[t * n + j])
                .sum();
            data.push(quantize(acc, acc / encoded.scale, encoded.scale)?);
        }
    }
    debug!(
        "linear_only lhs={:?} rhs={:?} scale={}",
        encoded.shape, plain.shape, encoded.scale
    );
    Ok(EncodedTensor {
        version: ENCODED_TENSOR_VERSION,
        shape: vec![m, n],
        scale: encoded.scale,
        data,
    })
}
