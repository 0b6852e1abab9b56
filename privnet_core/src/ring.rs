use rand::Rng;
use rand::distributions::{Distribution, Uniform};

/// Bytes needed to carry a 256-bit message or seed.
pub const MESSAGE_BYTES: usize = 32;

/// Parameters describing the polynomial ring `Z_q[x]/(x^n + 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingParams {
    pub degree: usize,
    pub modulus: i64,
}

impl RingParams {
    pub const fn new(degree: usize, modulus: i64) -> Self {
        Self { degree, modulus }
    }

    pub fn reduce(&self, value: i64) -> i64 {
        let mut v = value % self.modulus;
        if v < 0 {
            v += self.modulus;
        }
        v
    }

    pub fn center(&self, value: i64) -> i64 {
        let mut v = self.reduce(value);
        let half = self.modulus / 2;
        if v > half {
            v -= self.modulus;
        }
        v
    }

    /// Bit width of a fully packed coefficient.
    pub fn coeff_bits(&self) -> u32 {
        64 - (self.modulus - 1).leading_zeros()
    }

    /// Length in bytes of a polynomial packed at `bits` per coefficient.
    pub fn packed_len(&self, bits: u32) -> usize {
        self.degree * bits as usize / 8
    }
}

/// Polynomial in the configured ring. Coefficients are kept in `[0, q)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingElement {
    params: RingParams,
    coeffs: Vec<i64>,
}

impl RingElement {
    pub fn zero(params: RingParams) -> Self {
        Self {
            params,
            coeffs: vec![0; params.degree],
        }
    }

    pub fn from_coeffs(params: RingParams, coeffs: Vec<i64>) -> Self {
        assert_eq!(
            coeffs.len(),
            params.degree,
            "coefficient vector must match degree"
        );
        let coeffs = coeffs.into_iter().map(|c| params.reduce(c)).collect();
        Self { params, coeffs }
    }

    pub fn params(&self) -> RingParams {
        self.params
    }

    pub fn coeffs(&self) -> &[i64] {
        &self.coeffs
    }

    pub fn add(&self, other: &Self) -> Self {
        assert_eq!(self.params, other.params);
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(a, b)| self.params.reduce(a + b))
            .collect();
        Self {
            params: self.params,
            coeffs,
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        assert_eq!(self.params, other.params);
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(a, b)| self.params.reduce(a - b))
            .collect();
        Self {
            params: self.params,
            coeffs,
        }
    }

    /// Negacyclic schoolbook product. Partial sums stay below `n * q^2`,
    /// so reduction is deferred to the end.
    pub fn mul(&self, other: &Self) -> Self {
        assert_eq!(self.params, other.params);
        let n = self.params.degree;
        let mut tmp = vec![0i64; n];
        for (i, &a) in self.coeffs.iter().enumerate() {
            if a == 0 {
                continue;
            }
            for (j, &b) in other.coeffs.iter().enumerate() {
                let idx = i + j;
                if idx >= n {
                    tmp[idx - n] -= a * b;
                } else {
                    tmp[idx] += a * b;
                }
            }
        }
        Self::from_coeffs(self.params, tmp)
    }

    pub fn random_uniform<R: Rng + ?Sized>(params: RingParams, rng: &mut R) -> Self {
        let dist = Uniform::from(0..params.modulus);
        let coeffs = (0..params.degree)
            .map(|_| dist.sample(rng))
            .collect::<Vec<_>>();
        Self::from_coeffs(params, coeffs)
    }

    /// Centered binomial sample with parameter `eta`, consuming
    /// `degree * eta / 4` bytes of `stream`.
    pub fn sample_cbd(params: RingParams, eta: usize, stream: &[u8]) -> Self {
        assert!(
            stream.len() * 8 >= params.degree * 2 * eta,
            "noise stream too short for eta={eta}"
        );
        let bit = |pos: usize| i64::from((stream[pos / 8] >> (pos % 8)) & 1);
        let coeffs = (0..params.degree)
            .map(|i| {
                let base = i * 2 * eta;
                let a: i64 = (0..eta).map(|k| bit(base + k)).sum();
                let b: i64 = (0..eta).map(|k| bit(base + eta + k)).sum();
                a - b
            })
            .collect();
        Self::from_coeffs(params, coeffs)
    }

    /// Lossy rounding of every coefficient to `bits` bits: `round(2^d / q * x) mod 2^d`.
    pub fn compress(&self, bits: u32) -> Vec<u16> {
        let q = self.params.modulus;
        let mask = (1i64 << bits) - 1;
        self.coeffs
            .iter()
            .map(|&x| ((((x << bits) + q / 2) / q) & mask) as u16)
            .collect()
    }

    pub fn decompress(params: RingParams, values: &[u16], bits: u32) -> Self {
        let q = params.modulus;
        let half = 1i64 << (bits - 1);
        let coeffs = values
            .iter()
            .map(|&y| (i64::from(y) * q + half) >> bits)
            .collect();
        Self::from_coeffs(params, coeffs)
    }

    /// Packs the exact coefficients at the modulus bit width.
    pub fn to_bytes(&self) -> Vec<u8> {
        let values: Vec<u16> = self.coeffs.iter().map(|&c| c as u16).collect();
        pack_bits(&values, self.params.coeff_bits())
    }

    /// Inverse of [`RingElement::to_bytes`]. Returns `None` when the slice has
    /// the wrong length or encodes a coefficient outside `[0, q)`.
    pub fn from_bytes(params: RingParams, bytes: &[u8]) -> Option<Self> {
        let bits = params.coeff_bits();
        if bytes.len() != params.packed_len(bits) {
            return None;
        }
        let values = unpack_bits(bytes, bits, params.degree);
        if values.iter().any(|&v| i64::from(v) >= params.modulus) {
            return None;
        }
        let coeffs = values.into_iter().map(i64::from).collect();
        Some(Self { params, coeffs })
    }

    /// One message bit per coefficient, lifted to `round(q / 2)`.
    pub fn from_message(params: RingParams, message: &[u8; MESSAGE_BYTES]) -> Self {
        let lift = (params.modulus + 1) / 2;
        let coeffs = (0..params.degree)
            .map(|i| i64::from((message[i / 8] >> (i % 8)) & 1) * lift)
            .collect();
        Self::from_coeffs(params, coeffs)
    }

    pub fn to_message(&self) -> [u8; MESSAGE_BYTES] {
        let mut message = [0u8; MESSAGE_BYTES];
        for (i, bit) in self.compress(1).into_iter().enumerate().take(MESSAGE_BYTES * 8) {
            message[i / 8] |= (bit as u8) << (i % 8);
        }
        message
    }
}

/// Little-endian bit packing of `bits`-wide values.
pub fn pack_bits(values: &[u16], bits: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * bits as usize / 8);
    let mut acc: u32 = 0;
    let mut filled: u32 = 0;
    for &value in values {
        acc |= u32::from(value) << filled;
        filled += bits;
        while filled >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
    if filled > 0 {
        out.push(acc as u8);
    }
    out
}

pub fn unpack_bits(bytes: &[u8], bits: u32, count: usize) -> Vec<u16> {
    let mask = (1u32 << bits) - 1;
    let mut out = Vec::with_capacity(count);
    let mut acc: u32 = 0;
    let mut filled: u32 = 0;
    let mut input = bytes.iter();
    while out.len() < count {
        while filled < bits {
            let Some(&byte) = input.next() else {
                return out;
            };
            acc |= u32::from(byte) << filled;
            filled += 8;
        }
        out.push((acc & mask) as u16);
        acc >>= bits;
        filled -= bits;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::derive_session_rng;

    const PARAMS: RingParams = RingParams::new(256, 3329);

    #[test]
    fn negacyclic_wraparound() {
        let mut x = vec![0i64; PARAMS.degree];
        x[PARAMS.degree - 1] = 1;
        let x = RingElement::from_coeffs(PARAMS, x);
        let mut one = vec![0i64; PARAMS.degree];
        one[1] = 1;
        let product = x.mul(&RingElement::from_coeffs(PARAMS, one));
        assert_eq!(product.coeffs()[0], PARAMS.modulus - 1);
        assert!(product.coeffs()[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn packing_is_lossless() {
        let mut rng = derive_session_rng(b"ring-pack", 0, b"test");
        let poly = RingElement::random_uniform(PARAMS, &mut rng);
        let bytes = poly.to_bytes();
        assert_eq!(bytes.len(), 384);
        assert_eq!(RingElement::from_bytes(PARAMS, &bytes), Some(poly));
    }

    #[test]
    fn from_bytes_rejects_out_of_range() {
        let bytes = vec![0xFF; 384];
        assert!(RingElement::from_bytes(PARAMS, &bytes).is_none());
        assert!(RingElement::from_bytes(PARAMS, &bytes[..383]).is_none());
    }

    #[test]
    fn compression_error_is_bounded() {
        let mut rng = derive_session_rng(b"ring-compress", 0, b"test");
        let poly = RingElement::random_uniform(PARAMS, &mut rng);
        for bits in [4u32, 10, 11] {
            let back = RingElement::decompress(PARAMS, &poly.compress(bits), bits);
            let bound = (PARAMS.modulus >> (bits + 1)) + 1;
            for (a, b) in poly.coeffs().iter().zip(back.coeffs()) {
                assert!(PARAMS.center(a - b).abs() <= bound);
            }
        }
    }

    #[test]
    fn message_roundtrip_survives_small_noise() {
        let message: [u8; MESSAGE_BYTES] = core::array::from_fn(|i| (i as u8).wrapping_mul(37));
        let encoded = RingElement::from_message(PARAMS, &message);
        let noise = RingElement::sample_cbd(PARAMS, 2, &[0xA5; 128]);
        assert_eq!(encoded.add(&noise).to_message(), message);
    }

    #[test]
    fn cbd_stays_in_range() {
        let poly = RingElement::sample_cbd(PARAMS, 3, &[0x3C; 192]);
        assert!(poly.coeffs().iter().all(|&c| PARAMS.center(c).abs() <= 3));
    }
}
