//! IND-CPA Module-LWE encryption underneath the KEM.
//!
//! Keys are vectors of `rank` polynomials in `Z_3329[x]/(x^256 + 1)`. The
//! public matrix `A` is never stored; it is re-expanded from the 32-byte seed
//! `rho` on every use.

use blake3::Hasher;

use crate::preset::KemParams;
use crate::ring::{MESSAGE_BYTES, RingElement, pack_bits, unpack_bits};
use crate::rng::{derive_session_rng, fill_session_bytes};

const MATRIX_LABEL: &[u8] = b"privnet::matrix";
const NOISE_LABEL: &[u8] = b"privnet::noise";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CpaPublicKey {
    pub t: Vec<RingElement>,
    pub rho: [u8; MESSAGE_BYTES],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CpaSecretKey {
    pub s: Vec<RingElement>,
}

impl CpaPublicKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.t.iter().flat_map(RingElement::to_bytes).collect();
        out.extend_from_slice(&self.rho);
        out
    }

    /// Caller guarantees `bytes.len() == params.public_key_bytes()`.
    pub fn from_bytes(params: &KemParams, bytes: &[u8]) -> Option<Self> {
        let (t_bytes, rho_bytes) = bytes.split_at(bytes.len() - MESSAGE_BYTES);
        let t = decode_vector(params, t_bytes)?;
        let mut rho = [0u8; MESSAGE_BYTES];
        rho.copy_from_slice(rho_bytes);
        Some(Self { t, rho })
    }
}

impl CpaSecretKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.s.iter().flat_map(RingElement::to_bytes).collect()
    }

    pub fn from_bytes(params: &KemParams, bytes: &[u8]) -> Option<Self> {
        decode_vector(params, bytes).map(|s| Self { s })
    }
}

fn decode_vector(params: &KemParams, bytes: &[u8]) -> Option<Vec<RingElement>> {
    let poly_len = params.ring.packed_len(params.ring.coeff_bits());
    if bytes.len() != params.rank * poly_len {
        return None;
    }
    bytes
        .chunks(poly_len)
        .map(|chunk| RingElement::from_bytes(params.ring, chunk))
        .collect()
}

/// `G`: splits one 64-byte BLAKE3 output into two 32-byte seeds.
pub(crate) fn hash_g(parts: &[&[u8]]) -> ([u8; 32], [u8; 32]) {
    let mut hasher = Hasher::new();
    hasher.update(b"privnet::G");
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&wide[..32]);
    second.copy_from_slice(&wide[32..]);
    (first, second)
}

pub(crate) fn hash_h(data: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(b"privnet::H");
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// `J`: implicit-rejection key from the private seed `z` and the ciphertext.
pub(crate) fn hash_j(z: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(b"privnet::J");
    hasher.update(z);
    hasher.update(ciphertext);
    *hasher.finalize().as_bytes()
}

fn expand_matrix(params: &KemParams, rho: &[u8; MESSAGE_BYTES]) -> Vec<Vec<RingElement>> {
    (0..params.rank)
        .map(|i| {
            (0..params.rank)
                .map(|j| {
                    let index = (i * params.rank + j) as u64;
                    let mut rng = derive_session_rng(rho, index, MATRIX_LABEL);
                    RingElement::random_uniform(params.ring, &mut rng)
                })
                .collect()
        })
        .collect()
}

fn sample_noise(params: &KemParams, seed: &[u8], eta: usize, nonce: u64) -> RingElement {
    let mut stream = vec![0u8; params.ring.degree * eta / 4];
    fill_session_bytes(seed, nonce, NOISE_LABEL, &mut stream);
    RingElement::sample_cbd(params.ring, eta, &stream)
}

fn sample_noise_vec(
    params: &KemParams,
    seed: &[u8],
    eta: usize,
    first_nonce: u64,
) -> Vec<RingElement> {
    (0..params.rank as u64)
        .map(|offset| sample_noise(params, seed, eta, first_nonce + offset))
        .collect()
}

fn inner_product(left: &[RingElement], right: &[RingElement]) -> RingElement {
    let zero = RingElement::zero(left[0].params());
    left.iter()
        .zip(right)
        .fold(zero, |acc, (a, b)| acc.add(&a.mul(b)))
}

/// Deterministic key generation from the 32-byte seed `d`.
pub(crate) fn cpa_keygen(
    params: &KemParams,
    d: &[u8; MESSAGE_BYTES],
) -> (CpaPublicKey, CpaSecretKey) {
    let (rho, sigma) = hash_g(&[d.as_slice(), &[params.rank as u8]]);
    let a = expand_matrix(params, &rho);
    let s = sample_noise_vec(params, &sigma, params.eta1, 0);
    let e = sample_noise_vec(params, &sigma, params.eta1, params.rank as u64);
    let t = a
        .iter()
        .zip(&e)
        .map(|(row, e_i)| inner_product(row, &s).add(e_i))
        .collect();
    (CpaPublicKey { t, rho }, CpaSecretKey { s })
}

/// Encrypts a 32-byte message under explicit coins; the output is the
/// compressed `(u, v)` pair packed at `du` / `dv` bits.
pub(crate) fn cpa_encrypt(
    params: &KemParams,
    pk: &CpaPublicKey,
    message: &[u8; MESSAGE_BYTES],
    coins: &[u8; MESSAGE_BYTES],
) -> Vec<u8> {
    let a = expand_matrix(params, &pk.rho);
    let rank = params.rank as u64;
    let r = sample_noise_vec(params, coins, params.eta1, 0);
    let e1 = sample_noise_vec(params, coins, params.eta2, rank);
    let e2 = sample_noise(params, coins, params.eta2, 2 * rank);

    let mut out = Vec::with_capacity(params.ciphertext_bytes());
    for (i, e1_i) in e1.iter().enumerate() {
        let column: Vec<RingElement> = a.iter().map(|row| row[i].clone()).collect();
        let u_i = inner_product(&column, &r).add(e1_i);
        out.extend(pack_bits(&u_i.compress(params.du), params.du));
    }
    let v = inner_product(&pk.t, &r)
        .add(&e2)
        .add(&RingElement::from_message(params.ring, message));
    out.extend(pack_bits(&v.compress(params.dv), params.dv));
    out
}

/// Caller guarantees `ciphertext.len() == params.ciphertext_bytes()`.
pub(crate) fn cpa_decrypt(
    params: &KemParams,
    sk: &CpaSecretKey,
    ciphertext: &[u8],
) -> [u8; MESSAGE_BYTES] {
    let degree = params.ring.degree;
    let u_len = params.ring.packed_len(params.du);
    let (u_bytes, v_bytes) = ciphertext.split_at(params.rank * u_len);
    let u: Vec<RingElement> = u_bytes
        .chunks(u_len)
        .map(|chunk| {
            let values = unpack_bits(chunk, params.du, degree);
            RingElement::decompress(params.ring, &values, params.du)
        })
        .collect();
    let v = RingElement::decompress(
        params.ring,
        &unpack_bits(v_bytes, params.dv, degree),
        params.dv,
    );
    v.sub(&inner_product(&sk.s, &u)).to_message()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::SecurityLevel;

    #[test]
    fn cpa_roundtrip_each_level() {
        for level in SecurityLevel::ALL {
            let params = level.params();
            let (pk, sk) = cpa_keygen(&params, &[7u8; 32]);
            let message: [u8; 32] = core::array::from_fn(|i| i as u8 ^ 0x5A);
            let ct = cpa_encrypt(&params, &pk, &message, &[9u8; 32]);
            assert_eq!(ct.len(), params.ciphertext_bytes());
            assert_eq!(cpa_decrypt(&params, &sk, &ct), message);
        }
    }

    #[test]
    fn key_bytes_roundtrip() {
        let params = SecurityLevel::Standard.params();
        let (pk, sk) = cpa_keygen(&params, &[1u8; 32]);
        let pk_bytes = pk.to_bytes();
        assert_eq!(pk_bytes.len(), params.public_key_bytes());
        assert_eq!(CpaPublicKey::from_bytes(&params, &pk_bytes), Some(pk));
        assert_eq!(CpaSecretKey::from_bytes(&params, &sk.to_bytes()), Some(sk));
    }

    #[test]
    fn hash_roles_are_domain_separated() {
        let (g1, _) = hash_g(&[b"x".as_slice()]);
        assert_ne!(g1, hash_h(b"x"));
        assert_ne!(hash_h(b"x"), hash_j(b"", b"x"));
    }
}
