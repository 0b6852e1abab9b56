use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrivNetError;
use crate::ring::{MESSAGE_BYTES, RingParams};

pub const KEM_DEGREE: usize = 256;
pub const KEM_MODULUS: i64 = 3329;
pub const KEM_RING: RingParams = RingParams::new(KEM_DEGREE, KEM_MODULUS);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Standard,
    #[default]
    High,
    Paranoid,
}

/// Module-LWE parameter set for one security level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KemParams {
    pub name: &'static str,
    pub ring: RingParams,
    pub rank: usize,
    pub eta1: usize,
    pub eta2: usize,
    pub du: u32,
    pub dv: u32,
}

const PARAMS_STANDARD: KemParams = KemParams {
    name: "mlwe-512",
    ring: KEM_RING,
    rank: 2,
    eta1: 3,
    eta2: 2,
    du: 10,
    dv: 4,
};

const PARAMS_HIGH: KemParams = KemParams {
    name: "mlwe-768",
    ring: KEM_RING,
    rank: 3,
    eta1: 2,
    eta2: 2,
    du: 10,
    dv: 4,
};

const PARAMS_PARANOID: KemParams = KemParams {
    name: "mlwe-1024",
    ring: KEM_RING,
    rank: 4,
    eta1: 2,
    eta2: 2,
    du: 11,
    dv: 5,
};

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 3] = [
        SecurityLevel::Standard,
        SecurityLevel::High,
        SecurityLevel::Paranoid,
    ];

    pub fn params(self) -> KemParams {
        match self {
            SecurityLevel::Standard => PARAMS_STANDARD,
            SecurityLevel::High => PARAMS_HIGH,
            SecurityLevel::Paranoid => PARAMS_PARANOID,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SecurityLevel::Standard => "standard",
            SecurityLevel::High => "high",
            SecurityLevel::Paranoid => "paranoid",
        };
        f.write_str(label)
    }
}

impl FromStr for SecurityLevel {
    type Err = PrivNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(SecurityLevel::Standard),
            "high" => Ok(SecurityLevel::High),
            "paranoid" => Ok(SecurityLevel::Paranoid),
            other => Err(PrivNetError::Config(format!(
                "unknown security level '{other}'"
            ))),
        }
    }
}

impl KemParams {
    fn poly_bytes(&self) -> usize {
        self.ring.packed_len(self.ring.coeff_bits())
    }

    /// Packed `t` vector followed by the 32-byte matrix seed.
    pub fn public_key_bytes(&self) -> usize {
        self.rank * self.poly_bytes() + MESSAGE_BYTES
    }

    /// Packed `s`, the public key, `H(pk)` and the rejection seed `z`.
    pub fn private_key_bytes(&self) -> usize {
        self.rank * self.poly_bytes() + self.public_key_bytes() + 2 * MESSAGE_BYTES
    }

    pub fn ciphertext_bytes(&self) -> usize {
        self.rank * self.ring.packed_len(self.du) + self.ring.packed_len(self.dv)
    }
}
