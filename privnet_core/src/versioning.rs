//! Serialization versioning helpers.

use serde::de::Error as DeError;

pub const KEM_CIPHERTEXT_VERSION: u16 = 1;
pub const ENCODED_TENSOR_VERSION: u16 = 1;
pub const MASKED_TENSOR_VERSION: u16 = 1;

pub fn expect_version<E: DeError>(found: u16, expected: u16, label: &'static str) -> Result<(), E> {
    if found != expected {
        return Err(E::custom(format!(
            "{} version mismatch: expected {}, found {}",
            label, expected, found
        )));
    }
    Ok(())
}
