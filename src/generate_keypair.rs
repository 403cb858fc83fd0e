//! Key Material Generation Module
//!
//! Produces the RSA key pair a system enrolls with. The private half never
//! leaves this process except inside the encrypted credential store.
//!
//! # Key Properties
//! - **Algorithm**: RSA
//! - **Default Size**: 2048-bit
//! - **Floor**: configurable, 2048-bit by default; smaller requests are refused

use std::fmt;

use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;

use crate::error::KeyGenError;

pub const RSA_KEY_SIZE_DEFAULT: u32 = 2048;
pub const RSA_KEY_SIZE_MINIMUM: u32 = 2048;
/// Largest modulus the provider is asked to generate (OPENSSL_RSA_MAX_MODULUS_BITS)
pub const RSA_KEY_SIZE_MAXIMUM: u32 = 16384;

/// Freshly generated RSA key pair
///
/// `Debug` output is redacted so the key cannot end up in logs.
pub struct KeyPair {
    private_key: PKey<Private>,
    bits: u32,
}

impl KeyPair {
    pub(crate) fn from_private_key(private_key: PKey<Private>) -> Self {
        let bits = private_key.bits();
        Self { private_key, bits }
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// SubjectPublicKeyInfo DER of the public half
    pub fn public_key_der(&self) -> Result<Vec<u8>, openssl::error::ErrorStack> {
        self.private_key.public_key_to_der()
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a new RSA key pair
///
/// # Arguments
/// * `bit_length` - Modulus size in bits
/// * `minimum_bit_length` - Security floor; smaller requests are rejected
///
/// # Errors
/// - [`KeyGenError::WeakKeySize`] if `bit_length` is below the floor
/// - [`KeyGenError::UnsupportedAlgorithm`] if the provider cannot produce the key
pub fn generate_keypair(bit_length: u32, minimum_bit_length: u32) -> Result<KeyPair, KeyGenError> {
    if bit_length < minimum_bit_length {
        return Err(KeyGenError::WeakKeySize {
            requested: bit_length,
            minimum: minimum_bit_length,
        });
    }
    if bit_length > RSA_KEY_SIZE_MAXIMUM {
        return Err(KeyGenError::UnsupportedAlgorithm(format!(
            "RSA-{} exceeds the provider maximum of {} bits",
            bit_length, RSA_KEY_SIZE_MAXIMUM
        )));
    }

    let rsa = Rsa::generate(bit_length).map_err(|e| {
        KeyGenError::UnsupportedAlgorithm(format!("RSA-{} generation failed: {}", bit_length, e))
    })?;
    let private_key = PKey::from_rsa(rsa)
        .map_err(|e| KeyGenError::UnsupportedAlgorithm(format!("failed to wrap RSA key: {}", e)))?;

    Ok(KeyPair::from_private_key(private_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_requested_size() {
        let keypair = generate_keypair(2048, RSA_KEY_SIZE_MINIMUM).unwrap();
        assert_eq!(keypair.bits(), 2048);
        assert!(keypair.private_key().rsa().unwrap().check_key().unwrap());
    }

    #[test]
    fn test_two_invocations_differ() {
        let a = generate_keypair(2048, RSA_KEY_SIZE_MINIMUM).unwrap();
        let b = generate_keypair(2048, RSA_KEY_SIZE_MINIMUM).unwrap();
        assert_ne!(a.public_key_der().unwrap(), b.public_key_der().unwrap());
    }

    #[test]
    fn test_rejects_below_floor() {
        let err = generate_keypair(1024, RSA_KEY_SIZE_MINIMUM).unwrap_err();
        assert!(matches!(
            err,
            KeyGenError::WeakKeySize {
                requested: 1024,
                minimum: 2048
            }
        ));
    }

    #[test]
    fn test_rejects_oversized_modulus() {
        let err = generate_keypair(32768, RSA_KEY_SIZE_MINIMUM).unwrap_err();
        assert!(matches!(err, KeyGenError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_debug_no_leak() {
        let keypair = generate_keypair(2048, RSA_KEY_SIZE_MINIMUM).unwrap();
        let debug_str = format!("{:?}", keypair);
        assert!(debug_str.contains("redacted"));
        assert!(!debug_str.contains("BEGIN"));
    }
}
