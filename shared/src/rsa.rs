//! Raw (unpadded) RSA over a single block, as used by the login request.
//!
//! The client seals the first `block_len` bytes of its credentials with the
//! server's public key; the server opens them in place with the private
//! exponent. There is no padding scheme: the caller validates that the first
//! decrypted byte is zero.
//!
//! Keys are read from PEM (PKCS#1 or PKCS#8) with the `rsa` crate; only the
//! unpadded block transform is done here.

use num_bigint::BigUint;
use ::rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use ::rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use ::rsa::traits::{PrivateKeyParts, PublicKeyParts};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RsaError {
    #[error("unreadable PEM key: {0}")]
    Pem(String),
    #[error("invalid number in key material: {0}")]
    InvalidNumber(String),
    #[error("modulus must be greater than one")]
    InvalidModulus,
    #[error("block of {actual} bytes does not match key size of {expected} bytes")]
    BlockLength { expected: usize, actual: usize },
    #[error("block value is not smaller than the modulus")]
    OutOfRange,
}

#[derive(Clone)]
struct KeyParts {
    modulus: BigUint,
    exponent: BigUint,
    block_len: usize,
}

impl KeyParts {
    fn new(modulus: BigUint, exponent: BigUint) -> Result<Self, RsaError> {
        if modulus <= BigUint::from(1u8) {
            return Err(RsaError::InvalidModulus);
        }
        let block_len = ((modulus.bits() + 7) / 8) as usize;
        Ok(Self {
            modulus,
            exponent,
            block_len,
        })
    }

    fn apply(&self, block: &mut [u8]) -> Result<(), RsaError> {
        if block.len() != self.block_len {
            return Err(RsaError::BlockLength {
                expected: self.block_len,
                actual: block.len(),
            });
        }

        let value = BigUint::from_bytes_be(block);
        if value >= self.modulus {
            return Err(RsaError::OutOfRange);
        }

        let out = value.modpow(&self.exponent, &self.modulus).to_bytes_be();
        let offset = self.block_len - out.len();
        block[..offset].fill(0);
        block[offset..].copy_from_slice(&out);
        Ok(())
    }
}

fn parse_decimal(s: &str) -> Result<BigUint, RsaError> {
    BigUint::parse_bytes(s.trim().as_bytes(), 10).ok_or_else(|| RsaError::InvalidNumber(s.to_string()))
}

fn convert(n: &::rsa::BigUint) -> BigUint {
    BigUint::from_bytes_be(&n.to_bytes_be())
}

/// Server side of the login block exchange.
#[derive(Clone)]
pub struct RsaPrivateKey(KeyParts);

impl RsaPrivateKey {
    pub fn new(modulus: BigUint, private_exponent: BigUint) -> Result<Self, RsaError> {
        KeyParts::new(modulus, private_exponent).map(Self)
    }

    pub fn from_decimal(modulus: &str, private_exponent: &str) -> Result<Self, RsaError> {
        Self::new(parse_decimal(modulus)?, parse_decimal(private_exponent)?)
    }

    /// Parses a `RSA PRIVATE KEY` (PKCS#1) or `PRIVATE KEY` (PKCS#8) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, RsaError> {
        let key = ::rsa::RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| ::rsa::RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| RsaError::Pem(e.to_string()))?;
        Self::new(convert(key.n()), convert(key.d()))
    }

    /// Size in bytes of one sealed block.
    pub fn block_len(&self) -> usize {
        self.0.block_len
    }

    /// Decrypts `block` in place.
    pub fn decrypt_block(&self, block: &mut [u8]) -> Result<(), RsaError> {
        self.0.apply(block)
    }
}

impl std::fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RsaPrivateKey({} bits)", self.0.modulus.bits())
    }
}

/// Client side of the login block exchange.
#[derive(Debug, Clone)]
pub struct RsaPublicKey(KeyParts);

impl RsaPublicKey {
    pub fn new(modulus: BigUint, public_exponent: BigUint) -> Result<Self, RsaError> {
        KeyParts::new(modulus, public_exponent).map(Self)
    }

    pub fn from_decimal(modulus: &str, public_exponent: &str) -> Result<Self, RsaError> {
        Self::new(parse_decimal(modulus)?, parse_decimal(public_exponent)?)
    }

    /// Parses a `RSA PUBLIC KEY` (PKCS#1) or `PUBLIC KEY` (SPKI) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, RsaError> {
        let key = ::rsa::RsaPublicKey::from_pkcs1_pem(pem)
            .or_else(|_| ::rsa::RsaPublicKey::from_public_key_pem(pem))
            .map_err(|e| RsaError::Pem(e.to_string()))?;
        Self::new(convert(key.n()), convert(key.e()))
    }

    pub fn block_len(&self) -> usize {
        self.0.block_len
    }

    /// Encrypts `block` in place.
    pub fn encrypt_block(&self, block: &mut [u8]) -> Result<(), RsaError> {
        self.0.apply(block)
    }
}

impl std::fmt::Debug for KeyParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bits", self.modulus.bits())
    }
}

/// A fixed 1024-bit key pair for tests. Never use it to serve clients.
#[cfg(any(test, feature = "test-keys"))]
pub mod test_keys {
    use super::{RsaPrivateKey, RsaPublicKey};

    pub const PRIVATE_KEY_PEM: &str = include_str!("../keys/test_private.pem");
    pub const PUBLIC_KEY_PEM: &str = include_str!("../keys/test_public.pem");

    /// Path of [`PRIVATE_KEY_PEM`] on disk, for configs that take a key file.
    pub const PRIVATE_KEY_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/keys/test_private.pem");

    pub fn private_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pem(PRIVATE_KEY_PEM).expect("bundled test key")
    }

    pub fn public_key() -> RsaPublicKey {
        RsaPublicKey::from_pem(PUBLIC_KEY_PEM).expect("bundled test key")
    }
}
