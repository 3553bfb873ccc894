//! Cryptographic primitives used by the OpenPGP engine.
//!
//! This module wraps external primitive crates behind the algorithm
//! identifiers of RFC 4880:
//!
//! - **Public key**: RSA (`rsa`), DSA (`dsa`), ElGamal (modular arithmetic on
//!   `num-bigint-dig`)
//! - **Symmetric**: AES, CAST5, TripleDES, Blowfish, Twofish in OpenPGP CFB mode
//! - **Hashes**: SHA-1, RIPEMD-160, SHA-2 family
//! - **String-to-key**: simple, salted and iterated+salted S2K

use num_bigint_dig::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::{PgpkitError, Result};
use crate::validation::Validator;

pub mod cipher;
pub mod elgamal;
pub mod hash;
pub mod public_key;
pub mod s2k;

pub use cipher::{CfbDecryptor, CfbEncryptor};
pub use hash::Hasher;
pub use public_key::{PublicParams, SecretParams};
pub use s2k::{Passphrase, ProtectionParams, StringToKey};

/// Public-key algorithm identifiers (RFC 4880 §9.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicKeyAlgorithm {
    /// RSA (Encrypt or Sign)
    Rsa = 1,
    /// RSA Encrypt-Only
    RsaEncryptOnly = 2,
    /// RSA Sign-Only
    RsaSignOnly = 3,
    /// Elgamal (Encrypt-Only)
    ElGamal = 16,
    /// DSA (Digital Signature Algorithm)
    Dsa = 17,
    /// Elgamal (Encrypt or Sign), deprecated but still found in old rings
    ElGamalEncryptSign = 20,
}

impl PublicKeyAlgorithm {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Rsa),
            2 => Some(Self::RsaEncryptOnly),
            3 => Some(Self::RsaSignOnly),
            16 => Some(Self::ElGamal),
            17 => Some(Self::Dsa),
            20 => Some(Self::ElGamalEncryptSign),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rsa | Self::RsaEncryptOnly | Self::RsaSignOnly => "RSA",
            Self::ElGamal | Self::ElGamalEncryptSign => "ElGamal",
            Self::Dsa => "DSA",
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::Rsa | Self::RsaEncryptOnly | Self::RsaSignOnly)
    }

    pub fn is_elgamal(&self) -> bool {
        matches!(self, Self::ElGamal | Self::ElGamalEncryptSign)
    }

    /// True if the algorithm can produce signatures
    pub fn can_sign(&self) -> bool {
        matches!(self, Self::Rsa | Self::RsaSignOnly | Self::Dsa)
    }

    /// True if the algorithm can encrypt session keys
    pub fn can_encrypt(&self) -> bool {
        matches!(
            self,
            Self::Rsa | Self::RsaEncryptOnly | Self::ElGamal | Self::ElGamalEncryptSign
        )
    }

    /// Usage implied by the algorithm alone, for keys without a key-flags subpacket
    pub fn implied_usage(&self) -> KeyUsage {
        KeyUsage {
            certify: self.can_sign(),
            sign: self.can_sign(),
            encrypt: self.can_encrypt(),
            authenticate: false,
        }
    }
}

impl fmt::Display for PublicKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Symmetric-key algorithm identifiers (RFC 4880 §9.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymmetricAlgorithm {
    TripleDes = 2,
    Cast5 = 3,
    Blowfish = 4,
    Aes128 = 7,
    Aes192 = 8,
    Aes256 = 9,
    Twofish = 10,
}

impl SymmetricAlgorithm {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            2 => Some(Self::TripleDes),
            3 => Some(Self::Cast5),
            4 => Some(Self::Blowfish),
            7 => Some(Self::Aes128),
            8 => Some(Self::Aes192),
            9 => Some(Self::Aes256),
            10 => Some(Self::Twofish),
            _ => None,
        }
    }

    /// Parses an identifier that must name a supported cipher
    pub fn require(byte: u8) -> Result<Self> {
        Self::from_byte(byte).ok_or_else(|| {
            PgpkitError::unsupported(format!("symmetric algorithm {}", byte))
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Key size in bytes
    pub fn key_size(&self) -> usize {
        match self {
            Self::TripleDes => 24,
            Self::Cast5 | Self::Blowfish | Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 | Self::Twofish => 32,
        }
    }

    /// Block size in bytes
    pub fn block_size(&self) -> usize {
        match self {
            Self::TripleDes | Self::Cast5 | Self::Blowfish => 8,
            Self::Aes128 | Self::Aes192 | Self::Aes256 | Self::Twofish => 16,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TripleDes => "3DES",
            Self::Cast5 => "CAST5",
            Self::Blowfish => "Blowfish",
            Self::Aes128 => "AES-128",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
            Self::Twofish => "Twofish",
        }
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Hash algorithm identifiers (RFC 4880 §9.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// Accepted when verifying legacy signatures, never used to sign
    Md5 = 1,
    Sha1 = 2,
    Ripemd160 = 3,
    Sha256 = 8,
    Sha384 = 9,
    Sha512 = 10,
    Sha224 = 11,
}

impl HashAlgorithm {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Md5),
            2 => Some(Self::Sha1),
            3 => Some(Self::Ripemd160),
            8 => Some(Self::Sha256),
            9 => Some(Self::Sha384),
            10 => Some(Self::Sha512),
            11 => Some(Self::Sha224),
            _ => None,
        }
    }

    pub fn require(byte: u8) -> Result<Self> {
        Self::from_byte(byte)
            .ok_or_else(|| PgpkitError::unsupported(format!("hash algorithm {}", byte)))
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Digest length in bytes
    pub fn digest_size(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 | Self::Ripemd160 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Name used in the `Hash:` header of cleartext signatures
    pub fn armor_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Ripemd160 => "RIPEMD160",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
            Self::Sha224 => "SHA224",
        }
    }

    pub fn from_armor_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "SHA1" => Some(Self::Sha1),
            "RIPEMD160" => Some(Self::Ripemd160),
            "SHA256" => Some(Self::Sha256),
            "SHA384" => Some(Self::Sha384),
            "SHA512" => Some(Self::Sha512),
            "SHA224" => Some(Self::Sha224),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.armor_name())
    }
}

/// Compression algorithm identifiers (RFC 4880 §9.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Uncompressed = 0,
    Zip = 1,
    Zlib = 2,
    Bzip2 = 3,
}

impl CompressionAlgorithm {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Uncompressed),
            1 => Some(Self::Zip),
            2 => Some(Self::Zlib),
            3 => Some(Self::Bzip2),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Preferred symmetric algorithms written into every self-signature
pub const PREFERRED_SYMMETRIC: [SymmetricAlgorithm; 5] = [
    SymmetricAlgorithm::Aes256,
    SymmetricAlgorithm::Aes192,
    SymmetricAlgorithm::Aes128,
    SymmetricAlgorithm::Cast5,
    SymmetricAlgorithm::TripleDes,
];

/// Preferred hash algorithms written into every self-signature
pub const PREFERRED_HASH: [HashAlgorithm; 3] = [
    HashAlgorithm::Sha1,
    HashAlgorithm::Sha256,
    HashAlgorithm::Ripemd160,
];

/// Preferred compression algorithms written into every self-signature
pub const PREFERRED_COMPRESSION: [CompressionAlgorithm; 3] = [
    CompressionAlgorithm::Zlib,
    CompressionAlgorithm::Bzip2,
    CompressionAlgorithm::Zip,
];

/// Key usage flags indicating how a key may be used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    /// Key may be used to certify other keys
    pub certify: bool,
    /// Key may be used for digital signatures
    pub sign: bool,
    /// Key may be used for encryption (communications and storage)
    pub encrypt: bool,
    /// Key may be used for authentication
    pub authenticate: bool,
}

impl KeyUsage {
    const CERTIFY_OTHER: u8 = 0x01;
    const SIGN_DATA: u8 = 0x02;
    const ENCRYPT_COMMS: u8 = 0x04;
    const ENCRYPT_STORAGE: u8 = 0x08;
    const AUTHENTICATION: u8 = 0x20;

    /// Creates a new KeyUsage with all permissions disabled
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a new KeyUsage for encryption only
    pub fn encrypt_only() -> Self {
        Self {
            encrypt: true,
            ..Self::default()
        }
    }

    /// Creates a new KeyUsage for signing only
    pub fn sign_only() -> Self {
        Self {
            sign: true,
            ..Self::default()
        }
    }

    /// Certify and sign, the usual master key capabilities
    pub fn certify_sign() -> Self {
        Self {
            certify: true,
            sign: true,
            ..Self::default()
        }
    }

    /// Decodes the first octet of a key-flags subpacket
    pub fn from_flags(flags: u8) -> Self {
        Self {
            certify: flags & Self::CERTIFY_OTHER != 0,
            sign: flags & Self::SIGN_DATA != 0,
            encrypt: flags & (Self::ENCRYPT_COMMS | Self::ENCRYPT_STORAGE) != 0,
            authenticate: flags & Self::AUTHENTICATION != 0,
        }
    }

    /// Encodes as the first octet of a key-flags subpacket
    pub fn to_flags(&self) -> u8 {
        let mut flags = 0;
        if self.certify {
            flags |= Self::CERTIFY_OTHER;
        }
        if self.sign {
            flags |= Self::SIGN_DATA;
        }
        if self.encrypt {
            flags |= Self::ENCRYPT_COMMS | Self::ENCRYPT_STORAGE;
        }
        if self.authenticate {
            flags |= Self::AUTHENTICATION;
        }
        flags
    }

    /// Restricts the usage to what the algorithm can actually do
    pub fn restricted_to(&self, algorithm: PublicKeyAlgorithm) -> Self {
        Self {
            certify: self.certify && algorithm.can_sign(),
            sign: self.sign && algorithm.can_sign(),
            encrypt: self.encrypt && algorithm.can_encrypt(),
            authenticate: self.authenticate && algorithm.can_sign(),
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        if self.certify {
            s.push('C');
        }
        if self.sign {
            s.push('S');
        }
        if self.encrypt {
            s.push('E');
        }
        if self.authenticate {
            s.push('A');
        }
        write!(f, "{}", s)
    }
}

/// Multiprecision integer as encoded in OpenPGP packets
#[derive(Clone, PartialEq, Eq)]
pub struct Mpi(Vec<u8>);

impl Mpi {
    /// Creates an MPI from big-endian bytes, stripping leading zeros
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        Self(bytes[start..].to_vec())
    }

    pub fn from_biguint(value: &BigUint) -> Self {
        Self::from_bytes(&value.to_bytes_be())
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Value left-padded with zeros to `len` bytes
    pub fn to_padded(&self, len: usize) -> Vec<u8> {
        if self.0.len() >= len {
            return self.0.clone();
        }
        let mut out = vec![0u8; len - self.0.len()];
        out.extend_from_slice(&self.0);
        out
    }

    /// Number of significant bits
    pub fn bits(&self) -> usize {
        match self.0.first() {
            None => 0,
            Some(&top) => (self.0.len() - 1) * 8 + (8 - top.leading_zeros() as usize),
        }
    }

    /// Wire encoding: two-octet bit count followed by the magnitude
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bits() as u16).to_be_bytes());
        out.extend_from_slice(&self.0);
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.0.len()
    }

    /// Checks the declared bit count of an MPI before reading its magnitude
    pub fn byte_len_for_bits(bits: u16) -> Result<usize> {
        Validator::validate_mpi_bits(bits as usize)?;
        Ok((bits as usize).div_ceil(8))
    }
}

impl fmt::Debug for Mpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mpi({} bits)", self.bits())
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.0);
    }
}

/// Secure random number generation for cryptographic operations
pub fn secure_random_bytes<R: CryptoRng + RngCore>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Constant-time comparison of key IDs
pub fn key_ids_equal(a: u64, b: u64) -> bool {
    a.to_be_bytes().ct_eq(&b.to_be_bytes()).into()
}

/// Two-octet additive checksum used for session keys and unprotected secrets
pub fn checksum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_round_trip_ids() {
        for id in [1u8, 2, 3, 16, 17, 20] {
            assert_eq!(PublicKeyAlgorithm::from_byte(id).unwrap().to_byte(), id);
        }
        assert!(PublicKeyAlgorithm::from_byte(18).is_none());
        assert!(SymmetricAlgorithm::from_byte(1).is_none()); // IDEA
        assert_eq!(SymmetricAlgorithm::Aes256.key_size(), 32);
        assert_eq!(SymmetricAlgorithm::Cast5.block_size(), 8);
        assert_eq!(HashAlgorithm::from_armor_name("sha256"), Some(HashAlgorithm::Sha256));
    }

    #[test]
    fn test_key_usage_flags() {
        let usage = KeyUsage::from_flags(0x0C);
        assert!(usage.encrypt);
        assert!(!usage.sign);
        assert_eq!(usage.to_flags(), 0x0C);

        let usage = KeyUsage::certify_sign();
        assert_eq!(usage.to_flags(), 0x03);
        assert_eq!(usage.to_string(), "CS");

        let dsa = KeyUsage::encrypt_only().restricted_to(PublicKeyAlgorithm::Dsa);
        assert_eq!(dsa, KeyUsage::none());
    }

    #[test]
    fn test_mpi_encoding() {
        let mpi = Mpi::from_bytes(&[0x00, 0x01, 0xFF]);
        assert_eq!(mpi.bits(), 9);
        let mut out = Vec::new();
        mpi.encode(&mut out);
        assert_eq!(out, vec![0x00, 0x09, 0x01, 0xFF]);
        assert_eq!(mpi.to_padded(4), vec![0, 0, 1, 0xFF]);
        assert_eq!(Mpi::from_bytes(&[]).bits(), 0);
    }

    #[test]
    fn test_checksum16() {
        assert_eq!(checksum16(&[0xFF, 0xFF, 0x02]), 0x0200);
    }
}
