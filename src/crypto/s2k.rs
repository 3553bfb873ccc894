//! Passphrases and string-to-key derivation (RFC 4880 §3.7).

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::hash::Hasher;
use super::{HashAlgorithm, SymmetricAlgorithm};
use crate::error::{PgpkitError, Result};
use crate::packet::cursor::Cursor;

/// S2K specifier type for the GNU "no secret key material" extension
const GNU_EXTENSION: u8 = 101;

/// Default iteration count octet (720896 bytes hashed)
pub const DEFAULT_S2K_COUNT: u8 = 0x96;

/// Passphrase for key protection and symmetric encryption
///
/// An empty passphrase means "no protection" when used to wrap secret keys.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }

    /// The empty passphrase
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Passphrase {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Passphrase {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// Cipher and S2K settings used to protect newly written secret keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionParams {
    pub cipher: SymmetricAlgorithm,
    pub hash: HashAlgorithm,
    /// Encoded iteration count octet
    pub count: u8,
}

impl Default for ProtectionParams {
    fn default() -> Self {
        Self {
            cipher: SymmetricAlgorithm::Aes256,
            hash: HashAlgorithm::Sha256,
            count: DEFAULT_S2K_COUNT,
        }
    }
}

/// String-to-key specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringToKey {
    Simple {
        hash: HashAlgorithm,
    },
    Salted {
        hash: HashAlgorithm,
        salt: [u8; 8],
    },
    Iterated {
        hash: HashAlgorithm,
        salt: [u8; 8],
        count: u8,
    },
    /// Secret key material is absent (exported stub)
    GnuDummy,
}

impl StringToKey {
    /// Creates an iterated and salted specifier with a fresh salt
    pub fn new_iterated<R: CryptoRng + RngCore>(rng: &mut R, hash: HashAlgorithm, count: u8) -> Self {
        let mut salt = [0u8; 8];
        rng.fill_bytes(&mut salt);
        Self::Iterated { hash, salt, count }
    }

    /// Number of octets hashed for an encoded iteration count
    pub fn decoded_count(count: u8) -> usize {
        (16usize + (count as usize & 15)) << ((count as usize >> 4) + 6)
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, Self::GnuDummy)
    }

    /// Derives a `key_size`-byte key from the passphrase
    pub fn derive_key(&self, passphrase: &Passphrase, key_size: usize) -> Result<Zeroizing<Vec<u8>>> {
        let (hash, salt, total) = match self {
            Self::Simple { hash } => (*hash, &[][..], None),
            Self::Salted { hash, salt } => (*hash, &salt[..], None),
            Self::Iterated { hash, salt, count } => {
                (*hash, &salt[..], Some(Self::decoded_count(*count)))
            }
            Self::GnuDummy => return Err(PgpkitError::CouldNotExtractPrivateKey),
        };

        let mut seeded = Zeroizing::new(Vec::with_capacity(salt.len() + passphrase.as_bytes().len()));
        seeded.extend_from_slice(salt);
        seeded.extend_from_slice(passphrase.as_bytes());
        // Iterated S2K hashes at least the whole salt+passphrase once
        let total = total.map(|t| t.max(seeded.len())).unwrap_or(seeded.len());

        let mut key = Zeroizing::new(Vec::with_capacity(key_size));
        let mut preload = 0usize;
        while key.len() < key_size {
            let mut hasher = Hasher::new(hash);
            for _ in 0..preload {
                hasher.update(&[0]);
            }
            let mut remaining = total;
            while remaining > 0 && !seeded.is_empty() {
                let take = remaining.min(seeded.len());
                hasher.update(&seeded[..take]);
                remaining -= take;
            }
            let mut digest = hasher.finalize();
            let take = (key_size - key.len()).min(digest.len());
            key.extend_from_slice(&digest[..take]);
            digest.zeroize();
            preload += 1;
        }
        Ok(key)
    }

    pub fn parse(cursor: &mut Cursor<'_>) -> Result<Self> {
        let kind = cursor.read_u8()?;
        if kind == GNU_EXTENSION {
            let _hash = cursor.read_u8()?;
            let marker = cursor.read_bytes(3)?;
            if marker != b"GNU" {
                return Err(PgpkitError::unsupported("unknown S2K extension"));
            }
            return match cursor.read_u8()? {
                1 => Ok(Self::GnuDummy),
                mode => Err(PgpkitError::unsupported(format!("GNU S2K mode {}", mode))),
            };
        }

        let hash = HashAlgorithm::require(cursor.read_u8()?)?;
        match kind {
            0 => Ok(Self::Simple { hash }),
            1 => Ok(Self::Salted {
                hash,
                salt: cursor.read_array()?,
            }),
            3 => {
                let salt = cursor.read_array()?;
                let count = cursor.read_u8()?;
                Ok(Self::Iterated { hash, salt, count })
            }
            other => Err(PgpkitError::unsupported(format!("S2K type {}", other))),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Simple { hash } => {
                out.push(0);
                out.push(hash.to_byte());
            }
            Self::Salted { hash, salt } => {
                out.push(1);
                out.push(hash.to_byte());
                out.extend_from_slice(salt);
            }
            Self::Iterated { hash, salt, count } => {
                out.push(3);
                out.push(hash.to_byte());
                out.extend_from_slice(salt);
                out.push(*count);
            }
            Self::GnuDummy => {
                out.push(GNU_EXTENSION);
                out.push(HashAlgorithm::Sha1.to_byte());
                out.extend_from_slice(b"GNU");
                out.push(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_decoded_count() {
        assert_eq!(StringToKey::decoded_count(0), 1024);
        assert_eq!(StringToKey::decoded_count(0x60), 65536);
        assert_eq!(StringToKey::decoded_count(DEFAULT_S2K_COUNT), 720896);
        assert_eq!(StringToKey::decoded_count(0xFF), 65011712);
    }

    #[test]
    fn test_simple_s2k_is_plain_hash() {
        let s2k = StringToKey::Simple {
            hash: HashAlgorithm::Sha1,
        };
        let key = s2k.derive_key(&Passphrase::from("abc"), 16).unwrap();
        let expected = crate::crypto::hash::digest(HashAlgorithm::Sha1, b"abc");
        assert_eq!(&key[..], &expected[..16]);
    }

    #[test]
    fn test_key_longer_than_digest_uses_preload() {
        let s2k = StringToKey::Simple {
            hash: HashAlgorithm::Sha1,
        };
        let key = s2k.derive_key(&Passphrase::from("abc"), 32).unwrap();
        let second = crate::crypto::hash::digest(HashAlgorithm::Sha1, b"\0abc");
        assert_eq!(&key[20..], &second[..12]);
    }

    #[test]
    fn test_iterated_depends_on_salt_and_passphrase() {
        let a = StringToKey::new_iterated(&mut OsRng, HashAlgorithm::Sha256, 0x60);
        let b = StringToKey::new_iterated(&mut OsRng, HashAlgorithm::Sha256, 0x60);
        let pass = Passphrase::from("correct horse");
        let ka = a.derive_key(&pass, 32).unwrap();
        assert_eq!(ka, a.derive_key(&pass, 32).unwrap());
        assert_ne!(ka, b.derive_key(&pass, 32).unwrap());
        assert_ne!(ka, a.derive_key(&Passphrase::from("wrong"), 32).unwrap());
    }

    #[test]
    fn test_parse_encode() {
        let s2k = StringToKey::new_iterated(&mut OsRng, HashAlgorithm::Sha256, 0x60);
        for spec in [s2k, StringToKey::GnuDummy] {
            let mut out = Vec::new();
            spec.encode(&mut out);
            let mut cursor = Cursor::new(&out);
            assert_eq!(StringToKey::parse(&mut cursor).unwrap(), spec);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_dummy_cannot_derive() {
        assert!(matches!(
            StringToKey::GnuDummy.derive_key(&Passphrase::empty(), 16),
            Err(PgpkitError::CouldNotExtractPrivateKey)
        ));
    }
}
