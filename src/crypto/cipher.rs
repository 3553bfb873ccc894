//! Block ciphers in OpenPGP CFB mode.
//!
//! The integrity-protected data packet, session-key packets and secret-key
//! protection all use plain CFB with a full-block shift and no resync, which is
//! exactly what `cfb-mode`'s buffered encryptor/decryptor implement. The legacy
//! resync variant of the symmetrically encrypted data packet is built by the
//! caller from two decryptors.

use aes::{Aes128, Aes192, Aes256};
use blowfish::Blowfish;
use cast5::Cast5;
use cfb_mode::{BufDecryptor, BufEncryptor};
use cipher::KeyIvInit;
use des::TdesEde3;
use twofish::Twofish;

use super::SymmetricAlgorithm;
use crate::error::{PgpkitError, Result};

macro_rules! cfb_variants {
    ($name:ident, $mode:ident, $method:ident) => {
        pub enum $name {
            TripleDes($mode<TdesEde3>),
            Cast5($mode<Cast5>),
            Blowfish($mode<Blowfish>),
            Aes128($mode<Aes128>),
            Aes192($mode<Aes192>),
            Aes256($mode<Aes256>),
            Twofish($mode<Twofish>),
        }

        impl $name {
            /// Creates a CFB state; `iv` must be one block long.
            pub fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
                if key.len() != algorithm.key_size() {
                    return Err(PgpkitError::crypto(format!(
                        "{} needs a {}-byte key, got {}",
                        algorithm,
                        algorithm.key_size(),
                        key.len()
                    )));
                }
                let bad = |_| PgpkitError::crypto(format!("invalid key or IV for {}", algorithm));
                Ok(match algorithm {
                    SymmetricAlgorithm::TripleDes => {
                        Self::TripleDes($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                    SymmetricAlgorithm::Cast5 => {
                        Self::Cast5($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                    SymmetricAlgorithm::Blowfish => {
                        Self::Blowfish($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                    SymmetricAlgorithm::Aes128 => {
                        Self::Aes128($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                    SymmetricAlgorithm::Aes192 => {
                        Self::Aes192($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                    SymmetricAlgorithm::Aes256 => {
                        Self::Aes256($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                    SymmetricAlgorithm::Twofish => {
                        Self::Twofish($mode::new_from_slices(key, iv).map_err(bad)?)
                    }
                })
            }

            /// Creates a CFB state with an all-zero IV
            pub fn with_zero_iv(algorithm: SymmetricAlgorithm, key: &[u8]) -> Result<Self> {
                Self::new(algorithm, key, &vec![0u8; algorithm.block_size()])
            }

            /// Processes `data` in place, continuing the key stream across calls
            pub fn $method(&mut self, data: &mut [u8]) {
                match self {
                    Self::TripleDes(c) => c.$method(data),
                    Self::Cast5(c) => c.$method(data),
                    Self::Blowfish(c) => c.$method(data),
                    Self::Aes128(c) => c.$method(data),
                    Self::Aes192(c) => c.$method(data),
                    Self::Aes256(c) => c.$method(data),
                    Self::Twofish(c) => c.$method(data),
                }
            }
        }
    };
}

cfb_variants!(CfbEncryptor, BufEncryptor, encrypt);
cfb_variants!(CfbDecryptor, BufDecryptor, decrypt);
