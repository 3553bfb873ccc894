//! Public-key algorithm material and operations.
//!
//! Key material is kept as OpenPGP MPIs and turned into primitive-library keys
//! only for the duration of a single operation.

use dsa::{Components, KeySize, SigningKey, VerifyingKey};
use md5::Md5;
use num_bigint_dig::BigUint;
use rand::{CryptoRng, RngCore};
use ripemd::Ripemd160;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use tracing::debug;
use zeroize::Zeroizing;

use super::{elgamal, HashAlgorithm, Mpi, PublicKeyAlgorithm};
use crate::error::{PgpkitError, Result};
use crate::packet::cursor::Cursor;
use crate::validation::MAX_MPI_BITS;

/// Public portion of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicParams {
    Rsa { n: Mpi, e: Mpi },
    Dsa { p: Mpi, q: Mpi, g: Mpi, y: Mpi },
    ElGamal { p: Mpi, g: Mpi, y: Mpi },
}

/// Secret portion of a key, held only while unlocked
#[derive(Clone)]
pub enum SecretParams {
    /// RSA secret exponent and primes with p < q, u = p^-1 mod q
    Rsa { d: Mpi, p: Mpi, q: Mpi, u: Mpi },
    Dsa { x: Mpi },
    ElGamal { x: Mpi },
}

impl std::fmt::Debug for SecretParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Rsa { .. } => "Rsa",
            Self::Dsa { .. } => "Dsa",
            Self::ElGamal { .. } => "ElGamal",
        };
        write!(f, "SecretParams::{}([REDACTED])", kind)
    }
}

fn verify_err(e: impl std::fmt::Display) -> PgpkitError {
    PgpkitError::crypto(format!("invalid key material: {}", e))
}

impl PublicParams {
    pub fn parse(algorithm: PublicKeyAlgorithm, cursor: &mut Cursor<'_>) -> Result<Self> {
        Ok(match algorithm {
            PublicKeyAlgorithm::Rsa
            | PublicKeyAlgorithm::RsaEncryptOnly
            | PublicKeyAlgorithm::RsaSignOnly => Self::Rsa {
                n: cursor.read_mpi()?,
                e: cursor.read_mpi()?,
            },
            PublicKeyAlgorithm::Dsa => Self::Dsa {
                p: cursor.read_mpi()?,
                q: cursor.read_mpi()?,
                g: cursor.read_mpi()?,
                y: cursor.read_mpi()?,
            },
            PublicKeyAlgorithm::ElGamal | PublicKeyAlgorithm::ElGamalEncryptSign => {
                Self::ElGamal {
                    p: cursor.read_mpi()?,
                    g: cursor.read_mpi()?,
                    y: cursor.read_mpi()?,
                }
            }
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Rsa { n, e } => {
                n.encode(out);
                e.encode(out);
            }
            Self::Dsa { p, q, g, y } => {
                p.encode(out);
                q.encode(out);
                g.encode(out);
                y.encode(out);
            }
            Self::ElGamal { p, g, y } => {
                p.encode(out);
                g.encode(out);
                y.encode(out);
            }
        }
    }

    /// Bit strength: modulus size for RSA, prime size for DSA and ElGamal
    pub fn bit_strength(&self) -> usize {
        match self {
            Self::Rsa { n, .. } => n.bits(),
            Self::Dsa { p, .. } | Self::ElGamal { p, .. } => p.bits(),
        }
    }

    fn rsa_key(&self) -> Result<RsaPublicKey> {
        match self {
            Self::Rsa { n, e } => {
                RsaPublicKey::new_with_max_size(n.to_biguint(), e.to_biguint(), MAX_MPI_BITS)
                    .map_err(verify_err)
            }
            _ => Err(PgpkitError::crypto("not an RSA key")),
        }
    }

    fn dsa_key(&self) -> Result<VerifyingKey> {
        match self {
            Self::Dsa { p, q, g, y } => {
                let components =
                    Components::from_components(p.to_biguint(), q.to_biguint(), g.to_biguint())
                        .map_err(verify_err)?;
                VerifyingKey::from_components(components, y.to_biguint()).map_err(verify_err)
            }
            _ => Err(PgpkitError::crypto("not a DSA key")),
        }
    }

    /// Verifies signature MPIs over `digest`, which was produced with `hash`
    pub fn verify(&self, hash: HashAlgorithm, digest: &[u8], signature: &[Mpi]) -> Result<bool> {
        match self {
            Self::Rsa { n, .. } => {
                let [sig] = signature else {
                    return Ok(false);
                };
                let key = self.rsa_key()?;
                // Signatures stored as MPIs lose leading zero octets
                let padded = sig.to_padded(n.as_bytes().len());
                Ok(key.verify(pkcs1v15_scheme(hash), digest, &padded).is_ok())
            }
            Self::Dsa { q, .. } => {
                let [r, s] = signature else {
                    return Ok(false);
                };
                let key = self.dsa_key()?;
                let sig = match dsa::Signature::from_components(r.to_biguint(), s.to_biguint()) {
                    Ok(sig) => sig,
                    Err(_) => return Ok(false),
                };
                let truncated = truncate_digest(digest, q);
                Ok(key.verify_prehash(truncated, &sig).is_ok())
            }
            Self::ElGamal { .. } => Err(PgpkitError::unsupported("ElGamal signatures")),
        }
    }

    /// Encrypts a session-key payload for this key
    pub fn encrypt_session<R: CryptoRng + RngCore>(&self, rng: &mut R, payload: &[u8]) -> Result<Vec<Mpi>> {
        match self {
            Self::Rsa { .. } => {
                let key = self.rsa_key()?;
                let ciphertext = key
                    .encrypt(rng, Pkcs1v15Encrypt, payload)
                    .map_err(|e| PgpkitError::crypto(format!("RSA encryption failed: {}", e)))?;
                Ok(vec![Mpi::from_bytes(&ciphertext)])
            }
            Self::ElGamal { p, g, y } => {
                let (c1, c2) = elgamal::encrypt(
                    rng,
                    &p.to_biguint(),
                    &g.to_biguint(),
                    &y.to_biguint(),
                    payload,
                )?;
                Ok(vec![Mpi::from_biguint(&c1), Mpi::from_biguint(&c2)])
            }
            Self::Dsa { .. } => Err(PgpkitError::crypto("DSA keys cannot encrypt")),
        }
    }
}

/// PKCS#1 v1.5 signature scheme with the DigestInfo prefix of `hash`
fn pkcs1v15_scheme(hash: HashAlgorithm) -> Pkcs1v15Sign {
    match hash {
        HashAlgorithm::Md5 => Pkcs1v15Sign::new::<Md5>(),
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        HashAlgorithm::Ripemd160 => Pkcs1v15Sign::new::<Ripemd160>(),
        HashAlgorithm::Sha224 => Pkcs1v15Sign::new::<Sha224>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

/// DSA signs the leftmost bits of the digest matching the size of q
fn truncate_digest<'a>(digest: &'a [u8], q: &Mpi) -> &'a [u8] {
    let q_len = q.bits().div_ceil(8);
    &digest[..digest.len().min(q_len)]
}

impl SecretParams {
    pub fn parse(algorithm: PublicKeyAlgorithm, cursor: &mut Cursor<'_>) -> Result<Self> {
        Ok(match algorithm {
            PublicKeyAlgorithm::Rsa
            | PublicKeyAlgorithm::RsaEncryptOnly
            | PublicKeyAlgorithm::RsaSignOnly => Self::Rsa {
                d: cursor.read_mpi()?,
                p: cursor.read_mpi()?,
                q: cursor.read_mpi()?,
                u: cursor.read_mpi()?,
            },
            PublicKeyAlgorithm::Dsa => Self::Dsa {
                x: cursor.read_mpi()?,
            },
            PublicKeyAlgorithm::ElGamal | PublicKeyAlgorithm::ElGamalEncryptSign => {
                Self::ElGamal {
                    x: cursor.read_mpi()?,
                }
            }
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Rsa { d, p, q, u } => {
                d.encode(out);
                p.encode(out);
                q.encode(out);
                u.encode(out);
            }
            Self::Dsa { x } | Self::ElGamal { x } => x.encode(out),
        }
    }

    /// Encoded secret MPIs, zeroized on drop
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::new());
        self.encode(&mut out);
        out
    }

    fn rsa_key(&self, public: &PublicParams) -> Result<RsaPrivateKey> {
        match (self, public) {
            (Self::Rsa { d, p, q, .. }, PublicParams::Rsa { n, e }) => RsaPrivateKey::from_components(
                n.to_biguint(),
                e.to_biguint(),
                d.to_biguint(),
                vec![p.to_biguint(), q.to_biguint()],
            )
            .map_err(|_| PgpkitError::CouldNotExtractPrivateKey),
            _ => Err(PgpkitError::CouldNotExtractPrivateKey),
        }
    }

    fn dsa_key(&self, public: &PublicParams) -> Result<SigningKey> {
        match self {
            Self::Dsa { x } => {
                let verifying = public.dsa_key()?;
                SigningKey::from_components(verifying, x.to_biguint())
                    .map_err(|_| PgpkitError::CouldNotExtractPrivateKey)
            }
            _ => Err(PgpkitError::CouldNotExtractPrivateKey),
        }
    }

    /// Signs `digest` and returns the signature MPIs
    pub fn sign(&self, public: &PublicParams, hash: HashAlgorithm, digest: &[u8]) -> Result<Vec<Mpi>> {
        match public {
            PublicParams::Rsa { .. } => {
                let key = self.rsa_key(public)?;
                let sig = key
                    .sign(pkcs1v15_scheme(hash), digest)
                    .map_err(|e| PgpkitError::crypto(format!("RSA signing failed: {}", e)))?;
                Ok(vec![Mpi::from_bytes(&sig)])
            }
            PublicParams::Dsa { q, .. } => {
                let key = self.dsa_key(public)?;
                let sig: dsa::Signature = key
                    .sign_prehash(truncate_digest(digest, q))
                    .map_err(|e| PgpkitError::crypto(format!("DSA signing failed: {}", e)))?;
                Ok(vec![Mpi::from_biguint(sig.r()), Mpi::from_biguint(sig.s())])
            }
            PublicParams::ElGamal { .. } => Err(PgpkitError::unsupported("ElGamal signatures")),
        }
    }

    /// Recovers a session-key payload from PKESK MPIs
    pub fn decrypt_session(&self, public: &PublicParams, ciphertext: &[Mpi]) -> Result<Zeroizing<Vec<u8>>> {
        match (public, ciphertext) {
            (PublicParams::Rsa { n, .. }, [c]) => {
                let key = self.rsa_key(public)?;
                let padded = c.to_padded(n.as_bytes().len());
                key.decrypt(Pkcs1v15Encrypt, &padded)
                    .map(Zeroizing::new)
                    .map_err(|e| PgpkitError::crypto(format!("RSA decryption failed: {}", e)))
            }
            (PublicParams::ElGamal { p, .. }, [c1, c2]) => match self {
                Self::ElGamal { x } => elgamal::decrypt(
                    &p.to_biguint(),
                    &x.to_biguint(),
                    &c1.to_biguint(),
                    &c2.to_biguint(),
                ),
                _ => Err(PgpkitError::CouldNotExtractPrivateKey),
            },
            (PublicParams::Dsa { .. }, _) => Err(PgpkitError::crypto("DSA keys cannot decrypt")),
            _ => Err(PgpkitError::invalid_data("malformed encrypted session key")),
        }
    }
}

/// Generates a key pair for `algorithm` with the requested bit strength
pub fn generate<R: CryptoRng + RngCore>(
    rng: &mut R,
    algorithm: PublicKeyAlgorithm,
    bits: usize,
) -> Result<(PublicParams, SecretParams)> {
    debug!(algorithm = %algorithm, bits, "Generating key pair");
    match algorithm {
        PublicKeyAlgorithm::Rsa => {
            let key = RsaPrivateKey::new(rng, bits)
                .map_err(|e| PgpkitError::crypto(format!("RSA key generation failed: {}", e)))?;
            let primes = key.primes();
            if primes.len() != 2 {
                return Err(PgpkitError::crypto("RSA key generation produced multi-prime key"));
            }
            // RFC 4880 orders the primes so that p < q
            let (p, q) = if primes[0] < primes[1] {
                (&primes[0], &primes[1])
            } else {
                (&primes[1], &primes[0])
            };
            let u = elgamal::mod_inverse(p, q)
                .ok_or_else(|| PgpkitError::crypto("RSA primes are not coprime"))?;
            Ok((
                PublicParams::Rsa {
                    n: Mpi::from_biguint(key.n()),
                    e: Mpi::from_biguint(key.e()),
                },
                SecretParams::Rsa {
                    d: Mpi::from_biguint(key.d()),
                    p: Mpi::from_biguint(p),
                    q: Mpi::from_biguint(q),
                    u: Mpi::from_biguint(&u),
                },
            ))
        }
        PublicKeyAlgorithm::Dsa => {
            let components = Components::generate(rng, dsa_key_size(bits));
            let key = SigningKey::generate(rng, components);
            let verifying = key.verifying_key();
            let components = verifying.components();
            Ok((
                PublicParams::Dsa {
                    p: Mpi::from_biguint(components.p()),
                    q: Mpi::from_biguint(components.q()),
                    g: Mpi::from_biguint(components.g()),
                    y: Mpi::from_biguint(verifying.y()),
                },
                SecretParams::Dsa {
                    x: Mpi::from_biguint(key.x()),
                },
            ))
        }
        PublicKeyAlgorithm::ElGamal => {
            let key = elgamal::generate(rng, bits)?;
            Ok((
                PublicParams::ElGamal {
                    p: Mpi::from_biguint(&key.p),
                    g: Mpi::from_biguint(&key.g),
                    y: Mpi::from_biguint(&key.y),
                },
                SecretParams::ElGamal {
                    x: Mpi::from_biguint(&key.x),
                },
            ))
        }
        _ => Err(PgpkitError::UnknownAlgorithmChoice),
    }
}

/// FIPS 186 parameter sizes for a requested DSA strength
#[allow(deprecated)]
fn dsa_key_size(bits: usize) -> KeySize {
    if bits <= 1024 {
        KeySize::DSA_1024_160
    } else if bits <= 2048 {
        KeySize::DSA_2048_256
    } else {
        KeySize::DSA_3072_256
    }
}

/// Checks that secret material matches the public key
pub fn check_consistency(public: &PublicParams, secret: &SecretParams) -> Result<()> {
    let consistent = match (public, secret) {
        (PublicParams::Rsa { n, .. }, SecretParams::Rsa { p, q, .. }) => {
            let product: BigUint = p.to_biguint() * q.to_biguint();
            product == n.to_biguint()
        }
        (PublicParams::Dsa { p, g, y, .. }, SecretParams::Dsa { x })
        | (PublicParams::ElGamal { p, g, y }, SecretParams::ElGamal { x }) => {
            g.to_biguint().modpow(&x.to_biguint(), &p.to_biguint()) == y.to_biguint()
        }
        _ => false,
    };
    if consistent {
        Ok(())
    } else {
        Err(PgpkitError::CouldNotExtractPrivateKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::digest;
    use rand::rngs::OsRng;

    #[test]
    fn test_rsa_sign_verify_and_session() {
        let (public, secret) = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024).unwrap();
        assert_eq!(public.bit_strength(), 1024);
        check_consistency(&public, &secret).unwrap();

        let hashed = digest(HashAlgorithm::Sha256, b"message");
        let sig = secret.sign(&public, HashAlgorithm::Sha256, &hashed).unwrap();
        assert!(public.verify(HashAlgorithm::Sha256, &hashed, &sig).unwrap());

        let other = digest(HashAlgorithm::Sha256, b"massage");
        assert!(!public.verify(HashAlgorithm::Sha256, &other, &sig).unwrap());

        let payload = b"\x09abcdefghijklmnopqrstuvwxyz012345\x0a\x0b";
        let encrypted = public.encrypt_session(&mut OsRng, payload).unwrap();
        let decrypted = secret.decrypt_session(&public, &encrypted).unwrap();
        assert_eq!(&decrypted[..], &payload[..]);
    }

    #[test]
    fn test_dsa_sign_verify() {
        let (public, secret) = generate(&mut OsRng, PublicKeyAlgorithm::Dsa, 1024).unwrap();
        check_consistency(&public, &secret).unwrap();

        // SHA-256 digests are truncated to the 160-bit q
        let hashed = digest(HashAlgorithm::Sha256, b"message");
        let sig = secret.sign(&public, HashAlgorithm::Sha256, &hashed).unwrap();
        assert_eq!(sig.len(), 2);
        assert!(public.verify(HashAlgorithm::Sha256, &hashed, &sig).unwrap());
        assert!(public.encrypt_session(&mut OsRng, b"x").is_err());
    }

    #[test]
    fn test_elgamal_session() {
        let (public, secret) = generate(&mut OsRng, PublicKeyAlgorithm::ElGamal, 1024).unwrap();
        check_consistency(&public, &secret).unwrap();
        let encrypted = public.encrypt_session(&mut OsRng, b"\x07sixteen-byte-key\x00\x01").unwrap();
        assert_eq!(encrypted.len(), 2);
        let decrypted = secret.decrypt_session(&public, &encrypted).unwrap();
        assert_eq!(&decrypted[..], b"\x07sixteen-byte-key\x00\x01");
    }

    #[test]
    fn test_unsupported_generation() {
        assert!(matches!(
            generate(&mut OsRng, PublicKeyAlgorithm::RsaSignOnly, 1024),
            Err(PgpkitError::UnknownAlgorithmChoice)
        ));
    }

    #[test]
    fn test_inconsistent_secret_rejected() {
        let (public, _) = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024).unwrap();
        let (_, other_secret) = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024).unwrap();
        assert!(check_consistency(&public, &other_secret).is_err());
    }
}
