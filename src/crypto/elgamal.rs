//! ElGamal encryption over well-known MODP groups.
//!
//! Keys are generated in RFC 2409 group 2 (1024-bit) or RFC 3526 group 14
//! (2048-bit) with generator 2. Session keys are padded with EME-PKCS1-v1_5
//! before encryption, as RFC 4880 §13.1 requires.

use num_bigint_dig::{BigInt, BigUint, ModInverse, Sign};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{PgpkitError, Result};

const GROUP2_PRIME: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
FFFFFFFFFFFFFFFF";

const GROUP14_PRIME: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
83655D23DCA3AD961C62F356208552BB9ED529077096966D\
670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
15728E5A8AACAA68FFFFFFFFFFFFFFFF";

/// ElGamal key pair: public (p, g, y) and secret x
pub struct ElGamalKey {
    pub p: BigUint,
    pub g: BigUint,
    pub y: BigUint,
    pub x: BigUint,
}

fn group_prime(bits: usize) -> Result<BigUint> {
    let hex = if bits <= 1024 {
        GROUP2_PRIME
    } else {
        GROUP14_PRIME
    };
    BigUint::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| PgpkitError::crypto("invalid MODP group constant"))
}

/// Uniform-ish random value in [1, bound)
fn random_below<R: CryptoRng + RngCore>(rng: &mut R, bound: &BigUint) -> BigUint {
    let len = bound.to_bytes_be().len() + 8;
    let one = BigUint::from(1u32);
    loop {
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        rng.fill_bytes(&mut bytes);
        let value = BigUint::from_bytes_be(&bytes) % bound;
        if value >= one {
            return value;
        }
    }
}

pub fn generate<R: CryptoRng + RngCore>(rng: &mut R, bits: usize) -> Result<ElGamalKey> {
    let p = group_prime(bits)?;
    let g = BigUint::from(2u32);
    let x = random_below(rng, &(&p - BigUint::from(2u32)));
    let y = g.modpow(&x, &p);
    Ok(ElGamalKey { p, g, y, x })
}

/// Encrypts `message` (already PKCS#1 padded, less than p) and returns (c1, c2)
pub fn encrypt_raw<R: CryptoRng + RngCore>(
    rng: &mut R,
    p: &BigUint,
    g: &BigUint,
    y: &BigUint,
    message: &BigUint,
) -> Result<(BigUint, BigUint)> {
    if message >= p {
        return Err(PgpkitError::crypto("ElGamal message out of range"));
    }
    let k = random_below(rng, &(p - BigUint::from(1u32)));
    let c1 = g.modpow(&k, p);
    let c2 = (message * y.modpow(&k, p)) % p;
    Ok((c1, c2))
}

/// Inverse of `value` modulo `modulus`, normalized into [0, modulus)
pub(crate) fn mod_inverse(value: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let inverse = value.clone().mod_inverse(modulus)?;
    let modulus = BigInt::from_biguint(Sign::Plus, modulus.clone());
    (((inverse % &modulus) + &modulus) % &modulus).to_biguint()
}

pub fn decrypt_raw(p: &BigUint, x: &BigUint, c1: &BigUint, c2: &BigUint) -> Result<BigUint> {
    let shared = c1.modpow(x, p);
    let inverse = mod_inverse(&shared, p)
        .ok_or_else(|| PgpkitError::crypto("ElGamal shared secret not invertible"))?;
    Ok((c2 * inverse) % p)
}

/// Encrypts a session key payload with EME-PKCS1-v1_5 padding
pub fn encrypt<R: CryptoRng + RngCore>(
    rng: &mut R,
    p: &BigUint,
    g: &BigUint,
    y: &BigUint,
    payload: &[u8],
) -> Result<(BigUint, BigUint)> {
    let k = p.to_bytes_be().len();
    let padded = eme_pkcs1_encode(rng, payload, k)?;
    encrypt_raw(rng, p, g, y, &BigUint::from_bytes_be(&padded))
}

pub fn decrypt(p: &BigUint, x: &BigUint, c1: &BigUint, c2: &BigUint) -> Result<Zeroizing<Vec<u8>>> {
    let k = p.to_bytes_be().len();
    let m = decrypt_raw(p, x, c1, c2)?;
    let bytes = Zeroizing::new(m.to_bytes_be());
    if bytes.len() > k {
        return Err(PgpkitError::crypto("ElGamal plaintext too long"));
    }
    let mut padded = Zeroizing::new(vec![0u8; k - bytes.len()]);
    padded.extend_from_slice(&bytes);
    eme_pkcs1_decode(&padded)
}

/// EM = 0x00 || 0x02 || PS (non-zero, at least 8 bytes) || 0x00 || M
fn eme_pkcs1_encode<R: CryptoRng + RngCore>(rng: &mut R, message: &[u8], k: usize) -> Result<Vec<u8>> {
    if message.len() + 11 > k {
        return Err(PgpkitError::crypto("message too long for EME-PKCS1-v1_5"));
    }
    let mut em = vec![0u8, 2u8];
    for _ in 0..(k - message.len() - 3) {
        let mut byte = [0u8; 1];
        while byte[0] == 0 {
            rng.fill_bytes(&mut byte);
        }
        em.push(byte[0]);
    }
    em.push(0);
    em.extend_from_slice(message);
    Ok(em)
}

fn eme_pkcs1_decode(em: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if em.len() < 11 || em[0] != 0 || em[1] != 2 {
        return Err(PgpkitError::crypto("invalid EME-PKCS1-v1_5 padding"));
    }
    let separator = em[2..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| i + 2)
        .ok_or_else(|| PgpkitError::crypto("invalid EME-PKCS1-v1_5 padding"))?;
    if separator < 10 {
        return Err(PgpkitError::crypto("EME-PKCS1-v1_5 padding string too short"));
    }
    Ok(Zeroizing::new(em[separator + 1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_group_primes_have_expected_size() {
        assert_eq!(group_prime(1024).unwrap().bits(), 1024);
        assert_eq!(group_prime(2048).unwrap().bits(), 2048);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate(&mut OsRng, 1024).unwrap();
        let payload = b"\x09session-key-bytes-0123456789abc\x01\x02";
        let (c1, c2) = encrypt(&mut OsRng, &key.p, &key.g, &key.y, payload).unwrap();
        let recovered = decrypt(&key.p, &key.x, &c1, &c2).unwrap();
        assert_eq!(&recovered[..], &payload[..]);
    }

    #[test]
    fn test_wrong_secret_fails_padding() {
        let key = generate(&mut OsRng, 1024).unwrap();
        let other = generate(&mut OsRng, 1024).unwrap();
        let (c1, c2) = encrypt(&mut OsRng, &key.p, &key.g, &key.y, b"secret").unwrap();
        // Overwhelmingly likely to break the 0x00 0x02 prefix
        assert!(decrypt(&key.p, &other.x, &c1, &c2).is_err());
    }
}
