//! Public-key and secret-key packets (RFC 4880 §5.5).

use rand::{CryptoRng, RngCore};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::cursor::Cursor;
use crate::crypto::hash::{self, Hasher};
use crate::crypto::public_key::{self, PublicParams, SecretParams};
use crate::crypto::{
    checksum16, secure_random_bytes, CfbDecryptor, CfbEncryptor, HashAlgorithm, Mpi, Passphrase,
    ProtectionParams, PublicKeyAlgorithm, StringToKey, SymmetricAlgorithm,
};
use crate::error::{PgpkitError, Result};

/// Public key material of a master key or subkey
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyPacket {
    version: u8,
    created: u32,
    /// Validity period in days, version 3 keys only
    validity_days: u16,
    algorithm: PublicKeyAlgorithm,
    params: PublicParams,
    fingerprint: Vec<u8>,
    key_id: u64,
}

impl PublicKeyPacket {
    /// Creates a version 4 key
    pub fn new(algorithm: PublicKeyAlgorithm, created: u32, params: PublicParams) -> Self {
        let mut packet = Self {
            version: 4,
            created,
            validity_days: 0,
            algorithm,
            params,
            fingerprint: Vec::new(),
            key_id: 0,
        };
        packet.compute_identity();
        packet
    }

    /// Parses a complete public key or public subkey packet body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let packet = Self::parse_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(PgpkitError::packet("trailing data after public key"));
        }
        Ok(packet)
    }

    /// Parses the public part of a key packet, leaving the cursor after it
    pub fn parse_from(cursor: &mut Cursor<'_>) -> Result<Self> {
        let version = cursor.read_u8()?;
        let (created, validity_days) = match version {
            2 | 3 => (cursor.read_u32()?, cursor.read_u16()?),
            4 => (cursor.read_u32()?, 0),
            other => {
                return Err(PgpkitError::unsupported(format!("key packet version {}", other)))
            }
        };
        let alg_byte = cursor.read_u8()?;
        let algorithm = PublicKeyAlgorithm::from_byte(alg_byte).ok_or_else(|| {
            PgpkitError::unsupported(format!("public key algorithm {}", alg_byte))
        })?;
        if version < 4 && !algorithm.is_rsa() {
            return Err(PgpkitError::unsupported("version 3 keys must be RSA"));
        }
        let params = PublicParams::parse(algorithm, cursor)?;

        let mut packet = Self {
            version: if version == 2 { 3 } else { version },
            created,
            validity_days,
            algorithm,
            params,
            fingerprint: Vec::new(),
            key_id: 0,
        };
        packet.compute_identity();
        Ok(packet)
    }

    fn compute_identity(&mut self) {
        if self.version == 4 {
            let mut hasher = Hasher::new(HashAlgorithm::Sha1);
            self.hash_into(&mut hasher);
            self.fingerprint = hasher.finalize();
            let mut id = [0u8; 8];
            id.copy_from_slice(&self.fingerprint[12..20]);
            self.key_id = u64::from_be_bytes(id);
        } else if let PublicParams::Rsa { n, e } = &self.params {
            let mut material = n.as_bytes().to_vec();
            material.extend_from_slice(e.as_bytes());
            self.fingerprint = hash::digest(HashAlgorithm::Md5, &material);
            let n_bytes = n.to_padded(8);
            let mut id = [0u8; 8];
            id.copy_from_slice(&n_bytes[n_bytes.len() - 8..]);
            self.key_id = u64::from_be_bytes(id);
        }
    }

    /// Serialized packet body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Appends the packet body to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        out.extend_from_slice(&self.created.to_be_bytes());
        if self.version < 4 {
            out.extend_from_slice(&self.validity_days.to_be_bytes());
        }
        out.push(self.algorithm.to_byte());
        self.params.encode(out);
    }

    /// Feeds the key into a signature hash: 0x99, two-octet length, body
    pub fn hash_into(&self, hasher: &mut Hasher) {
        let body = self.to_bytes();
        hasher.update(&[0x99]);
        hasher.update(&(body.len() as u16).to_be_bytes());
        hasher.update(&body);
    }

    /// Packet version; version 2 keys are read as version 3
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn created(&self) -> u32 {
        self.created
    }

    /// Validity period of a version 3 key in days, 0 meaning it never expires
    pub fn validity_days(&self) -> u16 {
        self.validity_days
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    /// Algorithm-specific public MPIs
    pub fn params(&self) -> &PublicParams {
        &self.params
    }

    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    /// Low 64 bits of the fingerprint (v4) or of the RSA modulus (v3)
    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    pub fn bit_strength(&self) -> usize {
        self.params.bit_strength()
    }

    /// Verifies signature MPIs over a finished digest
    pub fn verify(&self, hash: HashAlgorithm, digest: &[u8], mpis: &[Mpi]) -> Result<bool> {
        self.params.verify(hash, digest, mpis)
    }

    /// Encrypts an already padded session key payload to this key
    pub fn encrypt_session<R: CryptoRng + RngCore>(&self, rng: &mut R, payload: &[u8]) -> Result<Vec<Mpi>> {
        self.params.encrypt_session(rng, payload)
    }
}

impl fmt::Display for PublicKeyPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey({}/{}, ID: {:016X})",
            self.algorithm,
            self.bit_strength(),
            self.key_id
        )
    }
}

/// How the secret part of a key packet is stored
#[derive(Clone, PartialEq, Eq)]
enum SecretMaterial {
    /// S2K usage 0: MPIs followed by a two-octet checksum
    Plain(Vec<u8>),
    Encrypted {
        usage: u8,
        cipher: SymmetricAlgorithm,
        s2k: StringToKey,
        iv: Vec<u8>,
        data: Vec<u8>,
    },
    /// GNU extension: the secret part was stripped on export
    Dummy { usage: u8, cipher: u8 },
}

const USAGE_SHA1: u8 = 254;
const USAGE_CHECKSUM: u8 = 255;
const SHA1_LEN: usize = 20;

/// Secret key packet: public key plus (possibly encrypted) secret material
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKeyPacket {
    public: PublicKeyPacket,
    material: SecretMaterial,
}

impl SecretKeyPacket {
    /// Wraps secret material, protected under `passphrase` unless it is empty
    pub fn new<R: CryptoRng + RngCore>(
        rng: &mut R,
        public: PublicKeyPacket,
        secret: &SecretParams,
        passphrase: &Passphrase,
        protection: &ProtectionParams,
    ) -> Result<Self> {
        let clear = secret.to_bytes();
        let material = if passphrase.is_empty() {
            let mut data = clear.to_vec();
            data.extend_from_slice(&checksum16(&clear).to_be_bytes());
            SecretMaterial::Plain(data)
        } else {
            let s2k = StringToKey::new_iterated(rng, protection.hash, protection.count);
            let key = s2k.derive_key(passphrase, protection.cipher.key_size())?;
            let iv = secure_random_bytes(rng, protection.cipher.block_size());
            let mut data = Zeroizing::new(clear.to_vec());
            data.extend_from_slice(&hash::digest(HashAlgorithm::Sha1, &clear));
            let mut encryptor = CfbEncryptor::new(protection.cipher, &key, &iv)?;
            encryptor.encrypt(&mut data);
            SecretMaterial::Encrypted {
                usage: USAGE_SHA1,
                cipher: protection.cipher,
                s2k,
                iv,
                data: data.to_vec(),
            }
        };
        Ok(Self { public, material })
    }

    /// Parses a secret key packet body; only version 4 keys are supported
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let public = PublicKeyPacket::parse_from(&mut cursor)?;
        if public.version() < 4 {
            return Err(PgpkitError::unsupported("version 3 secret keys"));
        }
        let usage = cursor.read_u8()?;
        let material = match usage {
            0 => SecretMaterial::Plain(cursor.rest().to_vec()),
            USAGE_SHA1 | USAGE_CHECKSUM => {
                let cipher_byte = cursor.read_u8()?;
                let s2k = StringToKey::parse(&mut cursor)?;
                if s2k.is_dummy() {
                    SecretMaterial::Dummy {
                        usage,
                        cipher: cipher_byte,
                    }
                } else {
                    let cipher = SymmetricAlgorithm::require(cipher_byte)?;
                    let iv = cursor.read_bytes(cipher.block_size())?.to_vec();
                    SecretMaterial::Encrypted {
                        usage,
                        cipher,
                        s2k,
                        iv,
                        data: cursor.rest().to_vec(),
                    }
                }
            }
            legacy => {
                // Usage octet names the cipher; the key is the MD5 of the passphrase
                let cipher = SymmetricAlgorithm::require(legacy)?;
                let iv = cursor.read_bytes(cipher.block_size())?.to_vec();
                SecretMaterial::Encrypted {
                    usage: legacy,
                    cipher,
                    s2k: StringToKey::Simple {
                        hash: HashAlgorithm::Md5,
                    },
                    iv,
                    data: cursor.rest().to_vec(),
                }
            }
        };
        Ok(Self { public, material })
    }

    /// Serialized packet body, secret material as stored
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.public.to_bytes();
        match &self.material {
            SecretMaterial::Plain(data) => {
                out.push(0);
                out.extend_from_slice(data);
            }
            SecretMaterial::Encrypted {
                usage,
                cipher,
                s2k,
                iv,
                data,
            } => {
                out.push(*usage);
                if *usage == USAGE_SHA1 || *usage == USAGE_CHECKSUM {
                    out.push(cipher.to_byte());
                    s2k.encode(&mut out);
                }
                out.extend_from_slice(iv);
                out.extend_from_slice(data);
            }
            SecretMaterial::Dummy { usage, cipher } => {
                out.push(*usage);
                out.push(*cipher);
                StringToKey::GnuDummy.encode(&mut out);
            }
        }
        out
    }

    /// Public half of the key
    pub fn public(&self) -> &PublicKeyPacket {
        &self.public
    }

    pub fn key_id(&self) -> u64 {
        self.public.key_id()
    }

    /// True when the secret part is encrypted under a passphrase
    pub fn is_protected(&self) -> bool {
        matches!(self.material, SecretMaterial::Encrypted { .. })
    }

    /// True when the secret part is absent (GNU dummy stub)
    pub fn is_dummy(&self) -> bool {
        matches!(self.material, SecretMaterial::Dummy { .. })
    }

    /// Recovers the secret key material.
    ///
    /// Fails with `WrongPassphrase` when the integrity check over the decrypted
    /// material does not match, and with `CouldNotExtractPrivateKey` when the
    /// material is absent or does not form a valid key.
    pub fn unlock(&self, passphrase: &Passphrase) -> Result<UnlockedKey> {
        let clear: Zeroizing<Vec<u8>> = match &self.material {
            SecretMaterial::Dummy { .. } => return Err(PgpkitError::CouldNotExtractPrivateKey),
            SecretMaterial::Plain(data) => {
                if data.len() < 2 {
                    return Err(PgpkitError::CouldNotExtractPrivateKey);
                }
                let (mpis, check) = data.split_at(data.len() - 2);
                if checksum16(mpis).to_be_bytes()[..] != *check {
                    return Err(PgpkitError::CouldNotExtractPrivateKey);
                }
                Zeroizing::new(mpis.to_vec())
            }
            SecretMaterial::Encrypted {
                usage,
                cipher,
                s2k,
                iv,
                data,
            } => {
                let key = s2k.derive_key(passphrase, cipher.key_size())?;
                let mut decrypted = Zeroizing::new(data.clone());
                CfbDecryptor::new(*cipher, &key, iv)?.decrypt(&mut decrypted);
                let check_len = if *usage == USAGE_SHA1 { SHA1_LEN } else { 2 };
                if decrypted.len() < check_len {
                    return Err(PgpkitError::CouldNotExtractPrivateKey);
                }
                let (mpis, check) = decrypted.split_at(decrypted.len() - check_len);
                let matches: bool = if *usage == USAGE_SHA1 {
                    hash::digest(HashAlgorithm::Sha1, mpis).ct_eq(check).into()
                } else {
                    checksum16(mpis).to_be_bytes()[..].ct_eq(check).into()
                };
                if !matches {
                    return Err(PgpkitError::WrongPassphrase);
                }
                Zeroizing::new(mpis.to_vec())
            }
        };

        let mut cursor = Cursor::new(&clear);
        let secret = SecretParams::parse(self.public.algorithm(), &mut cursor)
            .map_err(|_| PgpkitError::CouldNotExtractPrivateKey)?;
        if !cursor.is_empty() {
            return Err(PgpkitError::CouldNotExtractPrivateKey);
        }
        public_key::check_consistency(self.public.params(), &secret)?;
        Ok(UnlockedKey {
            public: self.public.clone(),
            secret,
        })
    }

    /// Re-wraps the secret material under a new passphrase
    pub fn rewrap<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        old: &Passphrase,
        new: &Passphrase,
        protection: &ProtectionParams,
    ) -> Result<Self> {
        if self.is_dummy() {
            return Ok(self.clone());
        }
        let unlocked = self.unlock(old)?;
        Self::new(rng, self.public.clone(), &unlocked.secret, new, protection)
    }
}

impl fmt::Debug for SecretKeyPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyPacket")
            .field("public", &self.public)
            .field("protected", &self.is_protected())
            .field("dummy", &self.is_dummy())
            .finish()
    }
}

/// A key whose secret material has been recovered
#[derive(Clone)]
pub struct UnlockedKey {
    public: PublicKeyPacket,
    secret: SecretParams,
}

impl UnlockedKey {
    /// Public half of the key
    pub fn public(&self) -> &PublicKeyPacket {
        &self.public
    }

    pub fn key_id(&self) -> u64 {
        self.public.key_id()
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.public.algorithm()
    }

    /// Signs a finished `digest` made with `hash`
    pub fn sign(&self, hash: HashAlgorithm, digest: &[u8]) -> Result<Vec<Mpi>> {
        self.secret.sign(self.public.params(), hash, digest)
    }

    /// Recovers a session key payload from the recipient MPIs
    pub fn decrypt_session(&self, mpis: &[Mpi]) -> Result<Zeroizing<Vec<u8>>> {
        self.secret.decrypt_session(self.public.params(), mpis)
    }

    /// Raw secret parameters, used when re-wrapping the key
    pub fn secret(&self) -> &SecretParams {
        &self.secret
    }
}

impl fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnlockedKey({:016X})", self.key_id())
    }
}

/// Generates a fresh key pair and returns it as an unprotected unlocked key
pub fn generate<R: CryptoRng + RngCore>(
    rng: &mut R,
    algorithm: PublicKeyAlgorithm,
    bits: usize,
    created: u32,
) -> Result<UnlockedKey> {
    let (public, secret) = public_key::generate(rng, algorithm, bits)?;
    Ok(UnlockedKey {
        public: PublicKeyPacket::new(algorithm, created, public),
        secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn fast_protection() -> ProtectionParams {
        ProtectionParams {
            count: 0x10,
            ..ProtectionParams::default()
        }
    }

    #[test]
    fn test_public_key_identity() {
        let key = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024, 1_700_000_000).unwrap();
        let public = key.public();
        assert_eq!(public.fingerprint().len(), 20);
        assert_eq!(public.key_id().to_be_bytes(), public.fingerprint()[12..20]);

        let parsed = PublicKeyPacket::parse(&public.to_bytes()).unwrap();
        assert_eq!(&parsed, public);
        assert_eq!(parsed.to_string(), format!("PublicKey(RSA/1024, ID: {:016X})", public.key_id()));
    }

    #[test]
    fn test_secret_key_protection() {
        let key = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024, 1_700_000_000).unwrap();
        let pass = Passphrase::from("hunter2");
        let packet = SecretKeyPacket::new(
            &mut OsRng,
            key.public().clone(),
            key.secret(),
            &pass,
            &fast_protection(),
        )
        .unwrap();
        assert!(packet.is_protected());

        let parsed = SecretKeyPacket::parse(&packet.to_bytes()).unwrap();
        assert_eq!(parsed, packet);
        assert!(parsed.unlock(&pass).is_ok());
        assert!(matches!(
            parsed.unlock(&Passphrase::from("hunter3")),
            Err(PgpkitError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_unprotected_and_rewrap() {
        let key = generate(&mut OsRng, PublicKeyAlgorithm::Dsa, 1024, 1_700_000_000).unwrap();
        let packet = SecretKeyPacket::new(
            &mut OsRng,
            key.public().clone(),
            key.secret(),
            &Passphrase::empty(),
            &fast_protection(),
        )
        .unwrap();
        assert!(!packet.is_protected());
        // Any passphrase opens an unprotected key
        assert!(packet.unlock(&Passphrase::from("ignored")).is_ok());

        let pass = Passphrase::from("new");
        let rewrapped = packet
            .rewrap(&mut OsRng, &Passphrase::empty(), &pass, &fast_protection())
            .unwrap();
        assert!(rewrapped.is_protected());
        assert_eq!(rewrapped.key_id(), packet.key_id());
        assert!(rewrapped.unlock(&pass).is_ok());
    }

    #[test]
    fn test_dummy_secret_key() {
        let key = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024, 1_700_000_000).unwrap();
        let mut body = key.public().to_bytes();
        body.extend_from_slice(&[255, 0]);
        StringToKey::GnuDummy.encode(&mut body);

        let packet = SecretKeyPacket::parse(&body).unwrap();
        assert!(packet.is_dummy());
        assert_eq!(packet.to_bytes(), body);
        assert!(matches!(
            packet.unlock(&Passphrase::empty()),
            Err(PgpkitError::CouldNotExtractPrivateKey)
        ));
    }
}
