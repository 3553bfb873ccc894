//! Session keys and the packets that carry them (RFC 4880 §5.1, §5.3).

use rand::{CryptoRng, RngCore};
use std::fmt;
use zeroize::Zeroizing;

use super::cursor::Cursor;
use super::key::{PublicKeyPacket, UnlockedKey};
use crate::crypto::{
    checksum16, CfbDecryptor, CfbEncryptor, HashAlgorithm, Mpi, Passphrase, PublicKeyAlgorithm,
    StringToKey, SymmetricAlgorithm,
};
use crate::error::{PgpkitError, Result};

/// Symmetric key for one message
#[derive(Clone)]
pub struct SessionKey {
    algorithm: SymmetricAlgorithm,
    key: Zeroizing<Vec<u8>>,
}

impl SessionKey {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R, algorithm: SymmetricAlgorithm) -> Self {
        let mut key = Zeroizing::new(vec![0u8; algorithm.key_size()]);
        rng.fill_bytes(&mut key);
        Self { algorithm, key }
    }

    pub fn new(algorithm: SymmetricAlgorithm, key: Zeroizing<Vec<u8>>) -> Result<Self> {
        if key.len() != algorithm.key_size() {
            return Err(PgpkitError::crypto(format!(
                "{} session key must be {} bytes",
                algorithm,
                algorithm.key_size()
            )));
        }
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Algorithm octet, key and two-octet checksum, as encrypted in a PKESK
    pub fn to_payload(&self) -> Zeroizing<Vec<u8>> {
        let mut payload = Zeroizing::new(Vec::with_capacity(self.key.len() + 3));
        payload.push(self.algorithm.to_byte());
        payload.extend_from_slice(&self.key);
        payload.extend_from_slice(&checksum16(&self.key).to_be_bytes());
        payload
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let (&alg, rest) = payload
            .split_first()
            .ok_or_else(|| PgpkitError::corrupt_data("empty session key"))?;
        let algorithm = SymmetricAlgorithm::from_byte(alg)
            .ok_or_else(|| PgpkitError::corrupt_data("unknown session key algorithm"))?;
        if rest.len() != algorithm.key_size() + 2 {
            return Err(PgpkitError::corrupt_data("session key length mismatch"));
        }
        let (key, check) = rest.split_at(algorithm.key_size());
        if checksum16(key).to_be_bytes()[..] != *check {
            return Err(PgpkitError::corrupt_data("session key checksum mismatch"));
        }
        Ok(Self {
            algorithm,
            key: Zeroizing::new(key.to_vec()),
        })
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.algorithm)
    }
}

/// Public-key encrypted session key packet, version 3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyEncryptedSessionKey {
    pub key_id: u64,
    pub algorithm: PublicKeyAlgorithm,
    pub mpis: Vec<Mpi>,
}

impl PublicKeyEncryptedSessionKey {
    pub fn encrypt<R: CryptoRng + RngCore>(
        rng: &mut R,
        recipient: &PublicKeyPacket,
        session: &SessionKey,
    ) -> Result<Self> {
        let payload = session.to_payload();
        Ok(Self {
            key_id: recipient.key_id(),
            algorithm: recipient.algorithm(),
            mpis: recipient.encrypt_session(rng, &payload)?,
        })
    }

    pub fn decrypt(&self, key: &UnlockedKey) -> Result<SessionKey> {
        let payload = key.decrypt_session(&self.mpis)?;
        SessionKey::from_payload(&payload)
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let version = cursor.read_u8()?;
        if version != 3 {
            return Err(PgpkitError::unsupported(format!("PKESK version {}", version)));
        }
        let key_id = cursor.read_u64()?;
        let alg = cursor.read_u8()?;
        let algorithm = PublicKeyAlgorithm::from_byte(alg)
            .ok_or_else(|| PgpkitError::unsupported(format!("public key algorithm {}", alg)))?;
        let count = if algorithm.is_elgamal() { 2 } else { 1 };
        let mut mpis = Vec::with_capacity(count);
        for _ in 0..count {
            mpis.push(cursor.read_mpi()?);
        }
        Ok(Self {
            key_id,
            algorithm,
            mpis,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![3];
        out.extend_from_slice(&self.key_id.to_be_bytes());
        out.push(self.algorithm.to_byte());
        for mpi in &self.mpis {
            mpi.encode(&mut out);
        }
        out
    }
}

/// Symmetric-key encrypted session key packet, version 4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKeyEncryptedSessionKey {
    pub cipher: SymmetricAlgorithm,
    pub s2k: StringToKey,
    /// Encrypted session key; absent when the S2K output is the session key
    pub encrypted: Option<Vec<u8>>,
}

impl SymmetricKeyEncryptedSessionKey {
    /// Packet whose S2K output is the session key itself
    pub fn derive<R: CryptoRng + RngCore>(
        rng: &mut R,
        passphrase: &Passphrase,
        cipher: SymmetricAlgorithm,
        hash: HashAlgorithm,
        count: u8,
    ) -> Result<(Self, SessionKey)> {
        let s2k = StringToKey::new_iterated(rng, hash, count);
        let key = s2k.derive_key(passphrase, cipher.key_size())?;
        let session = SessionKey::new(cipher, key)?;
        Ok((
            Self {
                cipher,
                s2k,
                encrypted: None,
            },
            session,
        ))
    }

    /// Packet carrying an existing session key encrypted under the passphrase
    pub fn wrap<R: CryptoRng + RngCore>(
        rng: &mut R,
        passphrase: &Passphrase,
        session: &SessionKey,
        hash: HashAlgorithm,
        count: u8,
    ) -> Result<Self> {
        let cipher = session.algorithm();
        let s2k = StringToKey::new_iterated(rng, hash, count);
        let kek = s2k.derive_key(passphrase, cipher.key_size())?;
        let mut data = Vec::with_capacity(session.key().len() + 1);
        data.push(cipher.to_byte());
        data.extend_from_slice(session.key());
        CfbEncryptor::with_zero_iv(cipher, &kek)?.encrypt(&mut data);
        Ok(Self {
            cipher,
            s2k,
            encrypted: Some(data),
        })
    }

    /// Recovers the session key; garbage after decryption means a wrong passphrase
    pub fn decrypt(&self, passphrase: &Passphrase) -> Result<SessionKey> {
        let kek = self.s2k.derive_key(passphrase, self.cipher.key_size())?;
        let data = match &self.encrypted {
            None => return SessionKey::new(self.cipher, kek),
            Some(data) => data,
        };
        let mut clear = Zeroizing::new(data.clone());
        CfbDecryptor::with_zero_iv(self.cipher, &kek)?.decrypt(&mut clear);
        let (&alg, key) = clear.split_first().ok_or(PgpkitError::WrongPassphrase)?;
        let algorithm = SymmetricAlgorithm::from_byte(alg).ok_or(PgpkitError::WrongPassphrase)?;
        if key.len() != algorithm.key_size() {
            return Err(PgpkitError::WrongPassphrase);
        }
        SessionKey::new(algorithm, Zeroizing::new(key.to_vec()))
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let version = cursor.read_u8()?;
        if version != 4 {
            return Err(PgpkitError::unsupported(format!("SKESK version {}", version)));
        }
        let cipher = SymmetricAlgorithm::require(cursor.read_u8()?)?;
        let s2k = StringToKey::parse(&mut cursor)?;
        let rest = cursor.rest();
        Ok(Self {
            cipher,
            s2k,
            encrypted: (!rest.is_empty()).then(|| rest.to_vec()),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![4, self.cipher.to_byte()];
        self.s2k.encode(&mut out);
        if let Some(data) = &self.encrypted {
            out.extend_from_slice(data);
        }
        out
    }
}
