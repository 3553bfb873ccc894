//! Signature and one-pass signature packets (RFC 4880 §5.2, §5.4).

use std::fmt;

use super::cursor::Cursor;
use super::key::{PublicKeyPacket, UnlockedKey};
use crate::crypto::hash::Hasher;
use crate::crypto::{HashAlgorithm, KeyUsage, Mpi, PublicKeyAlgorithm};
use crate::error::{PgpkitError, Result};

/// Signature type octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Binary,
    Text,
    Standalone,
    GenericCertification,
    PersonaCertification,
    CasualCertification,
    PositiveCertification,
    SubkeyBinding,
    PrimaryKeyBinding,
    DirectKey,
    KeyRevocation,
    SubkeyRevocation,
    CertificationRevocation,
    Timestamp,
    ThirdPartyConfirmation,
    Other(u8),
}

impl SignatureType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Binary,
            0x01 => Self::Text,
            0x02 => Self::Standalone,
            0x10 => Self::GenericCertification,
            0x11 => Self::PersonaCertification,
            0x12 => Self::CasualCertification,
            0x13 => Self::PositiveCertification,
            0x18 => Self::SubkeyBinding,
            0x19 => Self::PrimaryKeyBinding,
            0x1F => Self::DirectKey,
            0x20 => Self::KeyRevocation,
            0x28 => Self::SubkeyRevocation,
            0x30 => Self::CertificationRevocation,
            0x40 => Self::Timestamp,
            0x50 => Self::ThirdPartyConfirmation,
            other => Self::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Binary => 0x00,
            Self::Text => 0x01,
            Self::Standalone => 0x02,
            Self::GenericCertification => 0x10,
            Self::PersonaCertification => 0x11,
            Self::CasualCertification => 0x12,
            Self::PositiveCertification => 0x13,
            Self::SubkeyBinding => 0x18,
            Self::PrimaryKeyBinding => 0x19,
            Self::DirectKey => 0x1F,
            Self::KeyRevocation => 0x20,
            Self::SubkeyRevocation => 0x28,
            Self::CertificationRevocation => 0x30,
            Self::Timestamp => 0x40,
            Self::ThirdPartyConfirmation => 0x50,
            Self::Other(byte) => byte,
        }
    }

    /// True for the four user-ID certification types
    pub fn is_certification(self) -> bool {
        matches!(
            self,
            Self::GenericCertification
                | Self::PersonaCertification
                | Self::CasualCertification
                | Self::PositiveCertification
        )
    }
}

/// Signature subpacket (RFC 4880 §5.2.3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subpacket {
    SignatureCreationTime(u32),
    SignatureExpirationTime(u32),
    KeyExpirationTime(u32),
    PreferredSymmetric(Vec<u8>),
    Issuer(u64),
    PreferredHash(Vec<u8>),
    PreferredCompression(Vec<u8>),
    PrimaryUserId(bool),
    KeyFlags(Vec<u8>),
    SignerUserId(String),
    ReasonForRevocation { code: u8, reason: String },
    EmbeddedSignature(Box<SignaturePacket>),
    IssuerFingerprint { version: u8, fingerprint: Vec<u8> },
    Unknown { tag: u8, critical: bool, data: Vec<u8> },
}

impl Subpacket {
    fn parse(tag: u8, critical: bool, data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        Ok(match tag {
            2 => Self::SignatureCreationTime(cursor.read_u32()?),
            3 => Self::SignatureExpirationTime(cursor.read_u32()?),
            9 => Self::KeyExpirationTime(cursor.read_u32()?),
            11 => Self::PreferredSymmetric(data.to_vec()),
            16 => Self::Issuer(cursor.read_u64()?),
            21 => Self::PreferredHash(data.to_vec()),
            22 => Self::PreferredCompression(data.to_vec()),
            25 => Self::PrimaryUserId(cursor.read_u8()? != 0),
            27 => Self::KeyFlags(data.to_vec()),
            28 => Self::SignerUserId(String::from_utf8_lossy(data).into_owned()),
            29 => Self::ReasonForRevocation {
                code: cursor.read_u8()?,
                reason: String::from_utf8_lossy(cursor.rest()).into_owned(),
            },
            32 => Self::EmbeddedSignature(Box::new(SignaturePacket::parse(data)?)),
            33 => Self::IssuerFingerprint {
                version: cursor.read_u8()?,
                fingerprint: cursor.rest().to_vec(),
            },
            _ => Self::Unknown {
                tag,
                critical,
                data: data.to_vec(),
            },
        })
    }

    fn tag_and_data(&self) -> (u8, Vec<u8>) {
        match self {
            Self::SignatureCreationTime(t) => (2, t.to_be_bytes().to_vec()),
            Self::SignatureExpirationTime(t) => (3, t.to_be_bytes().to_vec()),
            Self::KeyExpirationTime(t) => (9, t.to_be_bytes().to_vec()),
            Self::PreferredSymmetric(v) => (11, v.clone()),
            Self::Issuer(id) => (16, id.to_be_bytes().to_vec()),
            Self::PreferredHash(v) => (21, v.clone()),
            Self::PreferredCompression(v) => (22, v.clone()),
            Self::PrimaryUserId(primary) => (25, vec![*primary as u8]),
            Self::KeyFlags(v) => (27, v.clone()),
            Self::SignerUserId(uid) => (28, uid.as_bytes().to_vec()),
            Self::ReasonForRevocation { code, reason } => {
                let mut data = vec![*code];
                data.extend_from_slice(reason.as_bytes());
                (29, data)
            }
            Self::EmbeddedSignature(sig) => (32, sig.to_bytes()),
            Self::IssuerFingerprint {
                version,
                fingerprint,
            } => {
                let mut data = vec![*version];
                data.extend_from_slice(fingerprint);
                (33, data)
            }
            Self::Unknown { tag, critical, data } => {
                (if *critical { tag | 0x80 } else { *tag }, data.clone())
            }
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let (tag, data) = self.tag_and_data();
        let len = data.len() + 1;
        if len < 192 {
            out.push(len as u8);
        } else if len < 16320 {
            let encoded = len - 192;
            out.push(192 + (encoded >> 8) as u8);
            out.push((encoded & 0xFF) as u8);
        } else {
            out.push(0xFF);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
        out.push(tag);
        out.extend_from_slice(&data);
    }
}

fn parse_subpackets(area: &[u8]) -> Result<Vec<Subpacket>> {
    let mut cursor = Cursor::new(area);
    let mut subpackets = Vec::new();
    while !cursor.is_empty() {
        let first = cursor.read_u8()?;
        let len = match first {
            0..=191 => first as usize,
            192..=254 => ((first as usize - 192) << 8) + cursor.read_u8()? as usize + 192,
            255 => cursor.read_u32()? as usize,
        };
        if len == 0 {
            return Err(PgpkitError::packet("empty signature subpacket"));
        }
        let body = cursor.read_bytes(len)?;
        let tag = body[0] & 0x7F;
        let critical = body[0] & 0x80 != 0;
        subpackets.push(Subpacket::parse(tag, critical, &body[1..])?);
    }
    Ok(subpackets)
}

fn encode_subpackets(subpackets: &[Subpacket]) -> Vec<u8> {
    let mut out = Vec::new();
    for subpacket in subpackets {
        subpacket.encode(&mut out);
    }
    out
}

/// What a certification or binding signature is computed over
#[derive(Debug, Clone, Copy)]
pub enum SignatureTarget<'a> {
    /// Direct-key signatures and key revocations
    Key(&'a PublicKeyPacket),
    /// Certification of a user ID on a primary key
    UserId(&'a PublicKeyPacket, &'a str),
    /// Subkey binding, primary key binding and subkey revocation
    Subkey(&'a PublicKeyPacket, &'a PublicKeyPacket),
}

/// Signature packet, version 3 or 4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePacket {
    version: u8,
    sig_type: SignatureType,
    algorithm: PublicKeyAlgorithm,
    hash: HashAlgorithm,
    /// Creation time of a v3 signature; v4 keeps it in the hashed area
    v3_created: u32,
    /// Issuer of a v3 signature
    v3_issuer: u64,
    hashed_area: Vec<u8>,
    unhashed_area: Vec<u8>,
    hashed: Vec<Subpacket>,
    unhashed: Vec<Subpacket>,
    left16: [u8; 2],
    mpis: Vec<Mpi>,
}

impl SignaturePacket {
    /// Unsigned version 4 template; sign it with [`SignaturePacket::sign`]
    pub fn new_v4(
        sig_type: SignatureType,
        signer: &PublicKeyPacket,
        hash: HashAlgorithm,
        hashed: Vec<Subpacket>,
    ) -> Self {
        let unhashed = vec![Subpacket::Issuer(signer.key_id())];
        Self {
            version: 4,
            sig_type,
            algorithm: signer.algorithm(),
            hash,
            v3_created: 0,
            v3_issuer: 0,
            hashed_area: encode_subpackets(&hashed),
            unhashed_area: encode_subpackets(&unhashed),
            hashed,
            unhashed,
            left16: [0; 2],
            mpis: Vec::new(),
        }
    }

    /// Unsigned legacy version 3 template, without any subpacket metadata
    pub fn new_v3(
        sig_type: SignatureType,
        signer: &PublicKeyPacket,
        hash: HashAlgorithm,
        created: u32,
    ) -> Self {
        Self {
            version: 3,
            sig_type,
            algorithm: signer.algorithm(),
            hash,
            v3_created: created,
            v3_issuer: signer.key_id(),
            hashed_area: Vec::new(),
            unhashed_area: Vec::new(),
            hashed: Vec::new(),
            unhashed: Vec::new(),
            left16: [0; 2],
            mpis: Vec::new(),
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let version = cursor.read_u8()?;
        let mut sig = match version {
            2 | 3 => {
                if cursor.read_u8()? != 5 {
                    return Err(PgpkitError::packet("invalid v3 signature hashed length"));
                }
                let sig_type = SignatureType::from_byte(cursor.read_u8()?);
                let created = cursor.read_u32()?;
                let issuer = cursor.read_u64()?;
                let algorithm = read_pk_algorithm(&mut cursor)?;
                let hash = HashAlgorithm::require(cursor.read_u8()?)?;
                Self {
                    version: 3,
                    sig_type,
                    algorithm,
                    hash,
                    v3_created: created,
                    v3_issuer: issuer,
                    hashed_area: Vec::new(),
                    unhashed_area: Vec::new(),
                    hashed: Vec::new(),
                    unhashed: Vec::new(),
                    left16: [0; 2],
                    mpis: Vec::new(),
                }
            }
            4 => {
                let sig_type = SignatureType::from_byte(cursor.read_u8()?);
                let algorithm = read_pk_algorithm(&mut cursor)?;
                let hash = HashAlgorithm::require(cursor.read_u8()?)?;
                let hashed_len = cursor.read_u16()? as usize;
                let hashed_area = cursor.read_bytes(hashed_len)?.to_vec();
                let unhashed_len = cursor.read_u16()? as usize;
                let unhashed_area = cursor.read_bytes(unhashed_len)?.to_vec();
                Self {
                    version: 4,
                    sig_type,
                    algorithm,
                    hash,
                    v3_created: 0,
                    v3_issuer: 0,
                    hashed: parse_subpackets(&hashed_area)?,
                    unhashed: parse_subpackets(&unhashed_area)?,
                    hashed_area,
                    unhashed_area,
                    left16: [0; 2],
                    mpis: Vec::new(),
                }
            }
            other => {
                return Err(PgpkitError::unsupported(format!(
                    "signature packet version {}",
                    other
                )))
            }
        };
        sig.left16 = cursor.read_array()?;
        let count = match sig.algorithm {
            PublicKeyAlgorithm::Dsa
            | PublicKeyAlgorithm::ElGamal
            | PublicKeyAlgorithm::ElGamalEncryptSign => 2,
            _ => 1,
        };
        for _ in 0..count {
            sig.mpis.push(cursor.read_mpi()?);
        }
        if !cursor.is_empty() {
            return Err(PgpkitError::packet("trailing data after signature"));
        }
        Ok(sig)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.version);
        if self.version == 3 {
            out.push(5);
            out.push(self.sig_type.to_byte());
            out.extend_from_slice(&self.v3_created.to_be_bytes());
            out.extend_from_slice(&self.v3_issuer.to_be_bytes());
            out.push(self.algorithm.to_byte());
            out.push(self.hash.to_byte());
        } else {
            out.push(self.sig_type.to_byte());
            out.push(self.algorithm.to_byte());
            out.push(self.hash.to_byte());
            out.extend_from_slice(&(self.hashed_area.len() as u16).to_be_bytes());
            out.extend_from_slice(&self.hashed_area);
            out.extend_from_slice(&(self.unhashed_area.len() as u16).to_be_bytes());
            out.extend_from_slice(&self.unhashed_area);
        }
        out.extend_from_slice(&self.left16);
        for mpi in &self.mpis {
            mpi.encode(&mut out);
        }
        out
    }

    /// Hasher for this signature's algorithm
    pub fn hasher(&self) -> Hasher {
        Hasher::new(self.hash)
    }

    /// Hasher already fed with the key material a certification covers
    pub fn target_hasher(&self, target: SignatureTarget<'_>) -> Hasher {
        let mut hasher = self.hasher();
        match target {
            SignatureTarget::Key(key) => key.hash_into(&mut hasher),
            SignatureTarget::UserId(key, user_id) => {
                key.hash_into(&mut hasher);
                if self.version == 4 {
                    hasher.update(&[0xB4]);
                    hasher.update(&(user_id.len() as u32).to_be_bytes());
                }
                hasher.update(user_id.as_bytes());
            }
            SignatureTarget::Subkey(primary, subkey) => {
                primary.hash_into(&mut hasher);
                subkey.hash_into(&mut hasher);
            }
        }
        hasher
    }

    /// Appends the signature's own trailer to a data hash
    pub fn hash_trailer(&self, hasher: &mut Hasher) {
        if self.version == 3 {
            hasher.update(&[self.sig_type.to_byte()]);
            hasher.update(&self.v3_created.to_be_bytes());
        } else {
            let header = [
                self.version,
                self.sig_type.to_byte(),
                self.algorithm.to_byte(),
                self.hash.to_byte(),
            ];
            hasher.update(&header);
            hasher.update(&(self.hashed_area.len() as u16).to_be_bytes());
            hasher.update(&self.hashed_area);
            let total = (header.len() + 2 + self.hashed_area.len()) as u32;
            hasher.update(&[0x04, 0xFF]);
            hasher.update(&total.to_be_bytes());
        }
    }

    /// Completes the signature over the data already fed to `hasher`
    pub fn sign(mut self, mut hasher: Hasher, key: &UnlockedKey) -> Result<Self> {
        if hasher.algorithm() != self.hash {
            return Err(PgpkitError::crypto("hasher does not match signature hash"));
        }
        self.hash_trailer(&mut hasher);
        let digest = hasher.finalize();
        self.left16 = [digest[0], digest[1]];
        self.mpis = key.sign(self.hash, &digest)?;
        Ok(self)
    }

    pub fn sign_target(self, target: SignatureTarget<'_>, key: &UnlockedKey) -> Result<Self> {
        let hasher = self.target_hasher(target);
        self.sign(hasher, key)
    }

    /// Checks the signature over the data already fed to `hasher`
    pub fn verify(&self, mut hasher: Hasher, signer: &PublicKeyPacket) -> Result<bool> {
        if self.has_unknown_critical() || hasher.algorithm() != self.hash {
            return Ok(false);
        }
        self.hash_trailer(&mut hasher);
        let digest = hasher.finalize();
        if digest[..2] != self.left16 {
            return Ok(false);
        }
        signer.verify(self.hash, &digest, &self.mpis)
    }

    pub fn verify_target(&self, target: SignatureTarget<'_>, signer: &PublicKeyPacket) -> Result<bool> {
        self.verify(self.target_hasher(target), signer)
    }

    fn has_unknown_critical(&self) -> bool {
        self.hashed
            .iter()
            .any(|sp| matches!(sp, Subpacket::Unknown { critical: true, .. }))
    }

    fn find<T>(&self, f: impl Fn(&Subpacket) -> Option<T>) -> Option<T> {
        self.hashed.iter().find_map(&f)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn sig_type(&self) -> SignatureType {
        self.sig_type
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    /// Creation time (0 when a v4 signature carries none)
    pub fn created(&self) -> u32 {
        if self.version == 3 {
            return self.v3_created;
        }
        self.find(|sp| match sp {
            Subpacket::SignatureCreationTime(t) => Some(*t),
            _ => None,
        })
        .unwrap_or(0)
    }

    /// Key ID of the issuer, from either subpacket area
    pub fn issuer(&self) -> Option<u64> {
        if self.version == 3 {
            return Some(self.v3_issuer);
        }
        self.hashed
            .iter()
            .chain(self.unhashed.iter())
            .find_map(|sp| match sp {
                Subpacket::Issuer(id) => Some(*id),
                Subpacket::IssuerFingerprint {
                    version: 4,
                    fingerprint,
                } if fingerprint.len() == 20 => {
                    let mut id = [0u8; 8];
                    id.copy_from_slice(&fingerprint[12..]);
                    Some(u64::from_be_bytes(id))
                }
                _ => None,
            })
    }

    pub fn key_flags(&self) -> Option<KeyUsage> {
        self.find(|sp| match sp {
            Subpacket::KeyFlags(flags) => Some(KeyUsage::from_flags(flags.first().copied().unwrap_or(0))),
            _ => None,
        })
    }

    /// Key validity period in seconds after key creation
    pub fn key_expiration(&self) -> Option<u32> {
        self.find(|sp| match sp {
            Subpacket::KeyExpirationTime(t) if *t > 0 => Some(*t),
            _ => None,
        })
    }

    /// Signature validity period in seconds after signature creation
    pub fn expiration(&self) -> Option<u32> {
        self.find(|sp| match sp {
            Subpacket::SignatureExpirationTime(t) if *t > 0 => Some(*t),
            _ => None,
        })
    }

    pub fn is_primary_user_id(&self) -> bool {
        self.find(|sp| match sp {
            Subpacket::PrimaryUserId(primary) => Some(*primary),
            _ => None,
        })
        .unwrap_or(false)
    }

    pub fn signer_user_id(&self) -> Option<&str> {
        self.hashed.iter().find_map(|sp| match sp {
            Subpacket::SignerUserId(uid) => Some(uid.as_str()),
            _ => None,
        })
    }

    pub fn preferred_symmetric(&self) -> Option<&[u8]> {
        self.hashed.iter().find_map(|sp| match sp {
            Subpacket::PreferredSymmetric(prefs) => Some(prefs.as_slice()),
            _ => None,
        })
    }

    pub fn embedded_signature(&self) -> Option<&SignaturePacket> {
        self.hashed
            .iter()
            .chain(self.unhashed.iter())
            .find_map(|sp| match sp {
                Subpacket::EmbeddedSignature(sig) => Some(sig.as_ref()),
                _ => None,
            })
    }

    pub fn hashed_subpackets(&self) -> &[Subpacket] {
        &self.hashed
    }
}

fn read_pk_algorithm(cursor: &mut Cursor<'_>) -> Result<PublicKeyAlgorithm> {
    let byte = cursor.read_u8()?;
    PublicKeyAlgorithm::from_byte(byte)
        .ok_or_else(|| PgpkitError::unsupported(format!("public key algorithm {}", byte)))
}

impl fmt::Display for SignaturePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signature(v{}, type 0x{:02X}, {}/{}, issuer {:016X})",
            self.version,
            self.sig_type.to_byte(),
            self.algorithm,
            self.hash,
            self.issuer().unwrap_or(0)
        )
    }
}

/// One-pass signature packet, always version 3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnePassSignature {
    pub sig_type: SignatureType,
    pub hash: HashAlgorithm,
    pub algorithm: PublicKeyAlgorithm,
    pub key_id: u64,
    /// False when another one-pass signature follows for the same data
    pub last: bool,
}

impl OnePassSignature {
    /// One-pass header matching an unsigned signature template
    pub fn for_signature(sig: &SignaturePacket, key_id: u64) -> Self {
        Self {
            sig_type: sig.sig_type(),
            hash: sig.hash_algorithm(),
            algorithm: sig.algorithm(),
            key_id,
            last: true,
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let version = cursor.read_u8()?;
        if version != 3 {
            return Err(PgpkitError::unsupported(format!(
                "one-pass signature version {}",
                version
            )));
        }
        let sig_type = SignatureType::from_byte(cursor.read_u8()?);
        let hash = HashAlgorithm::require(cursor.read_u8()?)?;
        let algorithm = read_pk_algorithm(&mut cursor)?;
        let key_id = cursor.read_u64()?;
        let last = cursor.read_u8()? != 0;
        Ok(Self {
            sig_type,
            hash,
            algorithm,
            key_id,
            last,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            3,
            self.sig_type.to_byte(),
            self.hash.to_byte(),
            self.algorithm.to_byte(),
        ];
        out.extend_from_slice(&self.key_id.to_be_bytes());
        out.push(self.last as u8);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::key::generate;
    use rand::rngs::OsRng;
    use std::sync::OnceLock;

    fn test_key() -> &'static UnlockedKey {
        static KEY: OnceLock<UnlockedKey> = OnceLock::new();
        KEY.get_or_init(|| generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024, 1_700_000_000).unwrap())
    }

    #[test]
    fn test_v4_data_signature() {
        let key = test_key();
        let template = SignaturePacket::new_v4(
            SignatureType::Binary,
            key.public(),
            HashAlgorithm::Sha256,
            vec![Subpacket::SignatureCreationTime(1_700_000_100)],
        );
        let mut hasher = template.hasher();
        hasher.update(b"payload");
        let sig = template.sign(hasher, key).unwrap();

        let parsed = SignaturePacket::parse(&sig.to_bytes()).unwrap();
        assert_eq!(parsed, sig);
        assert_eq!(parsed.issuer(), Some(key.key_id()));
        assert_eq!(parsed.created(), 1_700_000_100);

        let mut good = parsed.hasher();
        good.update(b"payload");
        assert!(parsed.verify(good, key.public()).unwrap());

        let mut bad = parsed.hasher();
        bad.update(b"paylaod");
        assert!(!parsed.verify(bad, key.public()).unwrap());
    }

    #[test]
    fn test_v3_signature() {
        let key = test_key();
        let template =
            SignaturePacket::new_v3(SignatureType::Text, key.public(), HashAlgorithm::Sha1, 42);
        let mut hasher = template.hasher();
        hasher.update(b"text\r\n");
        let sig = template.sign(hasher, key).unwrap();
        assert!(sig.hashed_subpackets().is_empty());

        let parsed = SignaturePacket::parse(&sig.to_bytes()).unwrap();
        assert_eq!(parsed.version(), 3);
        assert_eq!(parsed.created(), 42);
        assert_eq!(parsed.issuer(), Some(key.key_id()));
        let mut hasher = parsed.hasher();
        hasher.update(b"text\r\n");
        assert!(parsed.verify(hasher, key.public()).unwrap());
    }

    #[test]
    fn test_user_id_certification() {
        let key = test_key();
        let template = SignaturePacket::new_v4(
            SignatureType::PositiveCertification,
            key.public(),
            HashAlgorithm::Sha256,
            vec![
                Subpacket::SignatureCreationTime(1_700_000_000),
                Subpacket::KeyFlags(vec![0x03]),
                Subpacket::PrimaryUserId(true),
            ],
        );
        let target = SignatureTarget::UserId(key.public(), "Alice <alice@example.com>");
        let sig = template.sign_target(target, key).unwrap();
        assert!(sig.verify_target(target, key.public()).unwrap());
        assert!(!sig
            .verify_target(SignatureTarget::UserId(key.public(), "Mallory"), key.public())
            .unwrap());
        assert_eq!(sig.key_flags(), Some(KeyUsage::certify_sign()));
        assert!(sig.is_primary_user_id());
    }

    #[test]
    fn test_unknown_critical_subpacket_fails_verification() {
        let key = test_key();
        let template = SignaturePacket::new_v4(
            SignatureType::Binary,
            key.public(),
            HashAlgorithm::Sha256,
            vec![Subpacket::Unknown {
                tag: 99,
                critical: true,
                data: vec![1],
            }],
        );
        let sig = template.sign(Hasher::new(HashAlgorithm::Sha256), key).unwrap();
        assert!(!sig.verify(Hasher::new(HashAlgorithm::Sha256), key.public()).unwrap());
    }

    #[test]
    fn test_one_pass_round_trip() {
        let ops = OnePassSignature {
            sig_type: SignatureType::Binary,
            hash: HashAlgorithm::Sha256,
            algorithm: PublicKeyAlgorithm::Rsa,
            key_id: 0x0123_4567_89AB_CDEF,
            last: true,
        };
        let bytes = ops.to_bytes();
        assert_eq!(bytes.len(), 13);
        assert_eq!(OnePassSignature::parse(&bytes).unwrap(), ops);
    }
}
