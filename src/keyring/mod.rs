//! Key rings and key introspection.
//!
//! A key ring is a master key followed by its user IDs and subkeys, each with
//! the signatures that bind them. Usage flags, expiry and revocation are not
//! stored; they are derived on demand from the newest self-signature that
//! actually verifies.

use std::fmt;
use std::io::Read;
use tracing::debug;

use crate::armor::ArmorType;
use crate::crypto::{KeyUsage, Passphrase, PublicKeyAlgorithm};
use crate::error::{PgpkitError, Result};
use crate::packet::signature::SignatureTarget;
use crate::packet::{
    encode_packet, read_packet, timestamp_now, PacketType, PublicKeyPacket, RawPacket,
    SecretKeyPacket, SignaturePacket, SignatureType, UnlockedKey,
};
use crate::validation::Validator;

pub mod builder;

pub use builder::{
    build_secret_key, certify_user_id, change_passphrase, create_key, revoke_key, KeySpec,
};

/// Public or secret flavor of a key ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRingKind {
    Public,
    Secret,
}

impl KeyRingKind {
    /// Packet tag a ring of this kind starts with
    pub fn primary_tag(self) -> PacketType {
        match self {
            Self::Public => PacketType::PublicKey,
            Self::Secret => PacketType::SecretKey,
        }
    }

    /// Armor block type used when exporting this kind
    pub fn armor_type(self) -> ArmorType {
        match self {
            Self::Public => ArmorType::PublicKey,
            Self::Secret => ArmorType::PrivateKey,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Secret => "secret",
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match PacketType::from_byte(tag)? {
            PacketType::PublicKey => Some(Self::Public),
            PacketType::SecretKey => Some(Self::Secret),
            _ => None,
        }
    }
}

impl fmt::Display for KeyRingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key packet types a ring can be made of
pub trait KeyPacket: Clone + fmt::Debug {
    const KIND: KeyRingKind;
    const SUBKEY_TAG: PacketType;

    fn parse(body: &[u8]) -> Result<Self>;
    fn to_bytes(&self) -> Vec<u8>;
    fn public(&self) -> &PublicKeyPacket;

    /// False when the packet is a stub without usable key material
    fn is_available(&self) -> bool {
        true
    }
}

impl KeyPacket for PublicKeyPacket {
    const KIND: KeyRingKind = KeyRingKind::Public;
    const SUBKEY_TAG: PacketType = PacketType::PublicSubkey;

    fn parse(body: &[u8]) -> Result<Self> {
        PublicKeyPacket::parse(body)
    }

    fn to_bytes(&self) -> Vec<u8> {
        PublicKeyPacket::to_bytes(self)
    }

    fn public(&self) -> &PublicKeyPacket {
        self
    }
}

impl KeyPacket for SecretKeyPacket {
    const KIND: KeyRingKind = KeyRingKind::Secret;
    const SUBKEY_TAG: PacketType = PacketType::SecretSubkey;

    fn parse(body: &[u8]) -> Result<Self> {
        SecretKeyPacket::parse(body)
    }

    fn to_bytes(&self) -> Vec<u8> {
        SecretKeyPacket::to_bytes(self)
    }

    fn public(&self) -> &PublicKeyPacket {
        SecretKeyPacket::public(self)
    }

    fn is_available(&self) -> bool {
        !self.is_dummy()
    }
}

/// A user ID and the certifications over it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBinding {
    pub user_id: String,
    pub signatures: Vec<SignaturePacket>,
}

/// A subkey and its binding and revocation signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubkeyBinding<K> {
    pub key: K,
    pub signatures: Vec<SignaturePacket>,
}

/// Ordered key ring: the master key first, then its subkeys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRing<K> {
    primary: K,
    direct: Vec<SignaturePacket>,
    users: Vec<UserBinding>,
    subkeys: Vec<SubkeyBinding<K>>,
}

/// Key ring carrying public keys only
pub type PublicKeyRing = KeyRing<PublicKeyPacket>;
/// Key ring carrying (possibly protected) secret keys
pub type SecretKeyRing = KeyRing<SecretKeyPacket>;

/// One key of a ring, seen through its newest valid self-signature
#[derive(Debug, Clone, Copy)]
pub struct KeyMaterial<'a> {
    key: &'a PublicKeyPacket,
    is_master: bool,
    binding: Option<&'a SignaturePacket>,
    bound: bool,
    revoked: bool,
}

impl<'a> KeyMaterial<'a> {
    /// Underlying public key packet
    pub fn packet(&self) -> &'a PublicKeyPacket {
        self.key
    }

    /// 64-bit key ID
    pub fn key_id(&self) -> u64 {
        self.key.key_id()
    }

    /// V4 SHA-1 fingerprint, or the MD5 fingerprint of a version 3 key
    pub fn fingerprint(&self) -> &'a [u8] {
        self.key.fingerprint()
    }

    /// Public-key algorithm
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.key.algorithm()
    }

    /// Modulus or prime size in bits
    pub fn bit_strength(&self) -> usize {
        self.key.bit_strength()
    }

    /// Creation time in seconds since the Unix epoch
    pub fn created(&self) -> u32 {
        self.key.created()
    }

    /// Whether this is the ring's master key
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// Expiry timestamp, if the key expires at all
    pub fn expiry(&self) -> Option<u32> {
        if self.key.version() < 4 {
            let days = self.key.validity_days();
            return (days > 0).then(|| {
                self.created()
                    .saturating_add(u32::from(days).saturating_mul(86_400))
            });
        }
        self.binding
            .and_then(|sig| sig.key_expiration())
            .map(|secs| self.created().saturating_add(secs))
    }

    /// Whether the key had expired at `now` (seconds since the epoch)
    pub fn is_expired_at(&self, now: u32) -> bool {
        self.expiry().is_some_and(|expiry| expiry <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(timestamp_now())
    }

    /// Whether a valid revocation signature covers this key
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Capabilities from the key flags of the binding signature.
    ///
    /// Falls back to what the algorithm can do when no key flags were set.
    /// A subkey without a valid binding has no capabilities.
    pub fn usage(&self) -> KeyUsage {
        if !self.is_master && !self.bound {
            return KeyUsage::none();
        }
        let mut usage = self
            .binding
            .and_then(|sig| sig.key_flags())
            .unwrap_or_else(|| self.algorithm().implied_usage())
            .restricted_to(self.algorithm());
        if self.is_master {
            usage.certify = true;
        }
        usage
    }

    fn is_valid(&self) -> bool {
        !self.revoked && !self.is_expired()
    }

    /// Not revoked, not expired and flagged for signing
    pub fn can_sign(&self) -> bool {
        self.is_valid() && self.usage().sign
    }

    /// Not revoked, not expired and flagged for encryption
    pub fn can_encrypt(&self) -> bool {
        self.is_valid() && self.usage().encrypt
    }
}

fn newest<'a>(sigs: impl Iterator<Item = &'a SignaturePacket>) -> Option<&'a SignaturePacket> {
    sigs.max_by_key(|sig| sig.created())
}

fn verifies(sig: &SignaturePacket, target: SignatureTarget<'_>, signer: &PublicKeyPacket) -> bool {
    sig.issuer().map_or(true, |id| id == signer.key_id())
        && sig.verify_target(target, signer).unwrap_or(false)
}

impl<K: KeyPacket> KeyRing<K> {
    /// Ring holding only `primary`; users and subkeys are added by the builder
    pub fn new(primary: K) -> Self {
        Self {
            primary,
            direct: Vec::new(),
            users: Vec::new(),
            subkeys: Vec::new(),
        }
    }

    /// Builds a ring from its packets; the first one must be the master key
    pub fn from_packets(packets: &[RawPacket]) -> Result<Self> {
        enum Slot {
            Direct,
            User,
            Subkey,
            Skip,
        }

        let (first, rest) = packets
            .split_first()
            .ok_or_else(|| PgpkitError::packet("empty key ring"))?;
        if first.packet_type() != Some(K::KIND.primary_tag()) {
            return Err(PgpkitError::packet(format!(
                "{} key ring must start with a {:?} packet",
                K::KIND,
                K::KIND.primary_tag()
            )));
        }
        let mut ring = Self::new(K::parse(&first.body)?);
        let mut slot = Slot::Direct;

        for packet in rest {
            match packet.packet_type() {
                Some(PacketType::Signature) => {
                    let sig = match SignaturePacket::parse(&packet.body) {
                        Ok(sig) => sig,
                        Err(e) => {
                            debug!(error = %e, "Skipping unparsable signature");
                            continue;
                        }
                    };
                    match slot {
                        Slot::Direct => ring.direct.push(sig),
                        Slot::User => {
                            if let Some(user) = ring.users.last_mut() {
                                user.signatures.push(sig);
                            }
                        }
                        Slot::Subkey => {
                            if let Some(subkey) = ring.subkeys.last_mut() {
                                subkey.signatures.push(sig);
                            }
                        }
                        Slot::Skip => {}
                    }
                }
                Some(PacketType::UserId) => {
                    let user_id = String::from_utf8_lossy(&packet.body).into_owned();
                    Validator::validate_user_id(&user_id)?;
                    ring.users.push(UserBinding {
                        user_id,
                        signatures: Vec::new(),
                    });
                    slot = Slot::User;
                }
                Some(tag) if tag == K::SUBKEY_TAG => match K::parse(&packet.body) {
                    Ok(key) => {
                        ring.subkeys.push(SubkeyBinding {
                            key,
                            signatures: Vec::new(),
                        });
                        Validator::validate_keyring_size(ring.subkeys.len() + 1)?;
                        slot = Slot::Subkey;
                    }
                    Err(e) => {
                        debug!(error = %e, "Skipping unsupported subkey");
                        slot = Slot::Skip;
                    }
                },
                Some(PacketType::UserAttribute) => slot = Slot::Skip,
                Some(PacketType::Trust) | Some(PacketType::Marker) => {}
                _ => {
                    return Err(PgpkitError::packet(format!(
                        "unexpected packet tag {} in key ring",
                        packet.tag
                    )))
                }
            }
        }
        Ok(ring)
    }

    /// Parses the first ring of this kind from binary data
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = KeyRingReader::new(data);
        while let Some((kind, packets)) = reader.next_ring()? {
            if kind == K::KIND {
                return Self::from_packets(&packets);
            }
        }
        Err(PgpkitError::invalid_data(format!("no {} key ring found", K::KIND)))
    }

    /// Binary packets of the whole ring, signatures included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = encode_packet(K::KIND.primary_tag(), &self.primary.to_bytes());
        let write_sigs = |out: &mut Vec<u8>, sigs: &[SignaturePacket]| {
            for sig in sigs {
                out.extend_from_slice(&encode_packet(PacketType::Signature, &sig.to_bytes()));
            }
        };
        write_sigs(&mut out, &self.direct);
        for user in &self.users {
            out.extend_from_slice(&encode_packet(PacketType::UserId, user.user_id.as_bytes()));
            write_sigs(&mut out, &user.signatures);
        }
        for subkey in &self.subkeys {
            out.extend_from_slice(&encode_packet(K::SUBKEY_TAG, &subkey.key.to_bytes()));
            write_sigs(&mut out, &subkey.signatures);
        }
        out
    }

    /// The master key packet
    pub fn primary(&self) -> &K {
        &self.primary
    }

    /// Key ID of the master key, which identifies the ring in the store
    pub fn master_key_id(&self) -> u64 {
        self.primary.public().key_id()
    }

    /// Fingerprint of the master key
    pub fn fingerprint(&self) -> &[u8] {
        self.primary.public().fingerprint()
    }

    /// User IDs with their certifications, in ring order
    pub fn users(&self) -> &[UserBinding] {
        &self.users
    }

    /// The user ID strings alone, in ring order
    pub fn user_ids(&self) -> Vec<&str> {
        self.users.iter().map(|u| u.user_id.as_str()).collect()
    }

    /// The rank-0 user ID
    pub fn main_user_id(&self) -> Option<&str> {
        self.users.first().map(|u| u.user_id.as_str())
    }

    /// Subkeys with their binding and revocation signatures
    pub fn subkeys(&self) -> &[SubkeyBinding<K>] {
        &self.subkeys
    }

    /// Signatures made directly over the master key
    pub fn direct_signatures(&self) -> &[SignaturePacket] {
        &self.direct
    }

    /// Key IDs of all members, master first
    pub fn key_ids(&self) -> Vec<u64> {
        std::iter::once(self.master_key_id())
            .chain(self.subkeys.iter().map(|s| s.key.public().key_id()))
            .collect()
    }

    /// Whether `key_id` is the master or one of the subkeys
    pub fn contains_key(&self, key_id: u64) -> bool {
        self.key_packet(key_id).is_some()
    }

    /// Packet of the member with `key_id`
    pub fn key_packet(&self, key_id: u64) -> Option<&K> {
        if self.master_key_id() == key_id {
            return Some(&self.primary);
        }
        self.subkeys
            .iter()
            .find(|s| s.key.public().key_id() == key_id)
            .map(|s| &s.key)
    }

    fn master_material(&self) -> KeyMaterial<'_> {
        let master = self.primary.public();
        let revoked = self.direct.iter().any(|sig| {
            sig.sig_type() == SignatureType::KeyRevocation
                && verifies(sig, SignatureTarget::Key(master), master)
        });
        let direct = self.direct.iter().filter(|sig| {
            sig.sig_type() == SignatureType::DirectKey
                && verifies(sig, SignatureTarget::Key(master), master)
        });
        let certifications = self.users.iter().flat_map(|user| {
            user.signatures.iter().filter(move |sig| {
                sig.sig_type().is_certification()
                    && verifies(sig, SignatureTarget::UserId(master, &user.user_id), master)
            })
        });
        let binding = newest(direct.chain(certifications));
        KeyMaterial {
            key: master,
            is_master: true,
            binding,
            bound: binding.is_some(),
            revoked,
        }
    }

    fn subkey_material<'a>(&'a self, subkey: &'a SubkeyBinding<K>) -> KeyMaterial<'a> {
        let master = self.primary.public();
        let key = subkey.key.public();
        let target = SignatureTarget::Subkey(master, key);
        let binding = newest(subkey.signatures.iter().filter(|sig| {
            sig.sig_type() == SignatureType::SubkeyBinding && verifies(sig, target, master)
        }));
        let revoked = subkey.signatures.iter().any(|sig| {
            sig.sig_type() == SignatureType::SubkeyRevocation && verifies(sig, target, master)
        });
        KeyMaterial {
            key,
            is_master: false,
            binding,
            bound: binding.is_some(),
            revoked,
        }
    }

    /// All member keys, master first
    pub fn keys(&self) -> Vec<KeyMaterial<'_>> {
        std::iter::once(self.master_material())
            .chain(self.subkeys.iter().map(|s| self.subkey_material(s)))
            .collect()
    }

    /// Member with `key_id` as a [`KeyMaterial`] view
    pub fn key(&self, key_id: u64) -> Option<KeyMaterial<'_>> {
        if self.master_key_id() == key_id {
            return Some(self.master_material());
        }
        self.subkeys
            .iter()
            .find(|s| s.key.public().key_id() == key_id)
            .map(|s| self.subkey_material(s))
    }

    /// The master key as a [`KeyMaterial`] view
    pub fn master(&self) -> KeyMaterial<'_> {
        self.master_material()
    }

    /// Preferred signing key: a usable subkey, else the master key
    pub fn signing_key_id(&self) -> Option<u64> {
        let keys = self.keys();
        let usable = |k: &&KeyMaterial<'_>| {
            k.can_sign()
                && self
                    .key_packet(k.key_id())
                    .is_some_and(KeyPacket::is_available)
        };
        keys.iter()
            .filter(|k| !k.is_master())
            .find(usable)
            .or_else(|| keys.iter().find(|k| k.is_master()).filter(usable))
            .map(|k| k.key_id())
    }

    /// Preferred encryption key: the newest usable subkey, else the master key
    pub fn encryption_key_id(&self) -> Option<u64> {
        let keys = self.keys();
        keys.iter()
            .filter(|k| !k.is_master() && k.can_encrypt())
            .max_by_key(|k| k.created())
            .or_else(|| keys.iter().find(|k| k.is_master() && k.can_encrypt()))
            .map(|k| k.key_id())
    }

    /// Unions another copy of the same ring into this one.
    ///
    /// Returns whether anything changed.
    pub fn merge(&mut self, other: &Self) -> Result<bool> {
        if other.master_key_id() != self.master_key_id() {
            return Err(PgpkitError::invalid_input(format!(
                "cannot merge key ring {:016X} into {:016X}",
                other.master_key_id(),
                self.master_key_id()
            )));
        }
        let mut changed = false;
        if !self.primary.is_available() && other.primary.is_available() {
            self.primary = other.primary.clone();
            changed = true;
        }
        changed |= merge_signatures(&mut self.direct, &other.direct);

        for user in &other.users {
            match self.users.iter_mut().find(|u| u.user_id == user.user_id) {
                Some(existing) => changed |= merge_signatures(&mut existing.signatures, &user.signatures),
                None => {
                    self.users.push(user.clone());
                    changed = true;
                }
            }
        }

        for subkey in &other.subkeys {
            let id = subkey.key.public().key_id();
            match self.subkeys.iter_mut().find(|s| s.key.public().key_id() == id) {
                Some(existing) => {
                    if !existing.key.is_available() && subkey.key.is_available() {
                        existing.key = subkey.key.clone();
                        changed = true;
                    }
                    changed |= merge_signatures(&mut existing.signatures, &subkey.signatures);
                }
                None => {
                    self.subkeys.push(subkey.clone());
                    changed = true;
                }
            }
        }
        Validator::validate_keyring_size(self.subkeys.len() + 1)?;
        Ok(changed)
    }

    pub(crate) fn add_user(&mut self, user: UserBinding) {
        self.users.push(user);
    }

    pub(crate) fn add_subkey(&mut self, subkey: SubkeyBinding<K>) {
        self.subkeys.push(subkey);
    }

    pub(crate) fn add_direct_signature(&mut self, sig: SignaturePacket) {
        self.direct.push(sig);
    }
}

fn merge_signatures(into: &mut Vec<SignaturePacket>, from: &[SignaturePacket]) -> bool {
    let mut changed = false;
    for sig in from {
        if !into.contains(sig) {
            into.push(sig.clone());
            changed = true;
        }
    }
    changed
}

impl SecretKeyRing {
    /// The public ring with the same members, user IDs and signatures
    pub fn to_public(&self) -> PublicKeyRing {
        KeyRing {
            primary: self.primary.public().clone(),
            direct: self.direct.clone(),
            users: self.users.clone(),
            subkeys: self
                .subkeys
                .iter()
                .map(|s| SubkeyBinding {
                    key: s.key.public().clone(),
                    signatures: s.signatures.clone(),
                })
                .collect(),
        }
    }

    /// Recovers the secret material of one member key
    pub fn unlock_key(&self, key_id: u64, passphrase: &Passphrase) -> Result<UnlockedKey> {
        self.key_packet(key_id)
            .ok_or(PgpkitError::CouldNotExtractPrivateKey)?
            .unlock(passphrase)
    }

    /// True when any member's secret material is passphrase protected
    pub fn is_protected(&self) -> bool {
        self.primary.is_protected() || self.subkeys.iter().any(|s| s.key.is_protected())
    }
}

impl<K: KeyPacket> fmt::Display for KeyRing<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyRing({}, ID: {:016X}, {} user IDs, {} subkeys)",
            K::KIND,
            self.master_key_id(),
            self.users.len(),
            self.subkeys.len()
        )
    }
}

/// Splits a packet stream into the packets of consecutive key rings
pub struct KeyRingReader<R> {
    inner: R,
    pending: Option<RawPacket>,
    /// Read failure after a complete ring, reported by the following call
    deferred: Option<PgpkitError>,
}

impl<R: Read> KeyRingReader<R> {
    /// Reader over binary key ring packets; armor must be removed first
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: None,
            deferred: None,
        }
    }

    fn next_packet(&mut self) -> Result<Option<RawPacket>> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        match self.pending.take() {
            Some(packet) => Ok(Some(packet)),
            None => read_packet(&mut self.inner),
        }
    }

    /// Packets of the next ring; packets before the first master key are skipped
    pub fn next_ring(&mut self) -> Result<Option<(KeyRingKind, Vec<RawPacket>)>> {
        let (kind, first) = loop {
            let packet = match self.next_packet()? {
                Some(packet) => packet,
                None => return Ok(None),
            };
            if let Some(kind) = KeyRingKind::from_tag(packet.tag) {
                break (kind, packet);
            }
            debug!(tag = packet.tag, "Skipping packet outside of a key ring");
        };

        let mut packets = vec![first];
        loop {
            match self.next_packet() {
                Ok(Some(packet)) if KeyRingKind::from_tag(packet.tag).is_some() => {
                    self.pending = Some(packet);
                    break;
                }
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => break,
                Err(e) => {
                    self.deferred = Some(e);
                    break;
                }
            }
        }
        Ok(Some((kind, packets)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{HashAlgorithm, ProtectionParams};
    use crate::packet::key::generate;
    use crate::packet::Subpacket;
    use rand::rngs::OsRng;

    fn certified_ring(flags: Option<u8>, expiry: Option<u32>) -> (PublicKeyRing, UnlockedKey) {
        let key = generate(&mut OsRng, PublicKeyAlgorithm::Rsa, 1024, 1_600_000_000).unwrap();
        let mut hashed = vec![Subpacket::SignatureCreationTime(1_600_000_000)];
        if let Some(flags) = flags {
            hashed.push(Subpacket::KeyFlags(vec![flags]));
        }
        if let Some(expiry) = expiry {
            hashed.push(Subpacket::KeyExpirationTime(expiry));
        }
        let sig = SignaturePacket::new_v4(
            SignatureType::PositiveCertification,
            key.public(),
            HashAlgorithm::Sha256,
            hashed,
        )
        .sign_target(SignatureTarget::UserId(key.public(), "Test <t@example.com>"), &key)
        .unwrap();
        let mut ring = KeyRing::new(key.public().clone());
        ring.add_user(UserBinding {
            user_id: "Test <t@example.com>".to_string(),
            signatures: vec![sig],
        });
        (ring, key)
    }

    #[test]
    fn test_usage_from_key_flags() {
        let (ring, _) = certified_ring(Some(0x02), None);
        let usage = ring.master().usage();
        assert!(usage.certify, "master always certifies");
        assert!(usage.sign);
        assert!(!usage.encrypt);
        assert_eq!(ring.signing_key_id(), Some(ring.master_key_id()));
        assert_eq!(ring.encryption_key_id(), None);
    }

    #[test]
    fn test_usage_falls_back_to_algorithm() {
        let (ring, _) = certified_ring(None, None);
        let usage = ring.master().usage();
        assert!(usage.sign && usage.encrypt && usage.certify);
    }

    #[test]
    fn test_expiry_from_self_signature() {
        let (ring, _) = certified_ring(None, Some(86_400));
        let master = ring.master();
        assert_eq!(master.expiry(), Some(1_600_086_400));
        assert!(master.is_expired());
        assert!(!master.can_sign());
    }

    #[test]
    fn test_tampered_certification_is_ignored() {
        let (mut ring, _) = certified_ring(Some(0x02), None);
        ring.users[0].user_id = "Mallory".to_string();
        // No valid self-signature left: flags fall back to the algorithm
        assert!(ring.master().usage().encrypt);
    }

    #[test]
    fn test_round_trip_and_reader() {
        let (ring, _) = certified_ring(Some(0x03), None);
        let mut data = ring.to_bytes();
        data.extend_from_slice(&ring.to_bytes());
        let mut reader = KeyRingReader::new(&data[..]);
        let (kind, packets) = reader.next_ring().unwrap().unwrap();
        assert_eq!(kind, KeyRingKind::Public);
        assert_eq!(PublicKeyRing::from_packets(&packets).unwrap(), ring);
        assert!(reader.next_ring().unwrap().is_some());
        assert!(reader.next_ring().unwrap().is_none());
    }

    #[test]
    fn test_merge_unions_signatures() {
        let (ring, key) = certified_ring(Some(0x03), None);
        let mut other = ring.clone();
        let extra = SignaturePacket::new_v4(
            SignatureType::CasualCertification,
            key.public(),
            HashAlgorithm::Sha256,
            vec![Subpacket::SignatureCreationTime(1_600_000_500)],
        )
        .sign_target(SignatureTarget::UserId(key.public(), "Second"), &key)
        .unwrap();
        other.add_user(UserBinding {
            user_id: "Second".to_string(),
            signatures: vec![extra],
        });

        let mut merged = ring.clone();
        assert!(merged.merge(&other).unwrap());
        assert_eq!(merged.user_ids(), vec!["Test <t@example.com>", "Second"]);
        assert!(!merged.merge(&other).unwrap());
    }

    #[test]
    fn test_secret_ring_to_public() {
        let (public, key) = certified_ring(Some(0x03), None);
        let protection = ProtectionParams {
            count: 0x10,
            ..ProtectionParams::default()
        };
        let secret_key = SecretKeyPacket::new(
            &mut OsRng,
            key.public().clone(),
            key.secret(),
            &Passphrase::from("pw"),
            &protection,
        )
        .unwrap();
        let mut secret = SecretKeyRing::new(secret_key);
        secret.users = public.users.clone();
        assert_eq!(secret.to_public(), public);
        assert!(secret.is_protected());
        assert!(secret.unlock_key(secret.master_key_id(), &Passphrase::from("pw")).is_ok());
        assert!(matches!(
            secret.unlock_key(42, &Passphrase::from("pw")),
            Err(PgpkitError::CouldNotExtractPrivateKey)
        ));
    }
}
