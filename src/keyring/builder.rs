//! Construction and editing of secret key rings.

use rand::rngs::OsRng;
use tracing::{debug, info};

use super::{KeyRing, PublicKeyRing, SecretKeyRing, SubkeyBinding, UserBinding};
use crate::config::EngineConfig;
use crate::crypto::{
    KeyUsage, Passphrase, PublicKeyAlgorithm, PREFERRED_COMPRESSION, PREFERRED_HASH,
    PREFERRED_SYMMETRIC,
};
use crate::error::{PgpkitError, Result};
use crate::packet::key::generate;
use crate::packet::signature::SignatureTarget;
use crate::packet::{
    timestamp_now, SecretKeyPacket, SignaturePacket, SignatureType, Subpacket, UnlockedKey,
};
use crate::validation::Validator;

/// One member key handed to [`build_secret_key`]
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub key: SecretKeyPacket,
    pub usage: KeyUsage,
    /// Validity period in days from key creation; `None` never expires
    pub expiry_days: Option<u32>,
}

fn expiry_subpacket(expiry_days: Option<u32>, hashed: &mut Vec<Subpacket>) {
    if let Some(days) = expiry_days.filter(|d| *d > 0) {
        hashed.push(Subpacket::KeyExpirationTime(days.saturating_mul(86_400)));
    }
}

fn self_certification(
    config: &EngineConfig,
    master: &UnlockedKey,
    user_id: &str,
    flags: u8,
    expiry_days: Option<u32>,
    primary: bool,
    created: u32,
) -> Result<SignaturePacket> {
    let mut hashed = vec![
        Subpacket::SignatureCreationTime(created),
        Subpacket::KeyFlags(vec![flags]),
    ];
    expiry_subpacket(expiry_days, &mut hashed);
    hashed.push(Subpacket::PreferredSymmetric(
        PREFERRED_SYMMETRIC.iter().map(|a| a.to_byte()).collect(),
    ));
    hashed.push(Subpacket::PreferredHash(
        PREFERRED_HASH.iter().map(|a| a.to_byte()).collect(),
    ));
    hashed.push(Subpacket::PreferredCompression(
        PREFERRED_COMPRESSION.iter().map(|a| a.to_byte()).collect(),
    ));
    if primary {
        hashed.push(Subpacket::PrimaryUserId(true));
    }
    SignaturePacket::new_v4(
        SignatureType::PositiveCertification,
        master.public(),
        config.hash_algorithm,
        hashed,
    )
    .sign_target(SignatureTarget::UserId(master.public(), user_id), master)
}

/// Subkey binding signature, with a primary key binding embedded for signing subkeys
fn subkey_binding(
    config: &EngineConfig,
    master: &UnlockedKey,
    subkey: &UnlockedKey,
    usage: KeyUsage,
    expiry_days: Option<u32>,
    created: u32,
) -> Result<SignaturePacket> {
    let target = SignatureTarget::Subkey(master.public(), subkey.public());
    let mut hashed = vec![
        Subpacket::SignatureCreationTime(created),
        Subpacket::KeyFlags(vec![usage.to_flags()]),
    ];
    expiry_subpacket(expiry_days, &mut hashed);
    if usage.sign {
        let back = SignaturePacket::new_v4(
            SignatureType::PrimaryKeyBinding,
            subkey.public(),
            config.hash_algorithm,
            vec![Subpacket::SignatureCreationTime(created)],
        )
        .sign_target(target, subkey)?;
        hashed.push(Subpacket::EmbeddedSignature(Box::new(back)));
    }
    SignaturePacket::new_v4(
        SignatureType::SubkeyBinding,
        master.public(),
        config.hash_algorithm,
        hashed,
    )
    .sign_target(target, master)
}

fn wrap(config: &EngineConfig, key: &UnlockedKey, passphrase: &Passphrase) -> Result<SecretKeyPacket> {
    SecretKeyPacket::new(
        &mut OsRng,
        key.public().clone(),
        key.secret(),
        passphrase,
        &config.protection,
    )
}

/// Generates a new key ring, or a new subkey under an existing master key.
///
/// Without a master the result is a self-certified master key carrying one
/// empty placeholder user ID. With a master the result is the master ring
/// plus the new subkey.
pub fn create_key(
    config: &EngineConfig,
    algorithm: PublicKeyAlgorithm,
    bit_strength: usize,
    passphrase: &Passphrase,
    master: Option<(&SecretKeyRing, &Passphrase)>,
) -> Result<SecretKeyRing> {
    if !matches!(
        algorithm,
        PublicKeyAlgorithm::Rsa | PublicKeyAlgorithm::Dsa | PublicKeyAlgorithm::ElGamal
    ) {
        return Err(PgpkitError::UnknownAlgorithmChoice);
    }
    Validator::validate_key_bits(bit_strength)?;
    if master.is_none() && algorithm == PublicKeyAlgorithm::ElGamal {
        return Err(PgpkitError::MasterKeyMustNotBeElGamal);
    }

    let created = timestamp_now();
    let key = generate(&mut OsRng, algorithm, bit_strength, created)?;
    info!(
        key_id = format!("{:016X}", key.key_id()),
        algorithm = %algorithm,
        bits = bit_strength,
        subkey = master.is_some(),
        "Generated key"
    );

    match master {
        None => {
            let flags = KeyUsage {
                certify: true,
                ..algorithm.implied_usage()
            }
            .to_flags();
            let sig = self_certification(config, &key, "", flags, None, true, created)?;
            let mut ring = KeyRing::new(wrap(config, &key, passphrase)?);
            ring.add_user(UserBinding {
                user_id: String::new(),
                signatures: vec![sig],
            });
            Ok(ring)
        }
        Some((master_ring, master_passphrase)) => {
            let master_key = master_ring.primary().unlock(master_passphrase)?;
            let usage = KeyUsage {
                certify: false,
                ..algorithm.implied_usage()
            };
            let sig = subkey_binding(config, &master_key, &key, usage, None, created)?;
            let mut ring = master_ring.clone();
            ring.add_subkey(SubkeyBinding {
                key: wrap(config, &key, passphrase)?,
                signatures: vec![sig],
            });
            Ok(ring)
        }
    }
}

/// Re-derives a complete key ring from its user IDs and member keys.
///
/// `user_ids[0]` becomes the primary user ID and `keys[0]` must be the master
/// key. Every member is re-wrapped under `new_passphrase`.
pub fn build_secret_key(
    config: &EngineConfig,
    user_ids: &[String],
    keys: &[KeySpec],
    master_key_id: u64,
    old_passphrase: &Passphrase,
    new_passphrase: &Passphrase,
) -> Result<(SecretKeyRing, PublicKeyRing)> {
    let (master_spec, subkey_specs) = keys
        .split_first()
        .ok_or_else(|| PgpkitError::invalid_input("no master key given"))?;
    if master_spec.key.key_id() != master_key_id {
        return Err(PgpkitError::invalid_input(format!(
            "first key {:016X} is not the master key {:016X}",
            master_spec.key.key_id(),
            master_key_id
        )));
    }
    if user_ids.is_empty() {
        return Err(PgpkitError::NoUserIds);
    }
    for user_id in user_ids {
        Validator::validate_user_id(user_id)?;
    }
    Validator::validate_keyring_size(keys.len())?;

    let master = master_spec.key.unlock(old_passphrase)?;
    let created = timestamp_now();

    let mut master_flags = KeyUsage::certify_sign();
    master_flags.encrypt = master_spec.usage.encrypt && master.algorithm().can_encrypt();
    let flags = master_flags.to_flags();

    let mut ring = KeyRing::new(wrap(config, &master, new_passphrase)?);
    for (rank, user_id) in user_ids.iter().enumerate() {
        let sig = self_certification(
            config,
            &master,
            user_id,
            flags,
            master_spec.expiry_days,
            rank == 0,
            created,
        )?;
        ring.add_user(UserBinding {
            user_id: user_id.clone(),
            signatures: vec![sig],
        });
    }

    for spec in subkey_specs {
        let subkey = spec.key.unlock(old_passphrase)?;
        let usage = KeyUsage {
            certify: false,
            ..spec.usage.restricted_to(subkey.algorithm())
        };
        let sig = subkey_binding(config, &master, &subkey, usage, spec.expiry_days, created)?;
        ring.add_subkey(SubkeyBinding {
            key: wrap(config, &subkey, new_passphrase)?,
            signatures: vec![sig],
        });
    }

    debug!(
        master_key_id = format!("{:016X}", master_key_id),
        user_ids = user_ids.len(),
        subkeys = subkey_specs.len(),
        "Built secret key ring"
    );
    let public = ring.to_public();
    Ok((ring, public))
}

/// Certifies a user ID of someone else's key with the certifier's master key
pub fn certify_user_id(
    config: &EngineConfig,
    target: &PublicKeyRing,
    user_id: &str,
    certifier: &SecretKeyRing,
    passphrase: &Passphrase,
) -> Result<PublicKeyRing> {
    let position = target
        .users
        .iter()
        .position(|u| u.user_id == user_id)
        .ok_or_else(|| PgpkitError::invalid_input(format!("user ID not on key: {}", user_id)))?;
    if !certifier.master().usage().certify {
        return Err(PgpkitError::SignatureFailed);
    }
    let signer = certifier.primary().unlock(passphrase)?;

    let mut hashed = vec![Subpacket::SignatureCreationTime(timestamp_now())];
    if let Some(signer_uid) = certifier.main_user_id().filter(|uid| !uid.is_empty()) {
        hashed.push(Subpacket::SignerUserId(signer_uid.to_string()));
    }
    let master = target.primary();
    let sig = SignaturePacket::new_v4(
        SignatureType::GenericCertification,
        signer.public(),
        config.hash_algorithm,
        hashed,
    )
    .sign_target(SignatureTarget::UserId(master, user_id), &signer)?;

    info!(
        target = format!("{:016X}", target.master_key_id()),
        certifier = format!("{:016X}", certifier.master_key_id()),
        "Certified user ID"
    );
    let mut ring = target.clone();
    ring.users[position].signatures.push(sig);
    Ok(ring)
}

/// Re-wraps every member's secret material under a new passphrase
pub fn change_passphrase(
    config: &EngineConfig,
    ring: &SecretKeyRing,
    old: &Passphrase,
    new: &Passphrase,
) -> Result<SecretKeyRing> {
    let mut changed = ring.clone();
    changed.primary = ring
        .primary
        .rewrap(&mut OsRng, old, new, &config.protection)?;
    for subkey in &mut changed.subkeys {
        subkey.key = subkey.key.rewrap(&mut OsRng, old, new, &config.protection)?;
    }
    info!(key_id = format!("{:016X}", ring.master_key_id()), "Changed passphrase");
    Ok(changed)
}

/// Adds a key revocation signature to the master key
pub fn revoke_key(
    config: &EngineConfig,
    ring: &SecretKeyRing,
    passphrase: &Passphrase,
    reason: &str,
) -> Result<SecretKeyRing> {
    let master = ring.primary().unlock(passphrase)?;
    let sig = SignaturePacket::new_v4(
        SignatureType::KeyRevocation,
        master.public(),
        config.hash_algorithm,
        vec![
            Subpacket::SignatureCreationTime(timestamp_now()),
            Subpacket::ReasonForRevocation {
                code: 0,
                reason: reason.to_string(),
            },
        ],
    )
    .sign_target(SignatureTarget::Key(master.public()), &master)?;
    let mut revoked = ring.clone();
    revoked.add_direct_signature(sig);
    info!(key_id = format!("{:016X}", ring.master_key_id()), "Revoked key");
    Ok(revoked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ProtectionParams;
    use std::sync::OnceLock;

    fn config() -> EngineConfig {
        EngineConfig {
            protection: ProtectionParams {
                count: 0x10,
                ..ProtectionParams::default()
            },
            ..EngineConfig::default()
        }
    }

    fn master_ring() -> &'static SecretKeyRing {
        static RING: OnceLock<SecretKeyRing> = OnceLock::new();
        RING.get_or_init(|| {
            create_key(
                &config(),
                PublicKeyAlgorithm::Rsa,
                1024,
                &Passphrase::from("master"),
                None,
            )
            .unwrap()
        })
    }

    #[test]
    fn test_construction_errors() {
        let pass = Passphrase::empty();
        assert!(matches!(
            create_key(&config(), PublicKeyAlgorithm::RsaSignOnly, 1024, &pass, None),
            Err(PgpkitError::UnknownAlgorithmChoice)
        ));
        assert!(matches!(
            create_key(&config(), PublicKeyAlgorithm::Rsa, 511, &pass, None),
            Err(PgpkitError::KeySizeTooSmall { .. })
        ));
        assert!(matches!(
            create_key(&config(), PublicKeyAlgorithm::ElGamal, 1024, &pass, None),
            Err(PgpkitError::MasterKeyMustNotBeElGamal)
        ));
    }

    #[test]
    fn test_master_key_is_self_certified() {
        let ring = master_ring();
        assert_eq!(ring.user_ids(), vec![""]);
        assert!(ring.is_protected());
        let usage = ring.master().usage();
        assert!(usage.certify && usage.sign && usage.encrypt);
    }

    #[test]
    fn test_subkey_under_master() {
        let ring = create_key(
            &config(),
            PublicKeyAlgorithm::ElGamal,
            1024,
            &Passphrase::from("sub"),
            Some((master_ring(), &Passphrase::from("master"))),
        )
        .unwrap();
        assert_eq!(ring.key_ids().len(), 2);
        assert_eq!(ring.key_ids()[0], master_ring().master_key_id());
        let subkey = ring.keys()[1];
        assert!(!subkey.is_master());
        assert!(subkey.usage().encrypt);
        assert!(!subkey.usage().sign);
        assert_eq!(ring.encryption_key_id(), Some(subkey.key_id()));
    }

    #[test]
    fn test_subkey_needs_master_passphrase() {
        let result = create_key(
            &config(),
            PublicKeyAlgorithm::Rsa,
            1024,
            &Passphrase::empty(),
            Some((master_ring(), &Passphrase::from("wrong"))),
        );
        assert!(matches!(result, Err(PgpkitError::WrongPassphrase)));
    }

    #[test]
    fn test_build_secret_key_consistency() {
        let with_sub = create_key(
            &config(),
            PublicKeyAlgorithm::Rsa,
            1024,
            &Passphrase::from("master"),
            Some((master_ring(), &Passphrase::from("master"))),
        )
        .unwrap();
        let keys = vec![
            KeySpec {
                key: with_sub.primary().clone(),
                usage: KeyUsage::certify_sign(),
                expiry_days: None,
            },
            KeySpec {
                key: with_sub.subkeys()[0].key.clone(),
                usage: KeyUsage::sign_only(),
                expiry_days: Some(365),
            },
        ];
        let user_ids = vec!["Alice <alice@example.com>".to_string(), "Alice (work)".to_string()];
        let (secret, public) = build_secret_key(
            &config(),
            &user_ids,
            &keys,
            with_sub.master_key_id(),
            &Passphrase::from("master"),
            &Passphrase::empty(),
        )
        .unwrap();

        assert_eq!(secret.key_ids(), public.key_ids());
        assert_eq!(secret.key_ids(), with_sub.key_ids());
        assert_eq!(public.main_user_id(), Some("Alice <alice@example.com>"));
        assert!(!secret.is_protected());

        let master = public.master();
        assert!(master.usage().certify && master.usage().sign);
        assert!(!master.usage().encrypt);
        let subkey = public.keys()[1];
        assert!(subkey.can_sign());
        assert!(subkey.expiry().is_some());
        assert_eq!(public.signing_key_id(), Some(subkey.key_id()));
        let binding = &public.subkeys()[0].signatures[0];
        assert!(binding.embedded_signature().is_some());
    }

    #[test]
    fn test_build_secret_key_errors() {
        let keys = vec![KeySpec {
            key: master_ring().primary().clone(),
            usage: KeyUsage::certify_sign(),
            expiry_days: None,
        }];
        let id = master_ring().master_key_id();
        let pass = Passphrase::from("master");
        assert!(matches!(
            build_secret_key(&config(), &[], &keys, id, &pass, &pass),
            Err(PgpkitError::NoUserIds)
        ));
        assert!(matches!(
            build_secret_key(&config(), &["a".to_string()], &keys, id ^ 1, &pass, &pass),
            Err(PgpkitError::InvalidInput(_))
        ));
        assert!(matches!(
            build_secret_key(&config(), &["a".to_string()], &keys, id, &Passphrase::from("x"), &pass),
            Err(PgpkitError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_change_passphrase_and_revoke() {
        let ring = master_ring();
        let changed =
            change_passphrase(&config(), ring, &Passphrase::from("master"), &Passphrase::from("new")).unwrap();
        assert_eq!(changed.key_ids(), ring.key_ids());
        assert!(changed.primary().unlock(&Passphrase::from("new")).is_ok());
        assert!(changed.primary().unlock(&Passphrase::from("master")).is_err());

        let revoked = revoke_key(&config(), &changed, &Passphrase::from("new"), "superseded").unwrap();
        assert!(revoked.master().is_revoked());
        assert!(!revoked.master().can_sign());
        assert!(!ring.master().is_revoked());
    }

    #[test]
    fn test_certify_user_id() {
        let target = create_key(&config(), PublicKeyAlgorithm::Rsa, 1024, &Passphrase::empty(), None)
            .unwrap()
            .to_public();
        let certified =
            certify_user_id(&config(), &target, "", master_ring(), &Passphrase::from("master")).unwrap();
        let sigs = &certified.users()[0].signatures;
        assert_eq!(sigs.len(), 2);
        let cert = &sigs[1];
        assert_eq!(cert.issuer(), Some(master_ring().master_key_id()));
        assert!(cert
            .verify_target(
                SignatureTarget::UserId(target.primary(), ""),
                master_ring().primary().public()
            )
            .unwrap());
        assert!(certify_user_id(&config(), &target, "nobody", master_ring(), &Passphrase::from("master")).is_err());
    }
}
