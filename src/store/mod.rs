//! Key store collaborator.
//!
//! The engine treats a store as byte blobs keyed by the master key ID of a
//! ring, with a secondary lookup by any member key ID. Typed access and the
//! merge-on-save policy live in [`KeyStoreExt`], shared by every backend.
//!
//! ## Backends
//!
//! - [`MemoryKeyStore`]: process-lifetime maps, used by tests and embedders
//! - [`DirectoryKeyStore`]: one file per ring plus a JSON member index

pub mod directory;
pub mod memory;

pub use directory::DirectoryKeyStore;
pub use memory::MemoryKeyStore;

use tracing::{debug, warn};

use crate::crypto::Passphrase;
use crate::error::{PgpkitError, Result};
use crate::keyring::{KeyPacket, KeyRing, KeyRingKind, PublicKeyRing, SecretKeyRing};

/// Result of saving a ring into a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
    Unchanged,
    Rejected,
}

/// Byte-level key store interface
pub trait KeyStore: Send + Sync {
    /// False while the backing storage cannot be used
    fn is_ready(&self) -> bool {
        true
    }

    /// Encoded ring with the given master key ID
    fn key_ring_data(&self, kind: KeyRingKind, master_key_id: u64) -> Result<Option<Vec<u8>>>;

    /// Encoded ring containing the given member key ID
    fn key_ring_data_by_key_id(&self, kind: KeyRingKind, key_id: u64) -> Result<Option<Vec<u8>>>;

    /// Master key ID of the ring containing `key_id`, searching secret rings first
    fn master_key_id(&self, key_id: u64) -> Result<Option<u64>>;

    /// Stores an encoded ring, replacing any previous one with the same master
    fn save_key_ring_data(
        &self,
        kind: KeyRingKind,
        master_key_id: u64,
        member_key_ids: &[u64],
        data: &[u8],
    ) -> Result<()>;

    /// Removes a ring; returns whether it existed
    fn delete_key_ring(&self, kind: KeyRingKind, master_key_id: u64) -> Result<bool>;

    /// Master key IDs of all stored rings of one kind
    fn master_key_ids(&self, kind: KeyRingKind) -> Result<Vec<u64>>;
}

/// Typed access on top of [`KeyStore`]
pub trait KeyStoreExt: KeyStore {
    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(PgpkitError::ExternalStorageNotReady)
        }
    }

    /// Ring of kind `K` containing `key_id`
    fn ring<K: KeyPacket>(&self, key_id: u64) -> Result<Option<KeyRing<K>>> {
        self.key_ring_data_by_key_id(K::KIND, key_id)?
            .map(|data| KeyRing::from_bytes(&data))
            .transpose()
    }

    fn public_ring(&self, key_id: u64) -> Result<Option<PublicKeyRing>> {
        self.ring(key_id)
    }

    fn secret_ring(&self, key_id: u64) -> Result<Option<SecretKeyRing>> {
        self.ring(key_id)
    }

    /// Merges `ring` into the stored copy, or stores it as new
    fn save_ring<K: KeyPacket>(&self, ring: &KeyRing<K>) -> Result<SaveOutcome> {
        let master_key_id = ring.master_key_id();
        let existing = match self.key_ring_data(K::KIND, master_key_id)? {
            Some(data) => match KeyRing::<K>::from_bytes(&data) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    warn!(
                        key_id = format!("{:016X}", master_key_id),
                        error = %e,
                        "Replacing unreadable stored key ring"
                    );
                    None
                }
            },
            None => None,
        };

        let (merged, outcome) = match existing {
            Some(mut stored) => {
                if !stored.merge(ring)? {
                    return Ok(SaveOutcome::Unchanged);
                }
                (stored, SaveOutcome::Updated)
            }
            None => (ring.clone(), SaveOutcome::Created),
        };
        self.save_key_ring_data(
            K::KIND,
            master_key_id,
            &merged.key_ids(),
            &merged.to_bytes(),
        )?;
        debug!(
            kind = %K::KIND,
            key_id = format!("{:016X}", master_key_id),
            outcome = ?outcome,
            "Saved key ring"
        );
        Ok(outcome)
    }

    fn save_public_ring(&self, ring: &PublicKeyRing) -> Result<SaveOutcome> {
        self.save_ring(ring)
    }

    /// Saves a secret ring after probing that its master secret is usable.
    ///
    /// Rings whose master secret is a stub, or whose material does not even
    /// decode when probed with an empty passphrase, are rejected.
    fn save_secret_ring(&self, ring: &SecretKeyRing) -> Result<SaveOutcome> {
        let primary = ring.primary();
        if primary.is_dummy() {
            debug!(
                key_id = format!("{:016X}", ring.master_key_id()),
                "Rejecting secret key ring without master secret"
            );
            return Ok(SaveOutcome::Rejected);
        }
        match primary.unlock(&Passphrase::empty()) {
            Ok(_) | Err(PgpkitError::WrongPassphrase) => self.save_ring(ring),
            Err(e) => {
                debug!(
                    key_id = format!("{:016X}", ring.master_key_id()),
                    error = %e,
                    "Rejecting secret key ring"
                );
                Ok(SaveOutcome::Rejected)
            }
        }
    }

    /// Deletes both halves of a ring
    fn delete_key(&self, master_key_id: u64) -> Result<bool> {
        let public = self.delete_key_ring(KeyRingKind::Public, master_key_id)?;
        let secret = self.delete_key_ring(KeyRingKind::Secret, master_key_id)?;
        Ok(public || secret)
    }
}

impl<S: KeyStore + ?Sized> KeyStoreExt for S {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::crypto::{ProtectionParams, PublicKeyAlgorithm};
    use crate::keyring::create_key;

    pub(crate) fn fast_config() -> EngineConfig {
        EngineConfig {
            protection: ProtectionParams {
                count: 0x10,
                ..ProtectionParams::default()
            },
            ..EngineConfig::default()
        }
    }

    pub(crate) fn sample_ring(passphrase: &str) -> SecretKeyRing {
        create_key(
            &fast_config(),
            PublicKeyAlgorithm::Rsa,
            1024,
            &Passphrase::from(passphrase),
            None,
        )
        .unwrap()
    }

    /// Behavior every backend must share
    pub(crate) fn exercise_store(store: &dyn KeyStore) {
        let secret = sample_ring("pw");
        let public = secret.to_public();
        let id = secret.master_key_id();

        assert!(store.public_ring(id).unwrap().is_none());
        assert_eq!(store.save_public_ring(&public).unwrap(), SaveOutcome::Created);
        assert_eq!(store.save_public_ring(&public).unwrap(), SaveOutcome::Unchanged);
        assert_eq!(store.save_secret_ring(&secret).unwrap(), SaveOutcome::Created);

        assert_eq!(store.public_ring(id).unwrap(), Some(public.clone()));
        assert_eq!(store.secret_ring(id).unwrap(), Some(secret.clone()));
        assert_eq!(store.master_key_id(id).unwrap(), Some(id));
        assert_eq!(store.master_key_ids(KeyRingKind::Public).unwrap(), vec![id]);

        let extended = create_key(
            &fast_config(),
            PublicKeyAlgorithm::ElGamal,
            1024,
            &Passphrase::from("pw"),
            Some((&secret, &Passphrase::from("pw"))),
        )
        .unwrap();
        let subkey_id = extended.key_ids()[1];
        assert_eq!(
            store.save_public_ring(&extended.to_public()).unwrap(),
            SaveOutcome::Updated
        );
        assert_eq!(store.master_key_id(subkey_id).unwrap(), Some(id));
        let by_subkey = store.public_ring(subkey_id).unwrap().unwrap();
        assert_eq!(by_subkey.key_ids(), extended.key_ids());

        assert!(store.delete_key(id).unwrap());
        assert!(!store.delete_key(id).unwrap());
        assert!(store.public_ring(subkey_id).unwrap().is_none());
        assert!(store.master_key_ids(KeyRingKind::Secret).unwrap().is_empty());
    }
}
