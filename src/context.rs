//! Engine context shared by all operations.

use std::sync::Arc;
use tracing::debug;

use crate::cache::PassphraseCache;
use crate::config::EngineConfig;
use crate::crypto::Passphrase;
use crate::error::{PgpkitError, Result};
use crate::keyring::SecretKeyRing;
use crate::packet::UnlockedKey;
use crate::store::{KeyStore, KeyStoreExt, MemoryKeyStore};

/// Key store, passphrase cache and configuration for one engine instance.
///
/// Cheap to clone; clones share the store and the cache.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn KeyStore>,
    pub cache: Arc<PassphraseCache>,
    pub config: EngineConfig,
}

impl Context {
    pub fn new(store: Arc<dyn KeyStore>, config: EngineConfig) -> Self {
        Self {
            store,
            cache: Arc::new(PassphraseCache::new()),
            config,
        }
    }

    /// Context over a fresh in-memory store
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryKeyStore::new()), config)
    }

    pub fn with_cache(mut self, cache: Arc<PassphraseCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Passphrase given by the caller, else the cached one for `key_id`
    pub fn passphrase_for(&self, key_id: u64, explicit: Option<&Passphrase>) -> Option<Passphrase> {
        explicit
            .cloned()
            .or_else(|| self.cache.get(key_id, self.store.as_ref()))
    }

    /// Unlocks one member of `ring`.
    ///
    /// Uses the explicit passphrase, then the cache. A protected key with
    /// neither fails with `PassphraseRequired`. On success the passphrase is
    /// cached under the ring's master key ID; a cached passphrase that no
    /// longer unlocks the key is dropped.
    pub fn unlock(
        &self,
        ring: &SecretKeyRing,
        key_id: u64,
        explicit: Option<&Passphrase>,
    ) -> Result<UnlockedKey> {
        let master_key_id = ring.master_key_id();
        let packet = ring
            .key_packet(key_id)
            .ok_or(PgpkitError::CouldNotExtractPrivateKey)?;
        let passphrase = match self.passphrase_for(key_id, explicit) {
            Some(passphrase) => passphrase,
            None if packet.is_protected() => {
                return Err(PgpkitError::PassphraseRequired {
                    key_id: master_key_id,
                })
            }
            None => Passphrase::empty(),
        };
        let key = match packet.unlock(&passphrase) {
            Ok(key) => key,
            Err(PgpkitError::WrongPassphrase) => {
                if explicit.is_none() && self.cache.invalidate(master_key_id) {
                    debug!(
                        master_key_id = format!("{:016X}", master_key_id),
                        "Dropped stale cached passphrase"
                    );
                }
                return Err(PgpkitError::WrongPassphrase);
            }
            Err(e) => return Err(e),
        };
        if !passphrase.is_empty() {
            self.cache.set(master_key_id, passphrase);
        }
        debug!(
            key_id = format!("{:016X}", key_id),
            master_key_id = format!("{:016X}", master_key_id),
            "Unlocked secret key"
        );
        Ok(key)
    }

    /// Secret ring containing `key_id`, after checking the store is usable
    pub fn secret_ring(&self, key_id: u64) -> Result<Option<SecretKeyRing>> {
        self.store.ensure_ready()?;
        self.store.secret_ring(key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{fast_config, sample_ring};

    fn is_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_context_is_send_sync() {
        is_send_sync::<Context>();
    }

    #[test]
    fn test_unlock_uses_and_fills_cache() {
        let ctx = Context::in_memory(fast_config());
        let ring = sample_ring("pw");
        let id = ring.master_key_id();
        ctx.store.save_secret_ring(&ring).unwrap();

        assert!(matches!(
            ctx.unlock(&ring, id, None),
            Err(PgpkitError::PassphraseRequired { key_id }) if key_id == id
        ));
        assert!(matches!(
            ctx.unlock(&ring, id, Some(&Passphrase::from("nope"))),
            Err(PgpkitError::WrongPassphrase)
        ));
        assert!(ctx.cache.is_empty());

        ctx.unlock(&ring, id, Some(&Passphrase::from("pw"))).unwrap();
        assert!(ctx.unlock(&ring, id, None).is_ok());
        assert!(matches!(
            ctx.unlock(&ring, 1, None),
            Err(PgpkitError::CouldNotExtractPrivateKey)
        ));
    }

    #[test]
    fn test_stale_cached_passphrase_is_dropped() {
        let ctx = Context::in_memory(fast_config());
        let ring = sample_ring("pw");
        let id = ring.master_key_id();
        ctx.store.save_secret_ring(&ring).unwrap();

        ctx.cache.set(id, Passphrase::from("old"));
        assert!(matches!(
            ctx.unlock(&ring, id, None),
            Err(PgpkitError::WrongPassphrase)
        ));
        assert!(ctx.cache.is_empty());
        assert!(matches!(
            ctx.unlock(&ring, id, None),
            Err(PgpkitError::PassphraseRequired { .. })
        ));

        // A wrong explicit passphrase leaves a good cached one alone
        ctx.cache.set(id, Passphrase::from("pw"));
        assert!(matches!(
            ctx.unlock(&ring, id, Some(&Passphrase::from("nope"))),
            Err(PgpkitError::WrongPassphrase)
        ));
        assert!(ctx.unlock(&ring, id, None).is_ok());
    }
}
