//! Time-boxed passphrase cache.
//!
//! Entries expire after a sliding TTL: every successful lookup re-arms the
//! entry. Expired entries are only removed by [`PassphraseCache::sweep`],
//! which an external timer calls and which reports when it wants to be
//! called next.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::crypto::Passphrase;
use crate::store::KeyStore;

/// Cache slot for the passphrase of symmetric operations
pub const SYMMETRIC_KEY_ID: u64 = u64::MAX;

/// A cached passphrase and the time it was last handed out
#[derive(Clone)]
pub struct CachedPassphrase {
    pub passphrase: Passphrase,
    pub last_used: Instant,
}

impl CachedPassphrase {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

/// Passphrases keyed by master key ID, shared between concurrent operations
#[derive(Default)]
pub struct PassphraseCache {
    entries: Mutex<HashMap<u64, CachedPassphrase>>,
}

impl PassphraseCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CachedPassphrase>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remembers `passphrase` for `key_id`, restarting its TTL
    pub fn set(&self, key_id: u64, passphrase: Passphrase) {
        self.set_at(key_id, passphrase, Instant::now());
    }

    /// Like [`set`](Self::set) with an explicit clock, for sweeps driven by tests or timers
    pub fn set_at(&self, key_id: u64, passphrase: Passphrase, now: Instant) {
        trace!(key_id = format!("{:016X}", key_id), "Caching passphrase");
        self.lock().insert(
            key_id,
            CachedPassphrase {
                passphrase,
                last_used: now,
            },
        );
    }

    /// Looks up the passphrase for `key_id`.
    ///
    /// Asymmetric key IDs are first mapped to the master key ID of their ring,
    /// so a subkey finds the passphrase cached for its master.
    pub fn get(&self, key_id: u64, store: &dyn KeyStore) -> Option<Passphrase> {
        self.get_at(key_id, store, Instant::now())
    }

    /// Like [`get`](Self::get) at time `now`.
    ///
    /// Subkey IDs are resolved to their ring's master key ID through `store`.
    /// A hit counts as a use and restarts the entry's TTL.
    pub fn get_at(&self, key_id: u64, store: &dyn KeyStore, now: Instant) -> Option<Passphrase> {
        let lookup_id = if key_id == SYMMETRIC_KEY_ID {
            key_id
        } else {
            match store.master_key_id(key_id) {
                Ok(Some(master)) => master,
                Ok(None) => key_id,
                Err(e) => {
                    debug!(key_id = format!("{:016X}", key_id), error = %e, "Key lookup failed");
                    key_id
                }
            }
        };
        let mut entries = self.lock();
        let entry = entries.get_mut(&lookup_id)?;
        entry.last_used = now;
        Some(entry.passphrase.clone())
    }

    /// Removes entries idle for at least `ttl`.
    ///
    /// Returns the delay until the next sweep is useful: the smallest remaining
    /// lifetime among surviving entries, never more than `initial_delay`.
    pub fn sweep(&self, ttl: Duration, initial_delay: Duration) -> Duration {
        self.sweep_at(ttl, initial_delay, Instant::now())
    }

    /// Drops entries idle for `ttl` or longer as of `now`.
    ///
    /// Returns the delay until the next entry would expire, capped at
    /// `initial_delay` so an empty cache is swept again at the usual rate.
    pub fn sweep_at(&self, ttl: Duration, initial_delay: Duration, now: Instant) -> Duration {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) < ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Swept passphrase cache");
        }
        entries
            .values()
            .map(|entry| ttl - entry.age(now))
            .min()
            .map_or(initial_delay, |next| next.min(initial_delay))
    }

    /// Forgets the passphrase for `key_id`; returns whether one was cached
    pub fn invalidate(&self, key_id: u64) -> bool {
        self.lock().remove(&key_id).is_some()
    }

    /// Forgets every cached passphrase
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached passphrases
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PublicKeyAlgorithm;
    use crate::keyring::create_key;
    use crate::store::tests::{fast_config, sample_ring};
    use crate::store::{KeyStoreExt, MemoryKeyStore};

    const TTL: Duration = Duration::from_secs(10);
    const DELAY: Duration = Duration::from_secs(60);

    #[test]
    fn test_set_get_and_zero_ttl_sweep() {
        let cache = PassphraseCache::new();
        let store = MemoryKeyStore::new();
        cache.set(7, Passphrase::from("secret"));
        assert_eq!(cache.get(7, &store).unwrap().as_str(), "secret");

        cache.sweep(Duration::ZERO, DELAY);
        assert!(cache.get(7, &store).is_none());
    }

    #[test]
    fn test_sliding_expiration() {
        let cache = PassphraseCache::new();
        let store = MemoryKeyStore::new();
        let t0 = Instant::now();
        cache.set_at(SYMMETRIC_KEY_ID, Passphrase::from("secret"), t0);

        assert!(cache.get_at(SYMMETRIC_KEY_ID, &store, t0 + Duration::from_secs(5)).is_some());
        assert!(cache.get_at(SYMMETRIC_KEY_ID, &store, t0 + Duration::from_secs(9)).is_some());
        cache.sweep_at(TTL, DELAY, t0 + Duration::from_secs(11));
        assert!(cache.get_at(SYMMETRIC_KEY_ID, &store, t0 + Duration::from_secs(11)).is_some());

        cache.sweep_at(TTL, DELAY, t0 + Duration::from_secs(21));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_reports_next_delay() {
        let cache = PassphraseCache::new();
        let t0 = Instant::now();
        assert_eq!(cache.sweep_at(TTL, DELAY, t0), DELAY);

        cache.set_at(1, Passphrase::from("a"), t0);
        cache.set_at(2, Passphrase::from("b"), t0 + Duration::from_secs(4));
        let next = cache.sweep_at(TTL, DELAY, t0 + Duration::from_secs(6));
        assert_eq!(next, Duration::from_secs(4));
        assert_eq!(cache.sweep_at(TTL, Duration::from_secs(1), t0 + Duration::from_secs(6)), Duration::from_secs(1));
    }

    #[test]
    fn test_subkey_resolves_to_master() {
        let master = sample_ring("pw");
        let ring = create_key(
            &fast_config(),
            PublicKeyAlgorithm::ElGamal,
            1024,
            &Passphrase::from("pw"),
            Some((&master, &Passphrase::from("pw"))),
        )
        .unwrap();
        let subkey_id = ring.key_ids()[1];
        let store = MemoryKeyStore::new();
        store.save_secret_ring(&ring).unwrap();

        let cache = PassphraseCache::new();
        cache.set(ring.master_key_id(), Passphrase::from("pw"));
        assert_eq!(cache.get(subkey_id, &store).unwrap().as_str(), "pw");
        assert!(cache.invalidate(ring.master_key_id()));
        assert!(cache.get(ring.master_key_id(), &store).is_none());
    }
}
