//! In-memory key store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::KeyStore;
use crate::error::Result;
use crate::keyring::KeyRingKind;

#[derive(Debug, Clone)]
struct StoredRing {
    members: Vec<u64>,
    data: Vec<u8>,
}

/// Key store that lives for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    rings: Mutex<HashMap<(KeyRingKind, u64), StoredRing>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rings<T>(&self, f: impl FnOnce(&mut HashMap<(KeyRingKind, u64), StoredRing>) -> T) -> T {
        let mut rings = self.rings.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rings)
    }

    fn find(&self, kind: KeyRingKind, key_id: u64) -> Option<(u64, Vec<u8>)> {
        self.with_rings(|rings| {
            rings
                .iter()
                .find(|((k, _), ring)| *k == kind && ring.members.contains(&key_id))
                .map(|((_, master), ring)| (*master, ring.data.clone()))
        })
    }
}

impl KeyStore for MemoryKeyStore {
    fn key_ring_data(&self, kind: KeyRingKind, master_key_id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.with_rings(|rings| rings.get(&(kind, master_key_id)).map(|r| r.data.clone())))
    }

    fn key_ring_data_by_key_id(&self, kind: KeyRingKind, key_id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.find(kind, key_id).map(|(_, data)| data))
    }

    fn master_key_id(&self, key_id: u64) -> Result<Option<u64>> {
        Ok(self
            .find(KeyRingKind::Secret, key_id)
            .or_else(|| self.find(KeyRingKind::Public, key_id))
            .map(|(master, _)| master))
    }

    fn save_key_ring_data(
        &self,
        kind: KeyRingKind,
        master_key_id: u64,
        member_key_ids: &[u64],
        data: &[u8],
    ) -> Result<()> {
        self.with_rings(|rings| {
            rings.insert(
                (kind, master_key_id),
                StoredRing {
                    members: member_key_ids.to_vec(),
                    data: data.to_vec(),
                },
            )
        });
        Ok(())
    }

    fn delete_key_ring(&self, kind: KeyRingKind, master_key_id: u64) -> Result<bool> {
        Ok(self.with_rings(|rings| rings.remove(&(kind, master_key_id)).is_some()))
    }

    fn master_key_ids(&self, kind: KeyRingKind) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self.with_rings(|rings| {
            rings
                .keys()
                .filter(|(k, _)| *k == kind)
                .map(|(_, id)| *id)
                .collect()
        });
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::exercise_store;

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryKeyStore::new());
    }
}
