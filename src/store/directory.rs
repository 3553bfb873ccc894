//! Key store backed by a directory.
//!
//! Layout:
//!
//! ```text
//! <root>/public/<MASTER>.gpg
//! <root>/secret/<MASTER>.gpg
//! <root>/index.json            member key ID -> master key ID, per kind
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use super::KeyStore;
use crate::error::{PgpkitError, Result};
use crate::keyring::{KeyRingKind, KeyRingReader, PublicKeyRing, SecretKeyRing};

const INDEX_FILE: &str = "index.json";

/// Member key IDs of every stored ring, keyed by master key ID in hex
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Index {
    #[serde(default)]
    public: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    secret: BTreeMap<String, Vec<String>>,
}

impl Index {
    fn rings(&self, kind: KeyRingKind) -> &BTreeMap<String, Vec<String>> {
        match kind {
            KeyRingKind::Public => &self.public,
            KeyRingKind::Secret => &self.secret,
        }
    }

    fn rings_mut(&mut self, kind: KeyRingKind) -> &mut BTreeMap<String, Vec<String>> {
        match kind {
            KeyRingKind::Public => &mut self.public,
            KeyRingKind::Secret => &mut self.secret,
        }
    }

    fn find(&self, kind: KeyRingKind, key_id: u64) -> Option<u64> {
        let wanted = hex_id(key_id);
        self.rings(kind)
            .iter()
            .find(|(_, members)| members.contains(&wanted))
            .and_then(|(master, _)| parse_id(master))
    }
}

fn hex_id(key_id: u64) -> String {
    format!("{:016X}", key_id)
}

fn parse_id(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex, 16).ok()
}

/// Key store persisting every ring as a binary file
#[derive(Debug)]
pub struct DirectoryKeyStore {
    root: PathBuf,
    index: Mutex<Index>,
}

impl DirectoryKeyStore {
    /// Opens (creating if needed) the store rooted at `root`.
    ///
    /// A missing or unreadable index is rebuilt from the ring files.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in [KeyRingKind::Public, KeyRingKind::Secret] {
            fs::create_dir_all(root.join(kind.name())).map_err(|e| {
                PgpkitError::key_store(format!("Failed to create {}: {}", root.display(), e))
            })?;
        }

        let index_path = root.join(INDEX_FILE);
        let index = match fs::read(&index_path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "Key store index unreadable, rebuilding");
                    Self::rebuild_index(&root)?
                }
            },
            Err(_) => Self::rebuild_index(&root)?,
        };
        let store = Self {
            root,
            index: Mutex::new(index),
        };
        store.write_index(&store.lock())?;
        debug!(root = %store.root.display(), "Opened key store");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ring_path(&self, kind: KeyRingKind, master_key_id: u64) -> PathBuf {
        self.root
            .join(kind.name())
            .join(format!("{}.gpg", hex_id(master_key_id)))
    }

    fn rebuild_index(root: &Path) -> Result<Index> {
        let mut index = Index::default();
        for kind in [KeyRingKind::Public, KeyRingKind::Secret] {
            let dir = root.join(kind.name());
            let entries = fs::read_dir(&dir)
                .map_err(|e| PgpkitError::key_store(format!("Failed to list {}: {}", dir.display(), e)))?;
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(master) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(parse_id)
                else {
                    continue;
                };
                let data = fs::read(&path)?;
                let mut reader = KeyRingReader::new(&data[..]);
                let members = match reader.next_ring() {
                    Ok(Some((found, packets))) if found == kind => {
                        let ids = match kind {
                            KeyRingKind::Public => {
                                PublicKeyRing::from_packets(&packets).map(|r| r.key_ids())
                            }
                            KeyRingKind::Secret => {
                                SecretKeyRing::from_packets(&packets).map(|r| r.key_ids())
                            }
                        };
                        match ids {
                            Ok(ids) => ids,
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "Skipping unreadable key ring");
                                continue;
                            }
                        }
                    }
                    _ => {
                        warn!(path = %path.display(), "Skipping file without a key ring");
                        continue;
                    }
                };
                index
                    .rings_mut(kind)
                    .insert(hex_id(master), members.into_iter().map(hex_id).collect());
            }
        }
        Ok(index)
    }

    fn write_index(&self, index: &Index) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)
            .map_err(|e| PgpkitError::key_store(format!("Failed to serialize index: {}", e)))?;
        fs::write(self.root.join(INDEX_FILE), data)
            .map_err(|e| PgpkitError::key_store(format!("Failed to write index: {}", e)))
    }

    fn read_ring(&self, kind: KeyRingKind, master_key_id: u64) -> Result<Option<Vec<u8>>> {
        let path = self.ring_path(kind, master_key_id);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PgpkitError::key_store(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl KeyStore for DirectoryKeyStore {
    fn is_ready(&self) -> bool {
        self.root.is_dir()
    }

    fn key_ring_data(&self, kind: KeyRingKind, master_key_id: u64) -> Result<Option<Vec<u8>>> {
        self.read_ring(kind, master_key_id)
    }

    fn key_ring_data_by_key_id(&self, kind: KeyRingKind, key_id: u64) -> Result<Option<Vec<u8>>> {
        let master = self.lock().find(kind, key_id);
        match master {
            Some(master) => self.read_ring(kind, master),
            None => Ok(None),
        }
    }

    fn master_key_id(&self, key_id: u64) -> Result<Option<u64>> {
        let index = self.lock();
        Ok(index
            .find(KeyRingKind::Secret, key_id)
            .or_else(|| index.find(KeyRingKind::Public, key_id)))
    }

    fn save_key_ring_data(
        &self,
        kind: KeyRingKind,
        master_key_id: u64,
        member_key_ids: &[u64],
        data: &[u8],
    ) -> Result<()> {
        let mut index = self.lock();
        let path = self.ring_path(kind, master_key_id);
        fs::write(&path, data).map_err(|e| {
            PgpkitError::key_store(format!("Failed to write {}: {}", path.display(), e))
        })?;
        index.rings_mut(kind).insert(
            hex_id(master_key_id),
            member_key_ids.iter().copied().map(hex_id).collect(),
        );
        self.write_index(&index)
    }

    fn delete_key_ring(&self, kind: KeyRingKind, master_key_id: u64) -> Result<bool> {
        let mut index = self.lock();
        let existed = index.rings_mut(kind).remove(&hex_id(master_key_id)).is_some();
        let path = self.ring_path(kind, master_key_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                PgpkitError::key_store(format!("Failed to delete {}: {}", path.display(), e))
            })?;
        }
        self.write_index(&index)?;
        Ok(existed)
    }

    fn master_key_ids(&self, kind: KeyRingKind) -> Result<Vec<u64>> {
        Ok(self
            .lock()
            .rings(kind)
            .keys()
            .filter_map(|hex| parse_id(hex))
            .collect())
    }
}
