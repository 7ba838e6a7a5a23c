//! Secret store collaborator
//!
//! The vault only needs get / create-if-absent / update by name. Secrets are
//! labeled flat maps of entry name → bytes, one logical namespace per store.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// A named, labeled set of binary entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Secret store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid secret name: {0:?}")]
    InvalidName(String),

    #[error("Secret store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidName(_) => ErrorKind::InvalidInput,
            StoreError::AlreadyExists(_) | StoreError::Backend(_) => ErrorKind::Storage,
        }
    }
}

/// External key-value secret store
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Secret, StoreError>;

    /// Fails with `AlreadyExists` if another writer created `secret.name` first
    fn create(&self, secret: Secret) -> Result<(), StoreError>;

    /// Replace an existing secret; fails with `NotFound` if absent
    fn update(&self, secret: Secret) -> Result<(), StoreError>;
}

/// In-process store
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, Secret>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".into())
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Secret, StoreError> {
        self.secrets
            .read()
            .map_err(poisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn create(&self, secret: Secret) -> Result<(), StoreError> {
        let mut secrets = self.secrets.write().map_err(poisoned)?;
        if secrets.contains_key(&secret.name) {
            return Err(StoreError::AlreadyExists(secret.name));
        }
        secrets.insert(secret.name.clone(), secret);
        Ok(())
    }

    fn update(&self, secret: Secret) -> Result<(), StoreError> {
        let mut secrets = self.secrets.write().map_err(poisoned)?;
        match secrets.get_mut(&secret.name) {
            Some(existing) => {
                *existing = secret;
                Ok(())
            }
            None => Err(StoreError::NotFound(secret.name)),
        }
    }
}

/// On-disk form: entry values hex-encoded
#[derive(Debug, Serialize, Deserialize)]
struct StoredSecret {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl From<&Secret> for StoredSecret {
    fn from(secret: &Secret) -> Self {
        Self {
            name: secret.name.clone(),
            labels: secret.labels.clone(),
            data: secret
                .data
                .iter()
                .map(|(k, v)| (k.clone(), hex::encode(v)))
                .collect(),
        }
    }
}

impl TryFrom<StoredSecret> for Secret {
    type Error = StoreError;

    fn try_from(stored: StoredSecret) -> Result<Self, Self::Error> {
        let mut data = BTreeMap::new();
        for (k, v) in stored.data {
            let bytes = hex::decode(&v)
                .map_err(|e| StoreError::Backend(format!("{}/{}: {}", stored.name, k, e)))?;
            data.insert(k, bytes);
        }
        Ok(Secret {
            name: stored.name,
            labels: stored.labels,
            data,
        })
    }
}

/// One JSON file per secret under a directory
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Backend(format!("Create dir {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()))
    }

    fn serialize(secret: &Secret) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(&StoredSecret::from(secret))
            .map_err(|e| StoreError::Backend(format!("Serialize: {}", e)))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, name: &str) -> Result<Secret, StoreError> {
        let path = self.path_for(name)?;
        let json = match std::fs::read(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::Backend(format!("Read {}: {}", path.display(), e))),
        };
        let stored: StoredSecret = serde_json::from_slice(&json)
            .map_err(|e| StoreError::Backend(format!("Parse {}: {}", path.display(), e)))?;
        stored.try_into()
    }

    fn create(&self, secret: Secret) -> Result<(), StoreError> {
        let path = self.path_for(&secret.name)?;
        let json = Self::serialize(&secret)?;

        // Fully written before it becomes visible under its real name
        let tmp = Self::tmp_path(&path);
        let written = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .and_then(|mut file| file.write_all(&json).and_then(|_| file.sync_all()));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(StoreError::Backend(format!("Write {}: {}", tmp.display(), e)));
        }

        // hard_link never replaces an existing file, matching the cluster store's conflict
        let linked = std::fs::hard_link(&tmp, &path);
        let _ = std::fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(secret.name))
            }
            Err(e) => Err(StoreError::Backend(format!("Create {}: {}", path.display(), e))),
        }
    }

    fn update(&self, secret: Secret) -> Result<(), StoreError> {
        let path = self.path_for(&secret.name)?;
        if !path.exists() {
            return Err(StoreError::NotFound(secret.name));
        }
        let json = Self::serialize(&secret)?;
        let tmp = Self::tmp_path(&path);
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                StoreError::Backend(format!("Update {}: {}", path.display(), e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("fleet-trust-store-test-{}", uuid::Uuid::new_v4()))
    }

    fn exercise(store: &dyn SecretStore) {
        let secret = Secret::new("node-key-a")
            .with_label("app", "fleet-trust")
            .with_entry("key", vec![1u8, 2, 3]);

        assert_eq!(store.get("node-key-a"), Err(StoreError::NotFound("node-key-a".into())));
        store.create(secret.clone()).unwrap();
        assert_eq!(store.get("node-key-a").unwrap(), secret);

        assert_eq!(
            store.create(secret.clone()),
            Err(StoreError::AlreadyExists("node-key-a".into()))
        );

        let updated = secret.clone().with_entry("extra", vec![9u8]);
        store.update(updated.clone()).unwrap();
        assert_eq!(store.get("node-key-a").unwrap(), updated);

        assert_eq!(
            store.update(Secret::new("missing")),
            Err(StoreError::NotFound("missing".into()))
        );
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySecretStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store() {
        let dir = test_dir();
        let store = FileSecretStore::open(&dir).unwrap();
        exercise(&store);

        // Survives reopening
        let reopened = FileSecretStore::open(&dir).unwrap();
        assert_eq!(reopened.get("node-key-a").unwrap().data["extra"], vec![9u8]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_create_leaves_only_complete_secrets() {
        let dir = test_dir();
        let store = FileSecretStore::open(&dir).unwrap();
        let original = Secret::new("node-key-b").with_entry("key", vec![5u8; 32]);
        store.create(original.clone()).unwrap();

        let rival = Secret::new("node-key-b").with_entry("key", vec![6u8; 32]);
        assert_eq!(store.create(rival), Err(StoreError::AlreadyExists("node-key-b".into())));
        assert_eq!(store.get("node-key-b").unwrap(), original);

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["node-key-b.json".to_string()]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_concurrent_create_readers_see_whole_secret() {
        let dir = test_dir();
        let store = std::sync::Arc::new(FileSecretStore::open(&dir).unwrap());
        for round in 0..20 {
            let name = format!("race-{}", round);
            let handles: Vec<_> = (0..8u8)
                .map(|i| {
                    let store = store.clone();
                    let name = name.clone();
                    std::thread::spawn(move || {
                        match store.create(Secret::new(name.clone()).with_entry("key", vec![i; 32])) {
                            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                            Err(e) => panic!("create failed: {}", e),
                        }
                        store.get(&name).unwrap()
                    })
                })
                .collect();
            let seen: Vec<Secret> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert!(seen.iter().all(|s| s == &seen[0]));
            assert_eq!(seen[0].data["key"].len(), 32);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_rejects_path_names() {
        let dir = test_dir();
        let store = FileSecretStore::open(&dir).unwrap();
        for bad in ["", "../escape", ".hidden", "a/b"] {
            assert_eq!(store.get(bad), Err(StoreError::InvalidName(bad.into())));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
