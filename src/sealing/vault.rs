//! Node key vault
//!
//! One 32-byte sealing key per node, created on first use and never
//! regenerated. Concurrent first use is settled by the store's
//! create-if-absent: the loser re-reads and adopts the winner's key.

use super::crypto::{self, CryptoError, KEY_SIZE};
use super::store::{Secret, SecretStore, StoreError};
use super::volume::{parse_volume_key_sets, VolumeKeySet};
use crate::error::ErrorKind;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Entry holding the node key inside its secret
pub const NODE_KEY_ENTRY: &str = "key";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_NODE: &str = "fleet-trust/node";
const MANAGER: &str = "fleet-trust";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid node identity: {0:?}")]
    InvalidNodeIdentity(String),

    #[error("Invalid volume prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("Nothing to seal")]
    EmptyPayload,

    #[error("No sealing key for node {0}")]
    NodeKeyNotFound(String),

    #[error("Stored key for node {0} is corrupt")]
    CorruptKey(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::InvalidNodeIdentity(_)
            | VaultError::InvalidPrefix(_)
            | VaultError::EmptyPayload => ErrorKind::InvalidInput,
            VaultError::NodeKeyNotFound(_) => ErrorKind::NotFound,
            VaultError::CorruptKey(_) => ErrorKind::Storage,
            VaultError::Crypto(CryptoError::CiphertextTooShort) => ErrorKind::InvalidInput,
            VaultError::Crypto(_) => ErrorKind::CryptoVerificationFailed,
            VaultError::Store(e) => e.kind(),
        }
    }
}

/// Per-node key lifecycle over an external secret store
pub struct NodeKeyVault {
    store: Arc<dyn SecretStore>,
    secret_prefix: String,
    /// Serializes read-merge-write of volumes secrets
    volume_writes: Mutex<()>,
}

impl NodeKeyVault {
    pub fn new(store: Arc<dyn SecretStore>, secret_prefix: impl Into<String>) -> Self {
        Self {
            store,
            secret_prefix: secret_prefix.into(),
            volume_writes: Mutex::new(()),
        }
    }

    /// Canonical (lowercase hyphenated) node identity
    pub fn node_id(node_identity: &str) -> Result<String, VaultError> {
        Uuid::parse_str(node_identity.trim())
            .map(|id| id.hyphenated().to_string())
            .map_err(|_| VaultError::InvalidNodeIdentity(node_identity.to_string()))
    }

    pub fn key_secret_name(&self, node_id: &str) -> String {
        format!("{}{}", self.secret_prefix, node_id)
    }

    pub fn volumes_secret_name(&self, node_id: &str) -> String {
        format!("{}{}-volumes", self.secret_prefix, node_id)
    }

    fn labeled(&self, name: String, node_id: &str) -> Secret {
        Secret::new(name)
            .with_label(LABEL_MANAGED_BY, MANAGER)
            .with_label(LABEL_NODE, node_id)
    }

    /// Existing key for the node, or a new random one persisted on first use
    pub fn get_or_create_node_key(&self, node_identity: &str) -> Result<[u8; KEY_SIZE], VaultError> {
        let node_id = Self::node_id(node_identity)?;
        let name = self.key_secret_name(&node_id);

        match self.store.get(&name) {
            Ok(secret) => return key_from(&secret, &node_id),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let key = crypto::random_key();
        let secret = self
            .labeled(name.clone(), &node_id)
            .with_entry(NODE_KEY_ENTRY, key.to_vec());

        match self.store.create(secret) {
            Ok(()) => {
                info!("Created sealing key for node {}", node_id);
                Ok(key)
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!("Lost key creation race for node {}, adopting stored key", node_id);
                let secret = self.store.get(&name)?;
                key_from(&secret, &node_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Existing key only; never creates one
    pub fn node_key(&self, node_identity: &str) -> Result<[u8; KEY_SIZE], VaultError> {
        let node_id = Self::node_id(node_identity)?;
        match self.store.get(&self.key_secret_name(&node_id)) {
            Ok(secret) => key_from(&secret, &node_id),
            Err(StoreError::NotFound(_)) => Err(VaultError::NodeKeyNotFound(node_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Seal under the node key. Not bound to any request context.
    pub fn seal(&self, node_identity: &str, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        if plaintext.is_empty() {
            return Err(VaultError::EmptyPayload);
        }
        let key = self.get_or_create_node_key(node_identity)?;
        Ok(crypto::encrypt(&key, plaintext, &[])?)
    }

    pub fn unseal(&self, node_identity: &str, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
        if ciphertext.is_empty() {
            return Err(VaultError::EmptyPayload);
        }
        let key = self.node_key(node_identity)?;
        Ok(crypto::decrypt(&key, ciphertext, &[])?)
    }

    /// Write (or replace) one volume key set in the node's volumes secret.
    ///
    /// Writes through this vault are serialized, so concurrent calls for
    /// different prefixes all land. The store has no compare-and-swap: two
    /// vaults (or processes) writing the same node's volumes at once can still
    /// lose one of the sets.
    pub fn store_volume_key_set(&self, node_identity: &str, set: &VolumeKeySet) -> Result<(), VaultError> {
        let node_id = Self::node_id(node_identity)?;
        validate_prefix(&set.prefix)?;
        let name = self.volumes_secret_name(&node_id);

        let _guard = self
            .volume_writes
            .lock()
            .map_err(|_| StoreError::Backend("volume write lock poisoned".into()))?;

        let existing = match self.store.get(&name) {
            Ok(secret) => Some(secret),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            Some(mut secret) => {
                secret.data.extend(set.entries());
                self.store.update(secret)?;
            }
            None => {
                let mut secret = self.labeled(name.clone(), &node_id);
                secret.data.extend(set.entries());
                match self.store.create(secret) {
                    Ok(()) => {}
                    Err(StoreError::AlreadyExists(_)) => {
                        let mut secret = self.store.get(&name)?;
                        secret.data.extend(set.entries());
                        self.store.update(secret)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!("Stored volume key set '{}' for node {}", set.prefix, node_id);
        Ok(())
    }

    /// All complete volume key sets stored for the node (empty if none)
    pub fn volume_key_sets(&self, node_identity: &str) -> Result<Vec<VolumeKeySet>, VaultError> {
        let node_id = Self::node_id(node_identity)?;
        match self.store.get(&self.volumes_secret_name(&node_id)) {
            Ok(secret) => Ok(parse_volume_key_sets(&secret.data)),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn key_from(secret: &Secret, node_id: &str) -> Result<[u8; KEY_SIZE], VaultError> {
    secret
        .data
        .get(NODE_KEY_ENTRY)
        .and_then(|k| <[u8; KEY_SIZE]>::try_from(k.as_slice()).ok())
        .ok_or_else(|| VaultError::CorruptKey(node_id.to_string()))
}

pub fn validate_prefix(prefix: &str) -> Result<(), VaultError> {
    if !prefix.is_empty() && !prefix.contains('/') {
        Ok(())
    } else {
        Err(VaultError::InvalidPrefix(prefix.to_string()))
    }
}
