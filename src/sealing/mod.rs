//! Sealing: per-node secret material under authenticated encryption
//!
//! - **Crypto**: AES-256-GCM seal/open and associated-data construction
//! - **Store**: the external secret store contract plus memory/file backends
//! - **Vault**: per-node key lifecycle and volume key set persistence
//! - **Volume**: multi-disk key sets and their flat-entry grouping
//!
//! Two sealing paths exist. The node key path (`NodeKeyVault::seal`) uses no
//! associated data. Volume key sets are bound to node identity, nonce and
//! caller address through `build_associated_data`.

pub mod crypto;
pub mod store;
pub mod vault;
pub mod volume;

pub use crypto::{build_associated_data, decrypt, encrypt, CryptoError, KEY_SIZE, NONCE_SIZE};
pub use store::{FileSecretStore, MemorySecretStore, Secret, SecretStore, StoreError};
pub use vault::{NodeKeyVault, VaultError};
pub use volume::{parse_volume_key_sets, VolumeKeySet};
