//! Per-volume key sets
//!
//! A node with several encrypted disks stores one key set per disk as three
//! flat entries sharing a prefix: `<prefix>-key`, `<prefix>-nonce` and
//! `<prefix>-sealed`. A set only counts once all three are present.

use super::crypto::{self, CryptoError, KEY_SIZE, NONCE_SIZE};
use log::debug;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};

pub const KEY_SUFFIX: &str = "-key";
pub const NONCE_SUFFIX: &str = "-nonce";
pub const SEALED_SUFFIX: &str = "-sealed";

/// Key material for one encrypted volume
#[derive(Clone, PartialEq, Eq)]
pub struct VolumeKeySet {
    pub prefix: String,
    pub symmetric_key: [u8; KEY_SIZE],
    pub aead_nonce: [u8; NONCE_SIZE],
    pub sealed_payload: Vec<u8>,
}

impl std::fmt::Debug for VolumeKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeKeySet")
            .field("prefix", &self.prefix)
            .field("sealed_payload_len", &self.sealed_payload.len())
            .finish_non_exhaustive()
    }
}

impl VolumeKeySet {
    /// Seal `payload` under a fresh key and nonce, bound to `aad`
    pub fn seal(prefix: &str, payload: &[u8], aad: &[u8]) -> Result<Self, CryptoError> {
        Self::seal_with(prefix, payload, |_| aad.to_vec())
    }

    /// Seal bound to a node and caller. The associated data also covers the
    /// set's own nonce, so it is built after the nonce is drawn.
    pub fn seal_for(prefix: &str, payload: &[u8], node_identity: &str, caller: &str) -> Result<Self, CryptoError> {
        Self::seal_with(prefix, payload, |nonce| {
            crypto::build_associated_data(node_identity, nonce, caller)
        })
    }

    fn seal_with<F>(prefix: &str, payload: &[u8], aad: F) -> Result<Self, CryptoError>
    where
        F: FnOnce(&[u8; NONCE_SIZE]) -> Vec<u8>,
    {
        let symmetric_key = crypto::random_key();
        let mut aead_nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut aead_nonce);

        let aad = aad(&aead_nonce);
        let sealed_payload = crypto::seal_with_nonce(&symmetric_key, &aead_nonce, payload, &aad)?;
        Ok(Self {
            prefix: prefix.to_string(),
            symmetric_key,
            aead_nonce,
            sealed_payload,
        })
    }

    /// Recover the payload; fails unless `aad` is the one used to seal
    pub fn open(&self, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        crypto::open_with_nonce(&self.symmetric_key, &self.aead_nonce, &self.sealed_payload, aad)
    }

    pub fn open_for(&self, node_identity: &str, caller: &str) -> Result<Vec<u8>, CryptoError> {
        self.open(&crypto::build_associated_data(node_identity, &self.aead_nonce, caller))
    }

    /// The three flat entries this set is stored as
    pub fn entries(&self) -> [(String, Vec<u8>); 3] {
        [
            (format!("{}{}", self.prefix, KEY_SUFFIX), self.symmetric_key.to_vec()),
            (format!("{}{}", self.prefix, NONCE_SUFFIX), self.aead_nonce.to_vec()),
            (format!("{}{}", self.prefix, SEALED_SUFFIX), self.sealed_payload.clone()),
        ]
    }
}

#[derive(Default)]
struct Partial<'a> {
    key: Option<&'a [u8]>,
    nonce: Option<&'a [u8]>,
    sealed: Option<&'a [u8]>,
}

/// Group flat entries into key sets. Incomplete groups, and groups whose key
/// or nonce has the wrong length, are skipped. Order is unspecified.
pub fn parse_volume_key_sets(entries: &BTreeMap<String, Vec<u8>>) -> Vec<VolumeKeySet> {
    let mut groups: HashMap<&str, Partial<'_>> = HashMap::new();

    for (name, value) in entries {
        if let Some(prefix) = name.strip_suffix(KEY_SUFFIX) {
            groups.entry(prefix).or_default().key = Some(value.as_slice());
        } else if let Some(prefix) = name.strip_suffix(NONCE_SUFFIX) {
            groups.entry(prefix).or_default().nonce = Some(value.as_slice());
        } else if let Some(prefix) = name.strip_suffix(SEALED_SUFFIX) {
            groups.entry(prefix).or_default().sealed = Some(value.as_slice());
        }
    }

    let mut sets = Vec::with_capacity(groups.len());
    for (prefix, partial) in groups {
        let (Some(key), Some(nonce), Some(sealed)) = (partial.key, partial.nonce, partial.sealed) else {
            debug!("Skipping incomplete volume key set '{}'", prefix);
            continue;
        };
        let (Ok(symmetric_key), Ok(aead_nonce)) =
            (<[u8; KEY_SIZE]>::try_from(key), <[u8; NONCE_SIZE]>::try_from(nonce))
        else {
            debug!("Skipping volume key set '{}' with bad key or nonce length", prefix);
            continue;
        };
        sets.push(VolumeKeySet {
            prefix: prefix.to_string(),
            symmetric_key,
            aead_nonce,
            sealed_payload: sealed.to_vec(),
        });
    }
    sets
}
