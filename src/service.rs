//! Trust service
//!
//! The operations a transport layer calls: issue a challenge, verify a node's
//! attestation against policy, and seal or unseal per-node secrets.

use crate::attest::{verify_report, AttestationReport, Policy, Verdict, VerifyError};
use crate::challenge::{canonicalize, Challenge, ChallengeError, ChallengeStore};
use crate::config::TrustConfig;
use crate::error::ErrorKind;
use crate::sealing::vault::validate_prefix;
use crate::sealing::{CryptoError, NodeKeyVault, SecretStore, VaultError, VolumeKeySet};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Any failure surfaced by the service
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl From<CryptoError> for TrustError {
    fn from(e: CryptoError) -> Self {
        TrustError::Vault(VaultError::Crypto(e))
    }
}

impl TrustError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrustError::Challenge(e) => e.kind(),
            TrustError::Verify(e) => e.kind(),
            TrustError::Vault(e) => e.kind(),
        }
    }

    /// Unknown node keys are 404; unknown challenges stay 401
    pub fn http_status(&self) -> u16 {
        match self {
            TrustError::Vault(VaultError::NodeKeyNotFound(_)) => 404,
            other => other.kind().http_status(),
        }
    }
}

/// Challenge store plus node key vault behind one API
pub struct TrustService {
    challenges: Arc<ChallengeStore>,
    vault: NodeKeyVault,
}

impl TrustService {
    pub fn new(challenges: Arc<ChallengeStore>, vault: NodeKeyVault) -> Self {
        Self { challenges, vault }
    }

    pub fn from_config(config: &TrustConfig, store: Arc<dyn SecretStore>) -> Self {
        Self::new(
            Arc::new(ChallengeStore::new(config.challenge_ttl())),
            NodeKeyVault::new(store, config.secret_prefix.clone()),
        )
    }

    pub fn challenges(&self) -> &Arc<ChallengeStore> {
        &self.challenges
    }

    pub fn vault(&self) -> &NodeKeyVault {
        &self.vault
    }

    /// Start the background sweep of expired challenges (needs a tokio runtime)
    pub fn start_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
        self.challenges.spawn_sweeper(every)
    }

    pub async fn issue_challenge(&self, caller: &str) -> Result<Challenge, TrustError> {
        Ok(self.challenges.issue(caller).await?)
    }

    /// Consume the caller's challenge, then verify the report against policy.
    ///
    /// The challenge is spent even when verification fails afterwards.
    pub async fn verify_trust(
        &self,
        caller: &str,
        challenge: &str,
        report: &AttestationReport,
        policy: &Policy,
    ) -> Result<Verdict, TrustError> {
        let consumed = self.challenges.consume(caller, challenge).await?;
        let expected = consumed.raw().ok_or(ChallengeError::NotFound)?;

        match verify_report(report, policy, &expected) {
            Ok(verdict) => {
                info!(
                    "Trust check for {}: {}",
                    consumed.bound_address,
                    if verdict.is_trusted() { "trusted" } else { "untrusted" }
                );
                Ok(verdict)
            }
            Err(e) => {
                warn!("Trust check for {} failed ({}): {}", consumed.bound_address, e.kind(), e);
                Err(e.into())
            }
        }
    }

    /// Seal under the node's primary key. Not bound to caller or challenge.
    pub fn seal_node_secret(&self, node_identity: &str, plaintext: &[u8]) -> Result<Vec<u8>, TrustError> {
        Ok(self.vault.seal(node_identity, plaintext)?)
    }

    pub fn unseal_node_secret(&self, node_identity: &str, ciphertext: &[u8]) -> Result<Vec<u8>, TrustError> {
        Ok(self.vault.unseal(node_identity, ciphertext)?)
    }

    /// Seal one volume's secret, bound to node identity and caller address
    pub fn seal_volume_secret(
        &self,
        node_identity: &str,
        caller: &str,
        prefix: &str,
        plaintext: &[u8],
    ) -> Result<(), TrustError> {
        let node_id = NodeKeyVault::node_id(node_identity)?;
        let caller = canonicalize(caller)?;
        validate_prefix(prefix)?;
        if plaintext.is_empty() {
            return Err(VaultError::EmptyPayload.into());
        }

        let set = VolumeKeySet::seal_for(prefix, plaintext, &node_id, &caller)?;
        self.vault.store_volume_key_set(&node_id, &set)?;
        Ok(())
    }

    /// Open every stored volume set for the node; prefix → plaintext.
    ///
    /// Any set that does not open for this caller fails the whole request.
    pub fn unseal_volume_secrets(
        &self,
        node_identity: &str,
        caller: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, TrustError> {
        let node_id = NodeKeyVault::node_id(node_identity)?;
        let caller = canonicalize(caller)?;

        let mut opened = BTreeMap::new();
        for set in self.vault.volume_key_sets(&node_id)? {
            let plaintext = set.open_for(&node_id, &caller).map_err(|e| {
                warn!("Volume set '{}' of node {} rejected for {}", set.prefix, node_id, caller);
                e
            })?;
            opened.insert(set.prefix.clone(), plaintext);
        }
        Ok(opened)
    }
}
