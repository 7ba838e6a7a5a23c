//! Fleet Trust: remote attestation and sealed node keys
//!
//! Nodes prove their boot state with a signed TPM quote bound to a one-shot
//! challenge, and keep disk-encryption secrets sealed under per-node keys.

pub mod attest;
pub mod challenge;
pub mod config;
pub mod error;
pub mod sealing;
pub mod service;

pub use attest::{AttestationReport, Policy, QuoteSigner, Verdict, VerifyError};
pub use challenge::{Challenge, ChallengeError, ChallengeStore};
pub use config::TrustConfig;
pub use error::ErrorKind;
pub use sealing::{FileSecretStore, MemorySecretStore, NodeKeyVault, SecretStore, VolumeKeySet};
pub use service::{TrustError, TrustService};
