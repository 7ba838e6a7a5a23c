//! Challenges: single-use, caller-bound, time-limited anti-replay tokens
//!
//! A client asks for a challenge, embeds it in its TPM quote, and presents it
//! back exactly once. The store guarantees that lookup and removal happen
//! under one lock, so a value can never be consumed twice.

pub mod address;
pub mod store;

pub use address::canonicalize;
pub use store::{Challenge, ChallengeStore, CHALLENGE_BYTES};

use crate::error::ErrorKind;

/// Challenge lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("Invalid caller address: {0:?}")]
    InvalidAddress(String),

    #[error("Challenge not found")]
    NotFound,

    #[error("Challenge expired")]
    Expired,

    #[error("Challenge was issued to a different address")]
    AddressMismatch,
}

impl ChallengeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChallengeError::InvalidAddress(_) => ErrorKind::InvalidInput,
            ChallengeError::NotFound => ErrorKind::NotFound,
            ChallengeError::Expired => ErrorKind::Expired,
            ChallengeError::AddressMismatch => ErrorKind::AddressMismatch,
        }
    }
}
