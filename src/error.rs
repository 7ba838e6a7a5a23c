//! Error taxonomy shared by every component
//!
//! Each module keeps its own concrete error enum; this is the coarse kind the
//! transport layer maps onto a response class.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed address, empty payload, bad node identity
    InvalidInput,
    /// Unknown challenge or unknown node key
    NotFound,
    /// Challenge past its TTL
    Expired,
    /// Challenge bound to a different caller
    AddressMismatch,
    /// Quote, signature or public key could not be decoded
    MalformedEvidence,
    /// Signature, PCR digest, challenge binding or AEAD authentication failed
    CryptoVerificationFailed,
    /// Authenticated report that fails a policy check (a verdict, not a fault)
    PolicyMismatch,
    /// The external secret store failed
    Storage,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Expired => "Expired",
            ErrorKind::AddressMismatch => "AddressMismatch",
            ErrorKind::MalformedEvidence => "MalformedEvidence",
            ErrorKind::CryptoVerificationFailed => "CryptoVerificationFailed",
            ErrorKind::PolicyMismatch => "PolicyMismatch",
            ErrorKind::Storage => "Storage",
        }
    }

    /// Suggested HTTP status for this kind.
    ///
    /// `PolicyMismatch` answers 200: the request succeeded and the node is
    /// reported as untrusted.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::MalformedEvidence => 400,
            ErrorKind::NotFound | ErrorKind::Expired | ErrorKind::AddressMismatch => 401,
            ErrorKind::CryptoVerificationFailed => 403,
            ErrorKind::PolicyMismatch => 200,
            ErrorKind::Storage => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_mismatch_is_not_an_error_status() {
        assert_eq!(ErrorKind::PolicyMismatch.http_status(), 200);
        assert_ne!(
            ErrorKind::PolicyMismatch.http_status(),
            ErrorKind::CryptoVerificationFailed.http_status()
        );
    }

    #[test]
    fn test_challenge_failures_are_unauthorized() {
        for kind in [ErrorKind::NotFound, ErrorKind::Expired, ErrorKind::AddressMismatch] {
            assert_eq!(kind.http_status(), 401);
        }
    }
}
