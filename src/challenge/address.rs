//! Caller address canonicalization
//!
//! Challenges are bound to the caller's IP only. Ports are stripped, IPv6 is
//! rendered in its compressed form and IPv4-mapped IPv6 collapses to IPv4, so
//! the same host always yields the same string.

use super::ChallengeError;
use std::net::{IpAddr, SocketAddr};

/// Canonical textual form of a caller address
pub fn canonicalize(addr: &str) -> Result<String, ChallengeError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ChallengeError::InvalidAddress(addr.to_string()));
    }

    let ip = if let Ok(sock) = trimmed.parse::<SocketAddr>() {
        sock.ip()
    } else if let Ok(ip) = trimmed.parse::<IpAddr>() {
        ip
    } else if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        inner
            .parse::<IpAddr>()
            .map_err(|_| ChallengeError::InvalidAddress(addr.to_string()))?
    } else {
        return Err(ChallengeError::InvalidAddress(addr.to_string()));
    };

    Ok(ip.to_canonical().to_string())
}
