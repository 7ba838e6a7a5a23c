//! Attestation report and policy types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest PCR index a report may carry
pub const MAX_PCR_INDEX: u32 = 23;

/// A measured boot component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMeasurement {
    /// Component identifier (e.g. "kernel", "initrd")
    pub name: String,
    /// Hex digest of the component content
    pub measurement: String,
    /// Free-form supporting data
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
}

impl ComponentMeasurement {
    pub fn new(name: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measurement: measurement.into(),
            evidence: BTreeMap::new(),
        }
    }
}

/// What a node submits to prove its integrity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReport {
    #[serde(default)]
    pub components: Vec<ComponentMeasurement>,
    /// PCR index → hex digest (optional `0x` prefix)
    #[serde(default)]
    pub pcrs: BTreeMap<u32, String>,
    /// Hex-encoded marshalled TPMS_ATTEST
    pub quote: String,
    /// Hex-encoded marshalled TPMT_SIGNATURE
    pub signature: String,
    /// Hex-encoded DER (SubjectPublicKeyInfo) attestation key
    pub public_key: String,
    pub timestamp: DateTime<Utc>,
}

impl AttestationReport {
    pub fn component(&self, name: &str) -> impl Iterator<Item = &ComponentMeasurement> {
        let name = name.to_string();
        self.components.iter().filter(move |c| c.name == name)
    }
}

/// Expected values configured by an operator for a deployment.
///
/// Every listed entry must match; the report may carry more.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub components: Vec<ComponentMeasurement>,
    #[serde(default)]
    pub pcrs: BTreeMap<u32, String>,
}

impl Policy {
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.pcrs.is_empty()
    }

    pub fn require_pcr(mut self, index: u32, digest: impl Into<String>) -> Self {
        self.pcrs.insert(index, digest.into());
        self
    }

    pub fn require_component(mut self, name: impl Into<String>, measurement: impl Into<String>) -> Self {
        self.components.push(ComponentMeasurement::new(name, measurement));
        self
    }
}

/// Decode a hex digest, tolerating a `0x`/`0X` prefix and either case
pub fn decode_digest(value: &str) -> Option<Vec<u8>> {
    let trimmed = value.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(hex_part).ok()
}

/// Byte equality of two hex digests; undecodable values never match
pub fn digests_equal(a: &str, b: &str) -> bool {
    match (decode_digest(a), decode_digest(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_digest_prefixes() {
        assert_eq!(decode_digest("0xAABB"), Some(vec![0xaa, 0xbb]));
        assert_eq!(decode_digest("0Xaabb"), Some(vec![0xaa, 0xbb]));
        assert_eq!(decode_digest("aabb"), Some(vec![0xaa, 0xbb]));
        assert_eq!(decode_digest("0xzz"), None);
        assert_eq!(decode_digest("abc"), None);
    }

    #[test]
    fn test_digests_equal_ignores_case() {
        assert!(digests_equal("0xDEADBEEF", "deadbeef"));
        assert!(!digests_equal("deadbeef", "deadbeee"));
        assert!(!digests_equal("nothex", "nothex"));
    }

    #[test]
    fn test_report_json_shape() {
        let json = r#"{
            "components": [{"name": "kernel", "measurement": "aa"}],
            "pcrs": {"0": "0xaa", "7": "bb"},
            "quote": "00",
            "signature": "00",
            "publicKey": "00",
            "timestamp": "2026-01-01T00:00:00Z"
        }"#;
        let report: AttestationReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.pcrs.get(&7).map(String::as_str), Some("bb"));
        assert_eq!(report.component("kernel").count(), 1);
        assert!(report.components[0].evidence.is_empty());

        let policy: Policy = serde_json::from_str(r#"{"pcrs": {"0": "aa"}}"#).unwrap();
        assert!(policy.components.is_empty());
        assert!(!policy.is_empty());
    }
}
