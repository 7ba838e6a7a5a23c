//! Report verification
//!
//! Verification runs in a fixed order and stops at the first failure:
//! 1. Decode the quote and check its embedded challenge
//! 2. Hash the raw quote
//! 3. Verify the ECDSA signature over that hash
//! 4. Locate the SHA-256 PCR selection
//! 5. Recompute the PCR composite digest from the reported values
//! 6. Compare components and PCRs against the policy
//!
//! Steps 1-5 prove the report is authentic; only then is it compared to the
//! policy. An authentic report that fails policy yields
//! [`Verdict::Untrusted`], never an error.

use super::pcr::{compute_pcr_digest, selected_indices, sha256_bank, PcrError};
use super::report::{digests_equal, AttestationReport, Policy, MAX_PCR_INDEX};
use super::tpm::{Attest, CodecError, EcdsaSignature, QuoteInfo, TPM_ALG_SHA256};
use crate::error::ErrorKind;
use log::{debug, info};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Verification failures. None of these grants any trust.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Malformed quote: {0}")]
    MalformedQuote(String),

    #[error("Unexpected attestation type 0x{0:04x}")]
    UnexpectedAttestationType(u16),

    #[error("Quote does not carry the expected challenge")]
    ChallengeMismatch,

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Malformed public key")]
    MalformedPublicKey,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Quote has no SHA-256 PCR selection")]
    NoPcrSelection,

    #[error("PCR {0} selected by the quote is missing from the report")]
    MissingPcr(u32),

    #[error("Malformed PCR value for index {0}")]
    MalformedPcr(u32),

    #[error("PCR composite digest does not match the quote")]
    PcrDigestMismatch,
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyError::ChallengeMismatch
            | VerifyError::SignatureInvalid
            | VerifyError::PcrDigestMismatch => ErrorKind::CryptoVerificationFailed,
            _ => ErrorKind::MalformedEvidence,
        }
    }
}

impl From<PcrError> for VerifyError {
    fn from(e: PcrError) -> Self {
        match e {
            PcrError::Missing(i) => VerifyError::MissingPcr(i),
            PcrError::Malformed(i) | PcrError::OutOfRange(i) => VerifyError::MalformedPcr(i),
        }
    }
}

/// A single failed policy check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyMismatch {
    /// Policy component absent from the report (`found: None`) or measured differently
    ComponentMismatch {
        name: String,
        expected: String,
        found: Option<String>,
    },
    /// Policy PCR absent from the report (`found: None`) or holding another value
    PcrMismatch {
        index: u32,
        expected: String,
        found: Option<String>,
    },
}

impl PolicyMismatch {
    pub fn is_missing(&self) -> bool {
        match self {
            PolicyMismatch::ComponentMismatch { found, .. }
            | PolicyMismatch::PcrMismatch { found, .. } => found.is_none(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PolicyMismatch::ComponentMismatch { name, found: None, .. } => {
                format!("component '{}' missing", name)
            }
            PolicyMismatch::ComponentMismatch { name, .. } => {
                format!("component '{}' measurement differs", name)
            }
            PolicyMismatch::PcrMismatch { index, found: None, .. } => {
                format!("PCR {} missing", index)
            }
            PolicyMismatch::PcrMismatch { index, .. } => format!("PCR {} differs", index),
        }
    }
}

/// Outcome of verifying an authentic report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Trusted,
    Untrusted { mismatches: Vec<PolicyMismatch> },
}

impl Verdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Verdict::Trusted)
    }

    /// `PolicyMismatch` for an untrusted verdict
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Verdict::Trusted => None,
            Verdict::Untrusted { .. } => Some(ErrorKind::PolicyMismatch),
        }
    }

    pub fn mismatches(&self) -> &[PolicyMismatch] {
        match self {
            Verdict::Trusted => &[],
            Verdict::Untrusted { mismatches } => mismatches,
        }
    }
}

/// Verify `report` against `policy`, requiring the quote to embed `expected_challenge`
pub fn verify_report(
    report: &AttestationReport,
    policy: &Policy,
    expected_challenge: &[u8],
) -> Result<Verdict, VerifyError> {
    let quote = verify_evidence(report, expected_challenge)?;
    debug!(
        "Report evidence verified ({} PCR bank(s) selected)",
        quote.pcr_select.len()
    );

    let mismatches = check_policy(report, policy, &quote);
    if mismatches.is_empty() {
        info!("Report trusted");
        Ok(Verdict::Trusted)
    } else {
        let failed: Vec<String> = mismatches.iter().map(PolicyMismatch::describe).collect();
        info!("Report untrusted: {}", failed.join(", "));
        Ok(Verdict::Untrusted { mismatches })
    }
}

/// Authenticity checks: challenge binding, signature and PCR digest
pub fn verify_evidence(
    report: &AttestationReport,
    expected_challenge: &[u8],
) -> Result<QuoteInfo, VerifyError> {
    // 1. Decode and bind to this transaction
    let quote_bytes =
        hex::decode(&report.quote).map_err(|e| VerifyError::MalformedQuote(e.to_string()))?;
    let attest = Attest::decode(&quote_bytes).map_err(|e| match e {
        CodecError::UnexpectedType(t) => VerifyError::UnexpectedAttestationType(t),
        other => VerifyError::MalformedQuote(other.to_string()),
    })?;
    if attest.extra_data != expected_challenge {
        return Err(VerifyError::ChallengeMismatch);
    }

    // 2. What the signature covers
    let digest = Sha256::digest(&quote_bytes);

    // 3. Authenticity
    let key = decode_public_key(&report.public_key)?;
    let signature = decode_signature(&report.signature)?;
    key.verify_prehash(&digest, &signature)
        .map_err(|_| VerifyError::SignatureInvalid)?;

    // 4. Which PCRs the TPM measured
    let bank = sha256_bank(&attest.quote.pcr_select).ok_or(VerifyError::NoPcrSelection)?;
    let indices = selected_indices(&bank.select);

    // 5. Reported PCR values must be exactly the signed ones
    if let Some(&index) = report.pcrs.keys().find(|&&i| i > MAX_PCR_INDEX) {
        return Err(VerifyError::MalformedPcr(index));
    }
    let computed = compute_pcr_digest(&report.pcrs, &indices)?;
    if computed.as_slice() != attest.quote.pcr_digest.as_slice() {
        return Err(VerifyError::PcrDigestMismatch);
    }

    Ok(attest.quote)
}

/// Subset comparison: every policy entry must be matched by the report.
///
/// Policy PCRs are compared only against indices the quote's SHA-256 bank
/// selects; a reported value outside the selection counts as absent.
pub fn check_policy(report: &AttestationReport, policy: &Policy, quote: &QuoteInfo) -> Vec<PolicyMismatch> {
    let mut mismatches = Vec::new();
    let signed: Vec<u32> = sha256_bank(&quote.pcr_select)
        .map(|bank| selected_indices(&bank.select))
        .unwrap_or_default();

    for expected in &policy.components {
        let mut candidates = report.component(&expected.name).peekable();
        if candidates.peek().is_none() {
            mismatches.push(PolicyMismatch::ComponentMismatch {
                name: expected.name.clone(),
                expected: expected.measurement.clone(),
                found: None,
            });
            continue;
        }
        let mut first = None;
        let mut matched = false;
        for c in candidates {
            if digests_equal(&c.measurement, &expected.measurement) {
                matched = true;
                break;
            }
            first.get_or_insert_with(|| c.measurement.clone());
        }
        if !matched {
            mismatches.push(PolicyMismatch::ComponentMismatch {
                name: expected.name.clone(),
                expected: expected.measurement.clone(),
                found: first,
            });
        }
    }

    for (&index, expected) in &policy.pcrs {
        let found = report.pcrs.get(&index).filter(|_| signed.contains(&index));
        if found.is_none() && report.pcrs.contains_key(&index) {
            debug!("PCR {} reported but not covered by the quote", index);
        }
        match found {
            Some(found) if digests_equal(found, expected) => {}
            found => mismatches.push(PolicyMismatch::PcrMismatch {
                index,
                expected: expected.clone(),
                found: found.cloned(),
            }),
        }
    }

    mismatches
}

fn decode_public_key(hex_der: &str) -> Result<VerifyingKey, VerifyError> {
    let der = hex::decode(hex_der).map_err(|_| VerifyError::MalformedPublicKey)?;
    VerifyingKey::from_public_key_der(&der).map_err(|_| VerifyError::MalformedPublicKey)
}

fn decode_signature(hex_sig: &str) -> Result<Signature, VerifyError> {
    let raw = hex::decode(hex_sig).map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
    let sig = EcdsaSignature::decode(&raw).map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
    if sig.hash != TPM_ALG_SHA256 {
        return Err(VerifyError::MalformedSignature(format!(
            "unsupported hash 0x{:04x}",
            sig.hash
        )));
    }

    let mut scalars = [0u8; 64];
    place_scalar(&sig.r, &mut scalars[..32])?;
    place_scalar(&sig.s, &mut scalars[32..])?;
    // Zero or out-of-range scalars
    Signature::from_slice(&scalars).map_err(|_| VerifyError::SignatureInvalid)
}

/// Left-pad a big-endian scalar into a 32-byte slot
fn place_scalar(value: &[u8], slot: &mut [u8]) -> Result<(), VerifyError> {
    let start = value.iter().position(|&b| b != 0).unwrap_or(value.len());
    let trimmed = &value[start..];
    if trimmed.len() > slot.len() {
        return Err(VerifyError::MalformedSignature("scalar exceeds 32 bytes".into()));
    }
    let offset = slot.len() - trimmed.len();
    slot[offset..].copy_from_slice(trimmed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::evidence::QuoteSigner;
    use crate::attest::report::ComponentMeasurement;
    use std::collections::BTreeMap;

    const CHALLENGE: [u8; 32] = [0x42; 32];

    fn pcrs() -> BTreeMap<u32, String> {
        [(0, "aa".repeat(32)), (7, "bb".repeat(32))].into_iter().collect()
    }

    fn components() -> Vec<ComponentMeasurement> {
        vec![
            ComponentMeasurement::new("kernel", "11".repeat(32)),
            ComponentMeasurement::new("initrd", "22".repeat(32)),
            ComponentMeasurement::new("extra-tool", "33".repeat(32)),
        ]
    }

    fn policy() -> Policy {
        Policy::default()
            .require_pcr(0, "aa".repeat(32))
            .require_component("kernel", "11".repeat(32))
            .require_component("initrd", "0x".to_string() + &"22".repeat(32))
    }

    fn signed_report(signer: &QuoteSigner) -> AttestationReport {
        signer.attest(&CHALLENGE, &pcrs(), components()).unwrap()
    }

    /// Flip one nibble of a hex string at `pos`
    fn flip_hex(s: &str, pos: usize) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        chars[pos] = if chars[pos] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_trusted_with_extra_entries() {
        let signer = QuoteSigner::generate();
        let verdict = verify_report(&signed_report(&signer), &policy(), &CHALLENGE).unwrap();
        assert_eq!(verdict, Verdict::Trusted);
        assert!(verdict.kind().is_none());
    }

    #[test]
    fn test_missing_component_is_untrusted_not_error() {
        let signer = QuoteSigner::generate();
        let mut comps = components();
        comps.retain(|c| c.name != "initrd");
        let report = signer.attest(&CHALLENGE, &pcrs(), comps).unwrap();

        let verdict = verify_report(&report, &policy(), &CHALLENGE).unwrap();
        assert_eq!(verdict.kind(), Some(ErrorKind::PolicyMismatch));
        match verdict.mismatches() {
            [m @ PolicyMismatch::ComponentMismatch { name, .. }] => {
                assert_eq!(name, "initrd");
                assert!(m.is_missing());
            }
            other => panic!("unexpected mismatches: {:?}", other),
        }
    }

    #[test]
    fn test_component_measurement_differs() {
        let signer = QuoteSigner::generate();
        let mut comps = components();
        comps[0].measurement = "ff".repeat(32);
        let report = signer.attest(&CHALLENGE, &pcrs(), comps).unwrap();

        let verdict = verify_report(&report, &policy(), &CHALLENGE).unwrap();
        assert_eq!(
            verdict.mismatches(),
            &[PolicyMismatch::ComponentMismatch {
                name: "kernel".into(),
                expected: "11".repeat(32),
                found: Some("ff".repeat(32)),
            }]
        );
    }

    #[test]
    fn test_signed_pcr_that_fails_policy() {
        let signer = QuoteSigner::generate();
        let mut values = pcrs();
        values.insert(0, flip_hex(&values[&0], 5));
        let report = signer.attest(&CHALLENGE, &values, components()).unwrap();

        let verdict = verify_report(&report, &policy(), &CHALLENGE).unwrap();
        assert!(matches!(
            verdict.mismatches(),
            [PolicyMismatch::PcrMismatch { index: 0, found: Some(_), .. }]
        ));
    }

    #[test]
    fn test_policy_pcr_absent_from_report() {
        let signer = QuoteSigner::generate();
        let report = signed_report(&signer);
        let policy = policy().require_pcr(4, "cc".repeat(32));

        let verdict = verify_report(&report, &policy, &CHALLENGE).unwrap();
        assert!(matches!(
            verdict.mismatches(),
            [PolicyMismatch::PcrMismatch { index: 4, found: None, .. }]
        ));
    }

    #[test]
    fn test_unsigned_pcr_cannot_satisfy_policy() {
        let signer = QuoteSigner::generate();
        let only_seven: BTreeMap<u32, String> = [(7, "bb".repeat(32))].into_iter().collect();
        let mut report = signer.attest(&CHALLENGE, &only_seven, components()).unwrap();
        // Golden value added after signing, outside the quote's selection
        report.pcrs.insert(0, "aa".repeat(32));

        let verdict = verify_report(&report, &policy(), &CHALLENGE).unwrap();
        assert!(!verdict.is_trusted());
        assert_eq!(
            verdict.mismatches(),
            &[PolicyMismatch::PcrMismatch {
                index: 0,
                expected: "aa".repeat(32),
                found: None,
            }]
        );
    }

    #[test]
    fn test_challenge_mismatch() {
        let signer = QuoteSigner::generate();
        let report = signed_report(&signer);
        let result = verify_report(&report, &policy(), &[0x43; 32]);
        assert_eq!(result, Err(VerifyError::ChallengeMismatch));
        assert_eq!(VerifyError::ChallengeMismatch.kind(), ErrorKind::CryptoVerificationFailed);
    }

    #[test]
    fn test_forged_pcr_value_breaks_digest() {
        let signer = QuoteSigner::generate();
        let mut report = signed_report(&signer);
        let forged = flip_hex(&report.pcrs[&7], 0);
        report.pcrs.insert(7, forged);

        let result = verify_report(&report, &policy(), &CHALLENGE);
        assert_eq!(result, Err(VerifyError::PcrDigestMismatch));
    }

    #[test]
    fn test_unselected_pcr_missing_from_report() {
        let signer = QuoteSigner::generate();
        let mut report = signed_report(&signer);
        report.pcrs.remove(&7);

        let result = verify_report(&report, &policy(), &CHALLENGE);
        assert_eq!(result, Err(VerifyError::MissingPcr(7)));
    }

    #[test]
    fn test_pcr_index_out_of_range() {
        let signer = QuoteSigner::generate();
        let mut report = signed_report(&signer);
        report.pcrs.insert(24, "00".repeat(32));
        assert_eq!(
            verify_report(&report, &policy(), &CHALLENGE),
            Err(VerifyError::MalformedPcr(24))
        );
    }

    #[test]
    fn test_tampered_quote_fails_signature() {
        let signer = QuoteSigner::generate();
        let mut report = signed_report(&signer);
        let mut quote = hex::decode(&report.quote).unwrap();
        let attest = Attest::decode(&quote).unwrap();
        // Inside the clock field: still decodes, no longer matches the signature
        let clock_offset = 4 + 2 + 2 + attest.qualified_signer.len() + 2 + attest.extra_data.len();
        quote[clock_offset] ^= 0x01;
        report.quote = hex::encode(quote);

        assert_eq!(
            verify_report(&report, &policy(), &CHALLENGE),
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[test]
    fn test_wrong_key_fails_signature() {
        let signer = QuoteSigner::generate();
        let other = QuoteSigner::generate();
        let mut report = signed_report(&signer);
        report.public_key = other.public_key_hex().unwrap();

        assert_eq!(
            verify_report(&report, &policy(), &CHALLENGE),
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let signer = QuoteSigner::generate();
        let good = signed_report(&signer);

        let mut r = good.clone();
        r.quote = "zz".into();
        assert!(matches!(verify_report(&r, &policy(), &CHALLENGE), Err(VerifyError::MalformedQuote(_))));

        let mut r = good.clone();
        r.public_key = "3059".into();
        assert_eq!(verify_report(&r, &policy(), &CHALLENGE), Err(VerifyError::MalformedPublicKey));

        let mut r = good.clone();
        r.signature = hex::encode(&hex::decode(&good.signature).unwrap()[..10]);
        assert!(matches!(
            verify_report(&r, &policy(), &CHALLENGE),
            Err(VerifyError::MalformedSignature(_))
        ));

        for e in [VerifyError::MalformedPublicKey, VerifyError::NoPcrSelection, VerifyError::MissingPcr(1)] {
            assert_eq!(e.kind(), ErrorKind::MalformedEvidence);
        }
    }

    #[test]
    fn test_non_quote_attestation_type() {
        let signer = QuoteSigner::generate();
        let mut report = signed_report(&signer);
        let mut quote = hex::decode(&report.quote).unwrap();
        quote[4..6].copy_from_slice(&0x8017u16.to_be_bytes());
        report.quote = hex::encode(quote);

        assert_eq!(
            verify_report(&report, &policy(), &CHALLENGE),
            Err(VerifyError::UnexpectedAttestationType(0x8017))
        );
    }

    #[test]
    fn test_no_sha256_bank() {
        let signer = QuoteSigner::generate();
        let mut attest = signer.quote(&CHALLENGE, &pcrs()).unwrap();
        attest.quote.pcr_select[0].hash = 0x0004; // SHA-1
        let report = signer.sign_attest(&attest, pcrs(), components()).unwrap();

        assert_eq!(
            verify_report(&report, &policy(), &CHALLENGE),
            Err(VerifyError::NoPcrSelection)
        );
    }

    #[test]
    fn test_signature_scalar_padding() {
        let mut slot = [0u8; 32];
        place_scalar(&[0, 0, 1, 2], &mut slot).unwrap();
        assert_eq!(&slot[30..], &[1, 2]);
        assert!(place_scalar(&[1; 33], &mut slot).is_err());

        let zero = EcdsaSignature { hash: TPM_ALG_SHA256, r: vec![0; 32], s: vec![0; 32] };
        assert_eq!(
            decode_signature(&hex::encode(zero.encode())),
            Err(VerifyError::SignatureInvalid)
        );

        let sha1 = EcdsaSignature { hash: 0x0004, r: vec![1; 32], s: vec![1; 32] };
        assert!(matches!(
            decode_signature(&hex::encode(sha1.encode())),
            Err(VerifyError::MalformedSignature(_))
        ));
    }
}
