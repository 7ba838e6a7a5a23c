//! Software quote signer
//!
//! Produces reports in exactly the shape a TPM-backed node submits, using a
//! P-256 key held in memory. Used by the demo, the bench and the tests; it
//! carries no trust of its own.

use super::pcr::{compute_pcr_digest, sha256_selection, PcrError};
use super::report::{AttestationReport, ComponentMeasurement};
use super::tpm::{Attest, ClockInfo, EcdsaSignature, QuoteInfo, TPM_ALG_SHA256};
use chrono::Utc;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("PCR error: {0}")]
    Pcr(#[from] PcrError),

    #[error("Public key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("Signing failed")]
    Signing,
}

/// An attestation key that signs quotes
pub struct QuoteSigner {
    key: SigningKey,
}

impl QuoteSigner {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_key(key: SigningKey) -> Self {
        Self { key }
    }

    /// DER SubjectPublicKeyInfo, hex-encoded
    pub fn public_key_hex(&self) -> Result<String, EvidenceError> {
        let der = self
            .key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| EvidenceError::KeyEncoding(e.to_string()))?;
        Ok(hex::encode(der.as_bytes()))
    }

    /// Build an unsigned quote over every PCR in `pcrs`
    pub fn quote(&self, challenge: &[u8], pcrs: &BTreeMap<u32, String>) -> Result<Attest, EvidenceError> {
        let indices: Vec<u32> = pcrs.keys().copied().collect();
        let selection = sha256_selection(indices.iter().copied())?;
        let pcr_digest = compute_pcr_digest(pcrs, &indices)?;

        let mut name = TPM_ALG_SHA256.to_be_bytes().to_vec();
        name.extend_from_slice(&Sha256::digest(self.key.verifying_key().to_encoded_point(false).as_bytes()));

        Ok(Attest {
            qualified_signer: name,
            extra_data: challenge.to_vec(),
            clock_info: ClockInfo {
                clock: Utc::now().timestamp_millis().max(0) as u64,
                reset_count: 0,
                restart_count: 0,
                safe: true,
            },
            firmware_version: 0,
            quote: QuoteInfo {
                pcr_select: vec![selection],
                pcr_digest: pcr_digest.to_vec(),
            },
        })
    }

    /// Sign a quote and wrap it into a report
    pub fn sign_attest(
        &self,
        attest: &Attest,
        pcrs: BTreeMap<u32, String>,
        components: Vec<ComponentMeasurement>,
    ) -> Result<AttestationReport, EvidenceError> {
        let quote = attest.encode();
        let digest = Sha256::digest(&quote);
        let signature: Signature = self
            .key
            .sign_prehash(&digest)
            .map_err(|_| EvidenceError::Signing)?;
        let (r, s) = signature.split_bytes();

        let tpm_sig = EcdsaSignature {
            hash: TPM_ALG_SHA256,
            r: r.to_vec(),
            s: s.to_vec(),
        };

        Ok(AttestationReport {
            components,
            pcrs,
            quote: hex::encode(quote),
            signature: hex::encode(tpm_sig.encode()),
            public_key: self.public_key_hex()?,
            timestamp: Utc::now(),
        })
    }

    /// Quote, sign and wrap in one step
    pub fn attest(
        &self,
        challenge: &[u8],
        pcrs: &BTreeMap<u32, String>,
        components: Vec<ComponentMeasurement>,
    ) -> Result<AttestationReport, EvidenceError> {
        let attest = self.quote(challenge, pcrs)?;
        self.sign_attest(&attest, pcrs.clone(), components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::pcr::selected_indices;

    #[test]
    fn test_quote_covers_all_reported_pcrs() {
        let signer = QuoteSigner::generate();
        let pcrs: BTreeMap<u32, String> =
            [(0, "aa".repeat(32)), (9, "bb".repeat(32))].into_iter().collect();

        let attest = signer.quote(b"nonce", &pcrs).unwrap();
        assert_eq!(attest.extra_data, b"nonce");
        assert_eq!(selected_indices(&attest.quote.pcr_select[0].select), vec![0, 9]);
        assert_eq!(attest.qualified_signer.len(), 34);
    }

    #[test]
    fn test_rejects_out_of_range_pcr() {
        let signer = QuoteSigner::generate();
        let pcrs: BTreeMap<u32, String> = [(30, "aa".repeat(32))].into_iter().collect();
        assert!(matches!(
            signer.quote(b"nonce", &pcrs),
            Err(EvidenceError::Pcr(PcrError::OutOfRange(30)))
        ));
    }

    #[test]
    fn test_report_fields_are_hex() {
        let signer = QuoteSigner::generate();
        let report = signer.attest(&[1; 32], &BTreeMap::new(), vec![]).unwrap();
        assert!(hex::decode(&report.quote).is_ok());
        assert!(hex::decode(&report.signature).is_ok());
        assert!(hex::decode(&report.public_key).is_ok());
    }
}
