//! Attestation: verify a node's TPM quote and compare it to policy
//!
//! - **Report**: the node's measurements, PCR values and signed quote
//! - **TPM codec**: bounds-checked decoding of `TPMS_ATTEST` / `TPMT_SIGNATURE`
//! - **PCR**: selection bitmaps and composite digests
//! - **Verifier**: challenge binding, signature, PCR digest, then policy
//! - **Evidence**: a software signer producing well-formed reports

pub mod evidence;
pub mod pcr;
pub mod report;
pub mod tpm;
pub mod verifier;

pub use evidence::{EvidenceError, QuoteSigner};
pub use pcr::{compute_pcr_digest, selected_indices, PcrError};
pub use report::{AttestationReport, ComponentMeasurement, Policy};
pub use tpm::{Attest, CodecError, EcdsaSignature, PcrSelection, QuoteInfo};
pub use verifier::{check_policy, verify_evidence, verify_report, PolicyMismatch, Verdict, VerifyError};
