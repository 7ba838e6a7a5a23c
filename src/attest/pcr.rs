//! PCR selection bitmaps and composite digests

use super::report::{decode_digest, MAX_PCR_INDEX};
use super::tpm::{PcrSelection, PCR_SELECT_MAX, TPM_ALG_SHA256};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcrError {
    #[error("PCR {0} selected by the quote is missing from the report")]
    Missing(u32),

    #[error("PCR {0} is not a hex digest")]
    Malformed(u32),

    #[error("PCR index {0} out of range")]
    OutOfRange(u32),
}

/// Indices selected by a bitmap: bit `i` of byte `b` selects `8*b + i`
pub fn selected_indices(select: &[u8]) -> Vec<u32> {
    let mut indices = Vec::new();
    for (b, byte) in select.iter().enumerate() {
        for i in 0..8 {
            if byte & (1 << i) != 0 {
                indices.push(8 * b as u32 + i);
            }
        }
    }
    indices
}

/// First SHA-256 bank in a selection list
pub fn sha256_bank(selections: &[PcrSelection]) -> Option<&PcrSelection> {
    selections.iter().find(|s| s.hash == TPM_ALG_SHA256)
}

/// Build a SHA-256 selection covering `indices`
pub fn sha256_selection(indices: impl IntoIterator<Item = u32>) -> Result<PcrSelection, PcrError> {
    let mut select = vec![0u8; PCR_SELECT_MAX];
    for index in indices {
        if index > MAX_PCR_INDEX {
            return Err(PcrError::OutOfRange(index));
        }
        select[(index / 8) as usize] |= 1 << (index % 8);
    }
    Ok(PcrSelection {
        hash: TPM_ALG_SHA256,
        select,
    })
}

/// SHA-256 over the raw values of `indices`, in ascending order
pub fn compute_pcr_digest(pcrs: &BTreeMap<u32, String>, indices: &[u32]) -> Result<[u8; 32], PcrError> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut h = Sha256::new();
    for index in sorted {
        let value = pcrs.get(&index).ok_or(PcrError::Missing(index))?;
        let raw = decode_digest(value).ok_or(PcrError::Malformed(index))?;
        h.update(&raw);
    }
    Ok(h.finalize().into())
}
