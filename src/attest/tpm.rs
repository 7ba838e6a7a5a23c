//! TPM 2.0 structure codec
//!
//! Decodes the two structures a quote ships with: the marshalled
//! `TPMS_ATTEST` the TPM signs, and the `TPMT_SIGNATURE` over it. All fields
//! are big-endian and bounds-checked; any size, tag or trailing-byte mismatch
//! rejects the whole structure.
//!
//! Layout of a quote (`TPMS_ATTEST` with `TPMS_QUOTE_INFO`):
//!
//! ```text
//! u32   magic            TPM_GENERATED_VALUE
//! u16   type             TPM_ST_ATTEST_QUOTE
//! 2B    qualifiedSigner  TPM2B_NAME
//! 2B    extraData        TPM2B_DATA (the challenge)
//! u64 u32 u32 u8         TPMS_CLOCK_INFO
//! u64   firmwareVersion
//! u32   count            TPML_PCR_SELECTION
//!   u16 hash, u8 sizeofSelect, [u8] pcrSelect   (count times)
//! 2B    pcrDigest        TPM2B_DIGEST
//! ```

pub const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
pub const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;
pub const TPM_ALG_SHA256: u16 = 0x000b;
pub const TPM_ALG_ECDSA: u16 = 0x0018;

/// Largest digest any supported bank produces (SHA-512)
pub const MAX_DIGEST_SIZE: usize = 64;
/// TPMU_NAME: algorithm id + digest
pub const MAX_NAME_SIZE: usize = MAX_DIGEST_SIZE + 2;
/// Bitmap bytes for 24 PCRs
pub const PCR_SELECT_MAX: usize = 3;
/// Number of hash banks a selection list may name
pub const HASH_COUNT_MAX: u32 = 16;
/// ECC parameter size for curves up to P-384
pub const MAX_ECC_PARAM_SIZE: usize = 48;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Truncated {field}: need {need} bytes, {have} left")]
    Truncated {
        field: &'static str,
        need: usize,
        have: usize,
    },

    #[error("Bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("Unexpected attestation type 0x{0:04x}")]
    UnexpectedType(u16),

    #[error("{field} too large: {len} > {max}")]
    Oversize {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Unsupported signature algorithm 0x{0:04x}")]
    UnsupportedSignature(u16),

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// TPMS_CLOCK_INFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

/// TPMS_PCR_SELECTION
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrSelection {
    pub hash: u16,
    pub select: Vec<u8>,
}

/// TPMS_QUOTE_INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteInfo {
    pub pcr_select: Vec<PcrSelection>,
    pub pcr_digest: Vec<u8>,
}

/// A decoded quote (`TPMS_ATTEST` of type quote)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attest {
    pub qualified_signer: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub clock_info: ClockInfo,
    pub firmware_version: u64,
    pub quote: QuoteInfo,
}

impl Attest {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);

        let magic = r.u32("magic")?;
        if magic != TPM_GENERATED_VALUE {
            return Err(CodecError::BadMagic(magic));
        }
        let typ = r.u16("type")?;
        if typ != TPM_ST_ATTEST_QUOTE {
            return Err(CodecError::UnexpectedType(typ));
        }

        let qualified_signer = r.sized("qualifiedSigner", MAX_NAME_SIZE)?.to_vec();
        let extra_data = r.sized("extraData", MAX_DIGEST_SIZE)?.to_vec();
        let clock_info = ClockInfo {
            clock: r.u64("clock")?,
            reset_count: r.u32("resetCount")?,
            restart_count: r.u32("restartCount")?,
            safe: r.u8("safe")? != 0,
        };
        let firmware_version = r.u64("firmwareVersion")?;

        let count = r.u32("pcrSelect.count")?;
        if count > HASH_COUNT_MAX {
            return Err(CodecError::Oversize {
                field: "pcrSelect.count",
                len: count as usize,
                max: HASH_COUNT_MAX as usize,
            });
        }
        let mut pcr_select = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let hash = r.u16("pcrSelection.hash")?;
            let size = r.u8("pcrSelection.sizeofSelect")? as usize;
            if size > PCR_SELECT_MAX {
                return Err(CodecError::Oversize {
                    field: "pcrSelection.sizeofSelect",
                    len: size,
                    max: PCR_SELECT_MAX,
                });
            }
            let select = r.take("pcrSelection.pcrSelect", size)?.to_vec();
            pcr_select.push(PcrSelection { hash, select });
        }
        let pcr_digest = r.sized("pcrDigest", MAX_DIGEST_SIZE)?.to_vec();
        r.finish()?;

        Ok(Self {
            qualified_signer,
            extra_data,
            clock_info,
            firmware_version,
            quote: QuoteInfo {
                pcr_select,
                pcr_digest,
            },
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(128);
        w.extend_from_slice(&TPM_GENERATED_VALUE.to_be_bytes());
        w.extend_from_slice(&TPM_ST_ATTEST_QUOTE.to_be_bytes());
        put_sized(&mut w, &self.qualified_signer);
        put_sized(&mut w, &self.extra_data);
        w.extend_from_slice(&self.clock_info.clock.to_be_bytes());
        w.extend_from_slice(&self.clock_info.reset_count.to_be_bytes());
        w.extend_from_slice(&self.clock_info.restart_count.to_be_bytes());
        w.push(self.clock_info.safe as u8);
        w.extend_from_slice(&self.firmware_version.to_be_bytes());
        w.extend_from_slice(&(self.quote.pcr_select.len() as u32).to_be_bytes());
        for sel in &self.quote.pcr_select {
            w.extend_from_slice(&sel.hash.to_be_bytes());
            w.push(sel.select.len() as u8);
            w.extend_from_slice(&sel.select);
        }
        put_sized(&mut w, &self.quote.pcr_digest);
        w
    }
}

/// TPMT_SIGNATURE restricted to ECDSA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignature {
    pub hash: u16,
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

impl EcdsaSignature {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let alg = r.u16("sigAlg")?;
        if alg != TPM_ALG_ECDSA {
            return Err(CodecError::UnsupportedSignature(alg));
        }
        let hash = r.u16("hash")?;
        let sig_r = r.sized("signatureR", MAX_ECC_PARAM_SIZE)?.to_vec();
        let sig_s = r.sized("signatureS", MAX_ECC_PARAM_SIZE)?.to_vec();
        r.finish()?;
        Ok(Self {
            hash,
            r: sig_r,
            s: sig_s,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(4 + 4 + self.r.len() + self.s.len());
        w.extend_from_slice(&TPM_ALG_ECDSA.to_be_bytes());
        w.extend_from_slice(&self.hash.to_be_bytes());
        put_sized(&mut w, &self.r);
        put_sized(&mut w, &self.s);
        w
    }
}

fn put_sized(w: &mut Vec<u8>, data: &[u8]) {
    w.extend_from_slice(&(data.len() as u16).to_be_bytes());
    w.extend_from_slice(data);
}

/// Bounds-checked big-endian cursor
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], CodecError> {
        let have = self.buf.len() - self.pos;
        if n > have {
            return Err(CodecError::Truncated {
                field,
                need: n,
                have,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.array::<1>(field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array(field)?))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array(field)?))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.array(field)?))
    }

    /// TPM2B: u16 size followed by that many bytes
    fn sized(&mut self, field: &'static str, max: usize) -> Result<&'a [u8], CodecError> {
        let len = self.u16(field)? as usize;
        if len > max {
            return Err(CodecError::Oversize { field, len, max });
        }
        self.take(field, len)
    }

    fn finish(self) -> Result<(), CodecError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
