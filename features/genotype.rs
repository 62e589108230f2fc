// ========================================================================================
//
//                               Genotype string encoding
//
// ========================================================================================

use crate::types::GenotypeCode;
use serde::Deserialize;
use thiserror::Error;

/// What to do with a sample when one of its genotypes cannot be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingPolicy {
    /// Drop the offending variant for this sample and keep going.
    #[default]
    SkipVariant,
    /// Stop processing the sample and report the error.
    AbortSample,
}

/// A genotype field that cannot be mapped onto the 0/1/2 encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot encode genotype '{genotype}': {reason}")]
pub struct EncodingError {
    pub genotype: String,
    pub reason: &'static str,
}

impl EncodingError {
    fn new(genotype: &str, reason: &'static str) -> Self {
        Self {
            genotype: genotype.to_string(),
            reason,
        }
    }
}

/// Encodes a diploid GT token such as `0/1` or `1|1`.
///
/// The token must be exactly one allele character, a `/` or `|` separator, and one allele
/// character. Phasing is ignored. Allele indices with more than one digit are rejected
/// rather than truncated.
pub fn encode_genotype(genotype: &str) -> Result<GenotypeCode, EncodingError> {
    let bytes = genotype.as_bytes();
    if bytes.len() != 3 {
        return Err(EncodingError::new(
            genotype,
            "expected two single-character alleles and a separator",
        ));
    }

    let (first, separator, second) = (bytes[0], bytes[1], bytes[2]);
    if separator != b'/' && separator != b'|' {
        return Err(EncodingError::new(
            genotype,
            "separator must be '/' or '|'",
        ));
    }
    if !is_allele(first) || !is_allele(second) {
        return Err(EncodingError::new(
            genotype,
            "alleles must be a single digit or '.'",
        ));
    }

    let code = match (first, second) {
        (b'0', b'0') | (b'.', b'.') => GenotypeCode::HomRefOrMissing,
        (a, b) if a != b => GenotypeCode::Het,
        _ => GenotypeCode::HomAlt,
    };
    Ok(code)
}

#[inline(always)]
fn is_allele(byte: u8) -> bool {
    byte.is_ascii_digit() || byte == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_and_missing_calls_encode_to_zero() {
        for gt in ["0/0", "0|0", "./.", ".|."] {
            assert_eq!(encode_genotype(gt).unwrap(), GenotypeCode::HomRefOrMissing, "{gt}");
        }
    }

    #[test]
    fn distinct_alleles_encode_to_one() {
        for gt in ["0/1", "1|0", "1/2", "0|3", "./1"] {
            assert_eq!(encode_genotype(gt).unwrap(), GenotypeCode::Het, "{gt}");
        }
    }

    #[test]
    fn equal_alternate_alleles_encode_to_two() {
        for gt in ["1/1", "1|1", "2/2", "9|9"] {
            assert_eq!(encode_genotype(gt).unwrap(), GenotypeCode::HomAlt, "{gt}");
        }
    }

    #[test]
    fn malformed_genotypes_are_rejected() {
        for gt in ["10/1", "0/12", "1", ".", "0-1", "0/A", "", "0/1/1"] {
            let err = encode_genotype(gt).unwrap_err();
            assert_eq!(err.genotype, gt);
        }
    }
}
