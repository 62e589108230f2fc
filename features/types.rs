// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// The canonical identifier of a variant site: `CHROM_POS_REF_ALT`.
///
/// This is the join key between the VCF, the model's feature order, the region maps and
/// the genome-build converter. It is built from the raw text fields without any
/// normalisation, so identical inputs always produce byte-identical keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocusKey(String);

impl LocusKey {
    pub fn new(chrom: &str, pos: &str, reference: &str, alternate: &str) -> Self {
        let mut key =
            String::with_capacity(chrom.len() + pos.len() + reference.len() + alternate.len() + 3);
        key.push_str(chrom);
        key.push('_');
        key.push_str(pos);
        key.push('_');
        key.push_str(reference);
        key.push('_');
        key.push_str(alternate);
        Self(key)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for LocusKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LocusKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for LocusKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for LocusKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric genotype encoding consumed by the models.
///
/// Homozygous-reference and fully missing calls share the code 0.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GenotypeCode {
    #[default]
    HomRefOrMissing = 0,
    Het = 1,
    HomAlt = 2,
}

impl GenotypeCode {
    #[inline(always)]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub fn is_informative(self) -> bool {
        self != GenotypeCode::HomRefOrMissing
    }
}

/// The per-sample accumulation of observed genotypes, keyed by locus.
///
/// Lookups and insertions are O(1) on average.
pub type GenotypeMap = AHashMap<LocusKey, GenotypeCode>;
