// ========================================================================================
//
//                   Locus identification and genome-build conversion
//
// ========================================================================================

use crate::assemble::FeatureOrder;
use crate::genotype::{EncodingError, EncodingPolicy, encode_genotype};
use crate::types::{GenotypeMap, LocusKey};
use crate::vcf::VariantLine;
use ahash::AHashMap;
use log::{debug, warn};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

impl LocusKey {
    /// Builds the `CHROM_POS_REF_ALT` key of a parsed data line.
    pub fn from_variant(line: &VariantLine<'_>) -> Self {
        LocusKey::new(line.chrom, line.pos, line.reference, line.alternate)
    }
}

/// A reference genome coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum GenomeBuild {
    Grch37,
    Grch38,
}

impl FromStr for GenomeBuild {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "grch37" | "hg19" | "b37" | "37" => Ok(Self::Grch37),
            "grch38" | "hg38" | "b38" | "38" => Ok(Self::Grch38),
            other => Err(format!(
                "unknown genome build '{other}'; expected one of hg19, GRCh37, 37, hg38, GRCh38, 38"
            )),
        }
    }
}

impl TryFrom<String> for GenomeBuild {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for GenomeBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grch37 => f.write_str("GRCh37"),
            Self::Grch38 => f.write_str("GRCh38"),
        }
    }
}

/// A lookup table remapping loci from the input build onto the model's build.
///
/// Keys without an entry pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct LocusConverter {
    targets: AHashMap<LocusKey, LocusKey>,
}

impl LocusConverter {
    pub fn new(targets: AHashMap<LocusKey, LocusKey>) -> Self {
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[inline]
    pub fn convert(&self, key: LocusKey) -> LocusKey {
        match self.targets.get(&key) {
            Some(target) => target.clone(),
            None => key,
        }
    }

    /// Counts converter targets that the model does not know about.
    pub fn targets_outside(&self, order: &FeatureOrder) -> usize {
        self.targets
            .values()
            .filter(|target| !order.contains(target))
            .count()
    }
}

impl FromIterator<(LocusKey, LocusKey)> for LocusConverter {
    fn from_iter<I: IntoIterator<Item = (LocusKey, LocusKey)>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Counters describing how one sample's variant lines were used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleReport {
    /// Data lines whose (converted) locus is part of the model.
    pub matched_loci: usize,
    /// Retained genotypes with a non-zero code.
    pub informative_genotypes: usize,
    /// Genotypes dropped because they could not be encoded.
    pub skipped_genotypes: usize,
}

/// Builds the {locus: genotype} map for a single sample.
///
/// Variant lines are identified, converted across builds when a converter is present,
/// filtered to the loci of the model, and encoded.
pub struct GenotypeAccumulator<'a> {
    order: &'a FeatureOrder,
    converter: Option<&'a LocusConverter>,
    policy: EncodingPolicy,
    genotypes: GenotypeMap,
    report: SampleReport,
}

impl<'a> GenotypeAccumulator<'a> {
    pub fn new(
        order: &'a FeatureOrder,
        converter: Option<&'a LocusConverter>,
        policy: EncodingPolicy,
    ) -> Self {
        Self {
            order,
            converter,
            policy,
            genotypes: GenotypeMap::new(),
            report: SampleReport::default(),
        }
    }

    /// Folds one data line into the map.
    ///
    /// Loci outside the model are ignored. An unencodable genotype is skipped or returned
    /// as an error depending on the policy.
    pub fn record(&mut self, line: &VariantLine<'_>) -> Result<(), EncodingError> {
        let mut key = LocusKey::from_variant(line);
        if let Some(converter) = self.converter {
            key = converter.convert(key);
        }
        if !self.order.contains(&key) {
            return Ok(());
        }
        self.report.matched_loci += 1;

        let code = match encode_genotype(line.genotype()) {
            Ok(code) => code,
            Err(err) => match self.policy {
                EncodingPolicy::SkipVariant => {
                    debug!("Skipping {key} at line {}: {err}", line.line_number);
                    self.report.skipped_genotypes += 1;
                    return Ok(());
                }
                EncodingPolicy::AbortSample => return Err(err),
            },
        };

        if let Some(previous) = self.genotypes.insert(key, code) {
            if previous.is_informative() {
                self.report.informative_genotypes -= 1;
            }
        }
        if code.is_informative() {
            self.report.informative_genotypes += 1;
        }
        Ok(())
    }

    /// Returns the accumulated map. A sample without a single informative genotype is
    /// reported with a warning; its map still assembles to an all-zero vector.
    pub fn finish(self, sample: &str) -> (GenotypeMap, SampleReport) {
        if self.report.informative_genotypes == 0 {
            warn!(
                "No informative genotypes found for sample '{sample}' ({} model loci matched). Check that the VCF carries variants for this model.",
                self.report.matched_loci
            );
        }
        (self.genotypes, self.report)
    }
}
