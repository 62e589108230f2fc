// ========================================================================================
//
//                    Region aggregation of per-feature attributions
//
// ========================================================================================
//
// Attributions of shape (labels, samples, features) are reduced to (labels, samples,
// regions) by averaging the member features of each region. The grouping is an explicit
// feature -> region index built once per call; label blocks stay contiguous and ordered.

use super::attribution::{AttributionTensor, ShapeError, split_stacked};
use super::labels::LabelDictionary;
use crate::types::LocusKey;
use ahash::AHashMap;
use itertools::Itertools;
use log::{debug, warn};
use natord::compare;
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

/// Many-to-one assignment of loci to a region id (gene, cytoband, ...).
///
/// Loci without an entry are excluded from aggregation.
pub type RegionMap = AHashMap<LocusKey, String>;

/// Region-level attributions of shape `(n_labels, n_samples, n_regions)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAttributionTensor {
    values: Array3<f64>,
    regions: Vec<String>,
    samples: Vec<String>,
    labels: LabelDictionary,
}

/// Averages feature attributions into regions.
///
/// `features` names the attribution columns in order, `samples` the rows. Regions are
/// ordered naturally by id, so the output layout only depends on the region map.
pub fn aggregate(
    attributions: &AttributionTensor,
    features: &[LocusKey],
    samples: &[String],
    regions: &RegionMap,
    labels: &LabelDictionary,
) -> Result<RegionAttributionTensor, ShapeError> {
    let expected = (labels.len(), samples.len(), features.len());
    if attributions.shape() != expected {
        return Err(ShapeError::Mismatch {
            expected,
            found: attributions.shape(),
        });
    }

    let region_ids: Vec<&str> = features
        .iter()
        .filter_map(|key| regions.get(key).map(String::as_str))
        .unique()
        // Natural order can tie distinct ids ("GENE01" vs "GENE1"); the byte order settles them.
        .sorted_by(|a, b| compare(a, b).then_with(|| a.cmp(b)))
        .collect();
    let region_index: AHashMap<&str, usize> = region_ids
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index))
        .collect();

    // Column -> region slot; `None` is the null group and never reaches the output.
    let assignment: Vec<Option<usize>> = features
        .iter()
        .map(|key| regions.get(key).and_then(|id| region_index.get(id.as_str()).copied()))
        .collect();
    let mut member_counts = vec![0usize; region_ids.len()];
    for slot in assignment.iter().flatten() {
        member_counts[*slot] += 1;
    }

    let unmapped = assignment.iter().filter(|slot| slot.is_none()).count();
    if unmapped > 0 {
        debug!("{unmapped} of {} feature(s) have no region and are excluded", features.len());
    }
    if region_ids.is_empty() {
        warn!("None of the {} feature(s) map to a region", features.len());
    }

    let mut values = Array3::zeros((labels.len(), samples.len(), region_ids.len()));
    for (mut out_block, in_block) in values
        .outer_iter_mut()
        .zip(attributions.values().outer_iter())
    {
        for (mut out_row, in_row) in out_block.outer_iter_mut().zip(in_block.outer_iter()) {
            for (value, slot) in in_row.iter().zip(&assignment) {
                if let Some(slot) = slot {
                    out_row[*slot] += *value;
                }
            }
            for (sum, count) in out_row.iter_mut().zip(&member_counts) {
                *sum /= *count as f64;
            }
        }
    }

    Ok(RegionAttributionTensor {
        values,
        regions: region_ids.into_iter().map(str::to_string).collect(),
        samples: samples.to_vec(),
        labels: labels.clone(),
    })
}

impl RegionAttributionTensor {
    /// Rebuilds a tensor from a combined `(n_labels * n_samples, n_regions)` table whose
    /// rows are contiguous label blocks.
    pub fn from_stacked(
        table: ArrayView2<'_, f64>,
        regions: Vec<String>,
        samples: Vec<String>,
        labels: LabelDictionary,
    ) -> Result<Self, ShapeError> {
        let values = split_stacked(table, labels.len())?;
        let expected = (labels.len(), samples.len(), regions.len());
        if values.dim() != expected {
            return Err(ShapeError::Mismatch {
                expected,
                found: values.dim(),
            });
        }
        Ok(Self {
            values,
            regions,
            samples,
            labels,
        })
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn labels(&self) -> &LabelDictionary {
        &self.labels
    }

    /// The `(n_samples, n_regions)` block of one label.
    pub fn label_matrix(&self, label: usize) -> ArrayView2<'_, f64> {
        self.values.index_axis(Axis(0), label)
    }

    pub fn into_label_matrices(self) -> Vec<Array2<f64>> {
        self.values
            .outer_iter()
            .map(|block| block.to_owned())
            .collect()
    }

    /// Mean absolute attribution over samples, shape `(n_labels, n_regions)`.
    pub fn mean_abs_by_label(&self) -> Array2<f64> {
        self.values
            .mapv(f64::abs)
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array2::zeros((self.labels.len(), self.regions.len())))
    }

    /// Mean of [`Self::mean_abs_by_label`] over labels, one value per region.
    pub fn overall_importance(&self) -> Array1<f64> {
        self.mean_abs_by_label()
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.regions.len()))
    }

    /// The `n` most important regions, most important first. Equal scores keep region order.
    pub fn top_regions(&self, n: usize) -> Vec<(&str, f64)> {
        let importance = self.overall_importance();
        let mut ranked: Vec<(&str, f64)> = self
            .regions
            .iter()
            .map(String::as_str)
            .zip(importance.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// One sample's attributions laid out as `(n_regions, n_labels)`.
    pub fn sample_profile(&self, sample: &str) -> Option<Array2<f64>> {
        let row = self.samples.iter().position(|name| name == sample)?;
        Some(self.values.index_axis(Axis(1), row).t().to_owned())
    }
}
