// ========================================================================================
//
//                    Model seams: class probabilities and attributions
//
// ========================================================================================
//
// The classifier and the explainer are external engines. They plug in through `Scorer`
// and `Attributor`; this crate only shapes their inputs and outputs.

use super::labels::LabelDictionary;
use crate::assemble::SampleMatrix;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("no label matrices were supplied")]
    NoLabels,
    #[error("label matrix {label} has shape {found:?}, expected {expected:?}")]
    Ragged {
        label: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error(
        "attribution tensor has shape {found:?} (labels, samples, features), but the inputs describe {expected:?}"
    )]
    Mismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("{rows} stacked rows cannot be split into {n_labels} equal label blocks")]
    RowsNotDivisible { rows: usize, n_labels: usize },
    #[error("probability matrix has shape {found:?}, expected {expected:?} (samples, labels)")]
    Probabilities {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// Per-label, per-sample, per-feature attributions: shape `(n_labels, n_samples, n_features)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionTensor {
    values: Array3<f64>,
}

impl AttributionTensor {
    pub fn new(values: Array3<f64>) -> Self {
        Self { values }
    }

    /// Stacks one `(n_samples, n_features)` matrix per label, in label order.
    pub fn from_label_matrices(matrices: Vec<Array2<f64>>) -> Result<Self, ShapeError> {
        let first = matrices.first().ok_or(ShapeError::NoLabels)?;
        let expected = first.dim();
        for (label, matrix) in matrices.iter().enumerate() {
            if matrix.dim() != expected {
                return Err(ShapeError::Ragged {
                    label,
                    expected,
                    found: matrix.dim(),
                });
            }
        }

        let (n_samples, n_features) = expected;
        let mut values = Array3::zeros((matrices.len(), n_samples, n_features));
        for (mut block, matrix) in values.outer_iter_mut().zip(&matrices) {
            block.assign(matrix);
        }
        Ok(Self { values })
    }

    /// Splits a combined `(n_labels * n_samples, n_features)` table whose rows are grouped
    /// in contiguous label blocks.
    pub fn from_stacked(table: ArrayView2<'_, f64>, n_labels: usize) -> Result<Self, ShapeError> {
        Ok(Self {
            values: split_stacked(table, n_labels)?,
        })
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn n_labels(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    pub fn n_samples(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    pub fn n_features(&self) -> usize {
        self.values.len_of(Axis(2))
    }

    pub fn label_matrix(&self, label: usize) -> ArrayView2<'_, f64> {
        self.values.index_axis(Axis(0), label)
    }
}

pub(crate) fn split_stacked(table: ArrayView2<'_, f64>, n_labels: usize) -> Result<Array3<f64>, ShapeError> {
    let (rows, n_cols) = table.dim();
    if n_labels == 0 || rows % n_labels != 0 {
        return Err(ShapeError::RowsNotDivisible { rows, n_labels });
    }
    let n_samples = rows / n_labels;
    Ok(Array3::from_shape_fn((n_labels, n_samples, n_cols), |(l, s, c)| {
        table[(l * n_samples + s, c)]
    }))
}

/// A pretrained classifier producing class probabilities.
pub trait Scorer {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns probabilities of shape `(n_samples, n_labels)`, rows in matrix row order.
    fn predict_proba(&self, features: &SampleMatrix) -> Result<Array2<f64>, Self::Error>;
}

/// An explainer producing per-feature attributions for every label.
pub trait Attributor {
    type Error: std::error::Error + Send + Sync + 'static;

    fn attribute(&self, features: &SampleMatrix) -> Result<AttributionTensor, Self::Error>;
}

/// The most probable label of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AncestryCall {
    pub sample: String,
    pub label: String,
    pub probability: f64,
}

/// Picks the arg-max label per sample. Ties resolve to the earlier label.
pub fn call_ancestry(
    probabilities: ArrayView2<'_, f64>,
    samples: &[String],
    labels: &LabelDictionary,
) -> Result<Vec<AncestryCall>, ShapeError> {
    let expected = (samples.len(), labels.len());
    if probabilities.dim() != expected {
        return Err(ShapeError::Probabilities {
            expected,
            found: probabilities.dim(),
        });
    }

    let mut calls = Vec::with_capacity(samples.len());
    for (sample, row) in samples.iter().zip(probabilities.outer_iter()) {
        let mut best = 0;
        for (label, &p) in row.iter().enumerate().skip(1) {
            if p > row[best] {
                best = label;
            }
        }
        calls.push(AncestryCall {
            sample: sample.clone(),
            label: labels.names()[best].clone(),
            probability: row[best],
        });
    }
    Ok(calls)
}
