// ========================================================================================
//
//                          Tab-separated persistence of results
//
// ========================================================================================

use super::aggregate::RegionAttributionTensor;
use super::attribution::{AttributionTensor, ShapeError};
use crate::assemble::FeatureOrder;
use crate::pipeline::FeatureMatrix;
use crate::types::LocusKey;
use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const LABEL_COLUMN: &str = "label";
const SAMPLE_COLUMN: &str = "sample";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("matrix has {found} columns but the feature order lists {expected} loci")]
    ColumnMismatch { expected: usize, found: usize },
    #[error("malformed attribution table at line {line}: {message}")]
    Malformed { line: u64, message: String },
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Attributions read back from a combined `label\tsample\t<loci...>` table.
#[derive(Debug, Clone)]
pub struct AttributionTable {
    pub labels: Vec<String>,
    pub samples: Vec<String>,
    pub features: Vec<LocusKey>,
    pub tensor: AttributionTensor,
}

pub fn create_output(path: &Path) -> Result<BufWriter<File>, OutputError> {
    let file = File::create(path).map_err(|source| OutputError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    WriterBuilder::new().delimiter(b'\t').from_writer(writer)
}

/// Writes the non-zero entries of a feature matrix as `sample\tlocus\tgenotype` rows.
pub fn write_feature_triplets<W: Write>(
    writer: W,
    features: &FeatureMatrix,
    order: &FeatureOrder,
) -> Result<(), OutputError> {
    if features.matrix.n_cols() != order.len() {
        return Err(OutputError::ColumnMismatch {
            expected: order.len(),
            found: features.matrix.n_cols(),
        });
    }

    let mut tsv = tsv_writer(writer);
    tsv.write_record([SAMPLE_COLUMN, "locus", "genotype"])?;
    for (row, column, value) in features.matrix.triplets() {
        tsv.write_record([
            features.samples[row].as_str(),
            order.keys()[column].as_str(),
            value.to_string().as_str(),
        ])?;
    }
    tsv.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes the region tensor as one row per (label, sample), label blocks in label order.
pub fn write_region_table<W: Write>(
    writer: W,
    tensor: &RegionAttributionTensor,
) -> Result<(), OutputError> {
    let mut tsv = tsv_writer(writer);
    let mut header = vec![LABEL_COLUMN.to_string(), SAMPLE_COLUMN.to_string()];
    header.extend(tensor.regions().iter().cloned());
    tsv.write_record(&header)?;

    for (label_index, label) in tensor.labels().names().iter().enumerate() {
        let block = tensor.label_matrix(label_index);
        for (sample, row) in tensor.samples().iter().zip(block.outer_iter()) {
            let mut record = Vec::with_capacity(row.len() + 2);
            record.push(label.clone());
            record.push(sample.clone());
            record.extend(row.iter().map(|value| value.to_string()));
            tsv.write_record(&record)?;
        }
    }
    tsv.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes `rank\tregion\timportance`, optionally limited to the `top` regions.
pub fn write_importance<W: Write>(
    writer: W,
    tensor: &RegionAttributionTensor,
    top: Option<usize>,
) -> Result<(), OutputError> {
    let mut tsv = tsv_writer(writer);
    tsv.write_record(["rank", "region", "importance"])?;
    let ranked = tensor.top_regions(top.unwrap_or(tensor.regions().len()));
    for (rank, (region, importance)) in ranked.into_iter().enumerate() {
        tsv.write_record([(rank + 1).to_string(), region.to_string(), importance.to_string()])?;
    }
    tsv.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Reads a combined attribution table. Rows of one label must be contiguous and every
/// label block must list the same samples in the same order.
pub fn read_attribution_table<R: Read>(reader: R) -> Result<AttributionTable, OutputError> {
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
    let headers = tsv.headers()?.clone();
    if headers.get(0) != Some(LABEL_COLUMN) || headers.get(1) != Some(SAMPLE_COLUMN) {
        return Err(OutputError::Malformed {
            line: 1,
            message: format!("header must start with '{LABEL_COLUMN}\\t{SAMPLE_COLUMN}'"),
        });
    }
    let features: Vec<LocusKey> = headers.iter().skip(2).map(LocusKey::from).collect();

    let mut labels: Vec<String> = Vec::new();
    let mut samples: Vec<String> = Vec::new();
    let mut block_row = 0usize;
    let mut values = Vec::new();

    for record in tsv.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let malformed = |message: String| OutputError::Malformed { line, message };

        let label = record.get(0).unwrap_or_default();
        let sample = record.get(1).unwrap_or_default();
        if labels.last().map(String::as_str) != Some(label) {
            if labels.iter().any(|seen| seen == label) {
                return Err(malformed(format!("rows of label '{label}' are not contiguous")));
            }
            if labels.len() > 1 && block_row != samples.len() {
                return Err(malformed(format!(
                    "label '{}' lists {block_row} samples, expected {}",
                    labels[labels.len() - 1],
                    samples.len()
                )));
            }
            labels.push(label.to_string());
            block_row = 0;
        }

        if labels.len() == 1 {
            if samples.iter().any(|seen| seen == sample) {
                return Err(malformed(format!("sample '{sample}' is listed twice under '{label}'")));
            }
            samples.push(sample.to_string());
        } else if samples.get(block_row).map(String::as_str) != Some(sample) {
            return Err(malformed(format!(
                "sample '{sample}' of label '{label}' does not match the sample order of the first label"
            )));
        }
        block_row += 1;

        for field in record.iter().skip(2) {
            let value: f64 = field
                .trim()
                .parse()
                .map_err(|_| malformed(format!("'{field}' is not a number")))?;
            values.push(value);
        }
    }
    if labels.len() > 1 && block_row != samples.len() {
        return Err(OutputError::Malformed {
            line: 0,
            message: format!(
                "label '{}' lists {block_row} samples, expected {}",
                labels[labels.len() - 1],
                samples.len()
            ),
        });
    }

    let rows = labels.len() * samples.len();
    let table = Array2::from_shape_vec((rows, features.len()), values).map_err(|e| {
        OutputError::Malformed {
            line: 0,
            message: e.to_string(),
        }
    })?;
    let tensor = AttributionTensor::from_stacked(table.view(), labels.len())?;

    Ok(AttributionTable {
        labels,
        samples,
        features,
        tensor,
    })
}
