// ========================================================================================
//
//                        Multi-sample feature-matrix orchestration
//
// ========================================================================================
//
// A file is read once. Every selected sample is then scanned independently against the
// same in-memory lines, which makes the per-sample work embarrassingly parallel. Results
// are always collected in selection order so row `i` of the matrix is selected sample `i`.

use crate::assemble::{FeatureOrder, FeatureVector, SampleMatrix, SchemaError, assemble};
use crate::genotype::{EncodingError, EncodingPolicy};
use crate::locus::{GenotypeAccumulator, LocusConverter, SampleReport};
use crate::vcf::{ParseError, SampleMode, VcfDocument, VcfHeader};
use ahash::AHashSet;
use log::{debug, info};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("sample selection is empty")]
    Empty,
    #[error("sample position {position} is out of range; valid positions are 1..={n_samples}")]
    PositionOutOfRange { position: usize, n_samples: usize },
    #[error("sample '{0}' is not present in the header")]
    UnknownName(String),
    #[error("sample '{0}' is selected more than once")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("sample '{sample}' aborted at line {line}: {source}")]
    Sample {
        sample: String,
        line: usize,
        #[source]
        source: EncodingError,
    },
    #[error("{path}: {source}")]
    File {
        path: String,
        #[source]
        source: Box<PipelineError>,
    },
}

/// One requested sample, by 1-based position among the sample columns or by exact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleRef {
    Position(usize),
    Name(String),
}

/// Which samples of a file become matrix rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SampleSelection {
    /// Every sample column, in header order.
    #[default]
    All,
    Samples(Vec<SampleRef>),
}

impl SampleSelection {
    /// Parses `all`, or a comma-separated list where integers are 1-based positions and
    /// anything else is a sample name.
    pub fn parse(text: &str) -> Result<Self, SelectionError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let mut samples = Vec::new();
        for token in text.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(SelectionError::Empty);
            }
            match token.parse::<usize>() {
                Ok(position) => samples.push(SampleRef::Position(position)),
                Err(_) => samples.push(SampleRef::Name(token.to_string())),
            }
        }
        Ok(Self::Samples(samples))
    }
}

impl FromStr for SampleSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SampleSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Samples(samples) => {
                for (i, sample) in samples.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match sample {
                        SampleRef::Position(p) => write!(f, "{p}")?,
                        SampleRef::Name(name) => f.write_str(name)?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// A sample resolved against a header: its name and absolute column index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSample {
    pub name: String,
    pub column: usize,
}

/// Resolves a selection to absolute sample columns, preserving the requested order.
pub fn resolve_selection(
    header: &VcfHeader,
    selection: &SampleSelection,
) -> Result<Vec<SelectedSample>, SelectionError> {
    let refs = match selection {
        SampleSelection::All => {
            return Ok(header
                .sample_names()
                .iter()
                .zip(header.sample_columns())
                .map(|(name, column)| SelectedSample {
                    name: name.clone(),
                    column,
                })
                .collect());
        }
        SampleSelection::Samples(refs) => refs,
    };
    if refs.is_empty() {
        return Err(SelectionError::Empty);
    }

    let n_samples = header.n_samples();
    let mut seen = AHashSet::with_capacity(refs.len());
    let mut selected = Vec::with_capacity(refs.len());
    for sample in refs {
        let column = match sample {
            SampleRef::Position(position) => {
                if *position == 0 || *position > n_samples {
                    return Err(SelectionError::PositionOutOfRange {
                        position: *position,
                        n_samples,
                    });
                }
                header.format_index() + position
            }
            SampleRef::Name(name) => header
                .column_of(name)
                .ok_or_else(|| SelectionError::UnknownName(name.clone()))?,
        };
        let name = header
            .name_at(column)
            .ok_or(SelectionError::PositionOutOfRange {
                position: column - header.format_index(),
                n_samples,
            })?
            .to_string();
        if !seen.insert(column) {
            return Err(SelectionError::Duplicate(name));
        }
        selected.push(SelectedSample { name, column });
    }
    Ok(selected)
}

/// The assembled rows of one file together with their sample names and diagnostics.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub source: String,
    /// Whether the source file carried one sample column or several.
    pub mode: SampleMode,
    pub matrix: SampleMatrix,
    pub samples: Vec<String>,
    pub reports: Vec<SampleReport>,
}

/// Turns variant files into model-ordered sample matrices.
///
/// The builder only borrows the run's immutable resources, so one instance can serve any
/// number of files and threads.
#[derive(Debug, Clone, Copy)]
pub struct FeatureMatrixBuilder<'a> {
    order: &'a FeatureOrder,
    converter: Option<&'a LocusConverter>,
    policy: EncodingPolicy,
}

impl<'a> FeatureMatrixBuilder<'a> {
    pub fn new(
        order: &'a FeatureOrder,
        converter: Option<&'a LocusConverter>,
        policy: EncodingPolicy,
    ) -> Self {
        Self {
            order,
            converter,
            policy,
        }
    }

    pub fn build(
        &self,
        document: &VcfDocument,
        selection: &SampleSelection,
    ) -> Result<FeatureMatrix, PipelineError> {
        let mode = document.header().mode();
        let selected = resolve_selection(document.header(), selection)?;
        info!(
            "Assembling {} sample(s) x {} feature(s) from {} ({mode})",
            selected.len(),
            self.order.len(),
            document.name()
        );

        let rows = selected
            .par_iter()
            .map(|sample| self.build_sample(document, sample))
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let mut matrix = SampleMatrix::with_columns(self.order.len());
        let mut reports = Vec::with_capacity(rows.len());
        for (vector, report) in &rows {
            matrix.push_row(vector)?;
            reports.push(*report);
        }

        Ok(FeatureMatrix {
            source: document.name().to_string(),
            mode,
            matrix,
            samples: selected.into_iter().map(|sample| sample.name).collect(),
            reports,
        })
    }

    /// Reads the file at `path` and builds its matrix. Errors carry the path.
    pub fn build_path(
        &self,
        path: &Path,
        selection: &SampleSelection,
    ) -> Result<FeatureMatrix, PipelineError> {
        let with_path = |source: PipelineError| PipelineError::File {
            path: path.display().to_string(),
            source: Box::new(source),
        };
        let document = VcfDocument::open(path).map_err(|e| with_path(e.into()))?;
        self.build(&document, selection).map_err(with_path)
    }

    /// Builds every file independently; a failure in one file does not stop the others.
    pub fn build_many(
        &self,
        paths: &[PathBuf],
        selection: &SampleSelection,
    ) -> Vec<(PathBuf, Result<FeatureMatrix, PipelineError>)> {
        paths
            .iter()
            .map(|path| (path.clone(), self.build_path(path, selection)))
            .collect()
    }

    fn build_sample(
        &self,
        document: &VcfDocument,
        sample: &SelectedSample,
    ) -> Result<(FeatureVector, SampleReport), PipelineError> {
        let mut accumulator = GenotypeAccumulator::new(self.order, self.converter, self.policy);
        for line in document.variant_lines(sample.column) {
            let line = line?;
            let line_number = line.line_number;
            accumulator
                .record(&line)
                .map_err(|source| PipelineError::Sample {
                    sample: sample.name.clone(),
                    line: line_number,
                    source,
                })?;
        }

        let (genotypes, report) = accumulator.finish(&sample.name);
        debug!(
            "Sample '{}': {} model loci matched, {} informative, {} skipped",
            sample.name, report.matched_loci, report.informative_genotypes, report.skipped_genotypes
        );
        Ok((assemble(&genotypes, self.order), report))
    }
}
