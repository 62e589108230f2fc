// ========================================================================================
//
//                     Model-ordered sparse feature vectors & matrices
//
// ========================================================================================
//
// The column order of every matrix built here is the contract with a pretrained model.
// It is fixed by the `FeatureOrder` and never derived from the input data.

use crate::types::{GenotypeMap, LocusKey};
use ahash::AHashMap;
use itertools::Itertools;
use ndarray::{Array1, Array2};
use sprs::{CompressedStorage, CsMat, CsVec};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("feature order is empty")]
    Empty,
    #[error("feature order lists '{key}' twice (entries {first} and {second})")]
    Duplicate {
        key: LocusKey,
        first: usize,
        second: usize,
    },
    #[error("feature vector has {found} columns but the matrix expects {expected}")]
    RowLength { expected: usize, found: usize },
    #[error("failed to read feature order from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// The ordered list of loci that defines a model's input columns.
#[derive(Debug, Clone)]
pub struct FeatureOrder {
    keys: Vec<LocusKey>,
    index: AHashMap<LocusKey, usize>,
}

impl FeatureOrder {
    /// Validates that the order is non-empty and free of duplicates.
    pub fn new(keys: Vec<LocusKey>) -> Result<Self, SchemaError> {
        if keys.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut index = AHashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            if let Some(first) = index.insert(key.clone(), position) {
                return Err(SchemaError::Duplicate {
                    key: key.clone(),
                    first,
                    second: position,
                });
            }
        }

        Ok(Self { keys, index })
    }

    /// Reads one locus key per line. Surrounding whitespace and blank lines are ignored.
    pub fn from_reader<R: BufRead>(reader: R, source_name: &str) -> Result<Self, SchemaError> {
        let mut keys = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| SchemaError::Io {
                path: source_name.to_string(),
                source,
            })?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                keys.push(LocusKey::from(trimmed));
            }
        }
        Self::new(keys)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let file = File::open(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), &path.display().to_string())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false for a validated order; provided for API symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[LocusKey] {
        &self.keys
    }

    #[inline]
    pub fn contains(&self, key: &LocusKey) -> bool {
        self.index.contains_key(key)
    }

    #[inline]
    pub fn position_of(&self, key: &LocusKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Loci of the order that are absent from `panel`, in order.
    pub fn missing_from<'a>(&'a self, panel: &'a ahash::AHashSet<LocusKey>) -> impl Iterator<Item = &'a LocusKey> + 'a {
        self.keys.iter().filter(move |key| !panel.contains(*key))
    }
}

/// One sample's genotypes laid out in model column order, storing non-zero codes only.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    inner: CsVec<u8>,
}

impl FeatureVector {
    /// An all-zero vector of logical length `len`.
    pub fn zeros(len: usize) -> Self {
        Self {
            inner: CsVec::empty(len),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.dim()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.dim() == 0
    }

    /// Number of stored (non-zero) entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    pub fn get(&self, column: usize) -> u8 {
        self.inner.get(column).copied().unwrap_or(0)
    }

    /// Iterates `(column, value)` pairs of the non-zero entries in column order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.inner.iter().map(|(column, value)| (column, *value))
    }

    pub fn to_dense(&self) -> Array1<u8> {
        let mut dense = Array1::zeros(self.len());
        for (column, value) in self.iter() {
            dense[column] = value;
        }
        dense
    }
}

impl PartialEq for FeatureVector {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for FeatureVector {}

/// Lays out a genotype map in the model's column order.
///
/// `value[i]` is the code observed for `order[i]`, or 0 when the locus was not observed.
/// Entries of the map that are not part of the order are ignored.
pub fn assemble(genotypes: &GenotypeMap, order: &FeatureOrder) -> FeatureVector {
    let (indices, values): (Vec<usize>, Vec<u8>) = genotypes
        .iter()
        .filter(|(_, code)| code.is_informative())
        .filter_map(|(key, code)| order.position_of(key).map(|column| (column, code.as_u8())))
        .sorted_unstable_by_key(|(column, _)| *column)
        .unzip();

    // Positions come from a duplicate-free order, so the indices are sorted and unique.
    FeatureVector {
        inner: CsVec::new(order.len(), indices, values),
    }
}

/// Row-stacked feature vectors in compressed sparse row layout.
///
/// Row `i` belongs to the `i`-th sample pushed; columns follow the feature order.
#[derive(Debug, Clone)]
pub struct SampleMatrix {
    inner: CsMat<u8>,
}

impl SampleMatrix {
    pub fn with_columns(n_cols: usize) -> Self {
        Self {
            inner: CsMat::empty(CompressedStorage::CSR, n_cols),
        }
    }

    pub fn from_rows<'a, I>(n_cols: usize, rows: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let mut matrix = Self::with_columns(n_cols);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    /// Appends a vector as the next row.
    pub fn push_row(&mut self, row: &FeatureVector) -> Result<(), SchemaError> {
        let n_cols = self.n_cols();
        if row.len() != n_cols {
            return Err(SchemaError::RowLength {
                expected: n_cols,
                found: row.len(),
            });
        }
        let stacked = std::mem::replace(&mut self.inner, CsMat::empty(CompressedStorage::CSR, n_cols));
        self.inner = stacked.append_outer_csvec(row.inner.view());
        Ok(())
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.inner.rows()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.inner.cols()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.n_cols())
    }

    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    /// A copy of one row, or `None` past the last row.
    pub fn row(&self, row: usize) -> Option<FeatureVector> {
        self.inner
            .outer_view(row)
            .map(|view| FeatureVector { inner: view.to_owned() })
    }

    pub fn get(&self, row: usize, column: usize) -> u8 {
        self.inner.get(row, column).copied().unwrap_or(0)
    }

    /// All non-zero entries as `(row, column, value)`, row-major.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, u8)> + '_ {
        self.inner.iter().map(|(value, (row, column))| (row, column, *value))
    }

    /// The underlying `sprs` matrix, for model runtimes that take CSR input directly.
    pub fn as_csr(&self) -> &CsMat<u8> {
        &self.inner
    }

    /// Expands the matrix into a dense `f32` array, the input type most model runtimes expect.
    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros(self.shape());
        for (row, column, value) in self.triplets() {
            dense[(row, column)] = f32::from(value);
        }
        dense
    }
}

impl PartialEq for SampleMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape() && self.triplets().eq(other.triplets())
    }
}

impl Eq for SampleMatrix {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenotypeCode;
    use ahash::AHashSet;

    fn keys(raw: &[&str]) -> Vec<LocusKey> {
        raw.iter().map(|k| LocusKey::from(*k)).collect()
    }

    #[test]
    fn feature_order_rejects_empty_and_duplicates() {
        assert!(matches!(FeatureOrder::new(Vec::new()), Err(SchemaError::Empty)));
        let err = FeatureOrder::new(keys(&["a", "b", "a"])).unwrap_err();
        match err {
            SchemaError::Duplicate { key, first, second } => {
                assert_eq!(key.as_str(), "a");
                assert_eq!((first, second), (0, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn feature_order_reads_one_key_per_line() {
        let text = "1_100_A_G\n\n  2_200_C_T  \n";
        let order = FeatureOrder::from_reader(text.as_bytes(), "inline").unwrap();
        assert_eq!(order.keys(), keys(&["1_100_A_G", "2_200_C_T"]).as_slice());
        assert_eq!(order.position_of(&LocusKey::from("2_200_C_T")), Some(1));
    }

    #[test]
    fn empty_map_assembles_to_zero_vector() {
        let order = FeatureOrder::new(keys(&["a", "b", "c", "d"])).unwrap();
        let vector = assemble(&GenotypeMap::new(), &order);
        assert_eq!(vector.len(), 4);
        assert_eq!(vector.nnz(), 0);
        assert_eq!(vector.to_dense().to_vec(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn assembly_follows_feature_order() {
        let order = FeatureOrder::new(keys(&["c", "a", "b"])).unwrap();
        let mut map = GenotypeMap::new();
        map.insert(LocusKey::from("a"), GenotypeCode::HomAlt);
        map.insert(LocusKey::from("b"), GenotypeCode::HomRefOrMissing);
        map.insert(LocusKey::from("c"), GenotypeCode::Het);
        map.insert(LocusKey::from("zzz"), GenotypeCode::HomAlt);

        let vector = assemble(&map, &order);
        assert_eq!(vector.to_dense().to_vec(), vec![1, 2, 0]);
        assert_eq!(vector.nnz(), 2);
        assert_eq!(vector.get(1), 2);
        assert_eq!(vector.get(2), 0);
    }

    #[test]
    fn matrix_stacks_rows_in_push_order() {
        let order = FeatureOrder::new(keys(&["a", "b", "c"])).unwrap();
        let mut first = GenotypeMap::new();
        first.insert(LocusKey::from("b"), GenotypeCode::Het);
        let mut second = GenotypeMap::new();
        second.insert(LocusKey::from("a"), GenotypeCode::HomAlt);
        second.insert(LocusKey::from("c"), GenotypeCode::Het);

        let rows = [
            assemble(&first, &order),
            FeatureVector::zeros(3),
            assemble(&second, &order),
        ];
        let matrix = SampleMatrix::from_rows(3, rows.iter()).unwrap();

        assert_eq!(matrix.shape(), (3, 3));
        assert_eq!(matrix.nnz(), 3);
        assert_eq!(matrix.get(0, 1), 1);
        assert_eq!(matrix.get(1, 1), 0);
        assert_eq!(matrix.get(2, 0), 2);
        let dense = matrix.to_dense();
        assert_eq!(dense.row(2).to_vec(), vec![2.0, 0.0, 1.0]);
        let triplets: Vec<_> = matrix.triplets().collect();
        assert_eq!(triplets, vec![(0, 1, 1), (2, 0, 2), (2, 2, 1)]);
        assert_eq!(matrix.row(2), Some(rows[2].clone()));
        assert!(matrix.row(3).is_none());
        assert!(matrix.as_csr().is_csr());
    }

    #[test]
    fn matrix_rejects_rows_of_the_wrong_length() {
        let mut matrix = SampleMatrix::with_columns(3);
        let err = matrix.push_row(&FeatureVector::zeros(2)).unwrap_err();
        assert!(matches!(err, SchemaError::RowLength { expected: 3, found: 2 }));
        assert_eq!(matrix.n_rows(), 0);
    }

    #[test]
    fn missing_from_lists_uncovered_loci() {
        let order = FeatureOrder::new(keys(&["a", "b", "c"])).unwrap();
        let panel: AHashSet<LocusKey> = keys(&["b"]).into_iter().collect();
        let missing: Vec<&str> = order.missing_from(&panel).map(LocusKey::as_str).collect();
        assert_eq!(missing, vec!["a", "c"]);
    }
}
