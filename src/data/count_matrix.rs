//! Count matrix with sparse storage for compositional abundance data.

use crate::error::{Result, TensorError};
use nalgebra::DMatrix;
use rayon::prelude::*;
use sprs::{CsMat, TriMat};

/// A sparse count matrix storing feature abundances across samples.
///
/// Rows represent features (taxa, tree nodes), columns represent samples.
/// Uses CSR (Compressed Sparse Row) format for efficient row-wise operations.
/// Every stored value is finite and non-negative; construction fails otherwise.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Sparse matrix in CSR format (features × samples)
    data: CsMat<f64>,
    /// Feature identifiers (row names)
    feature_ids: Vec<String>,
    /// Sample identifiers (column names)
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new CountMatrix from a sparse matrix and identifiers.
    pub fn new(data: CsMat<f64>, feature_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != feature_ids.len() {
            return Err(TensorError::DimensionMismatch {
                expected: nrows,
                actual: feature_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(TensorError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        validate_values(data.data().iter().copied())?;
        // Canonical CSR drops explicit zeros so nnz means "observed"
        let data = {
            let mut tri = TriMat::new((nrows, ncols));
            for (row, row_vec) in data.outer_iterator().enumerate() {
                for (col, &val) in row_vec.iter() {
                    if val != 0.0 {
                        tri.add_triplet(row, col, val);
                    }
                }
            }
            tri.to_csr()
        };
        Ok(Self {
            data,
            feature_ids,
            sample_ids,
        })
    }

    /// Build from (feature, sample, value) triplets.
    pub fn from_triplets(
        triplets: &[(usize, usize, f64)],
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let shape = (feature_ids.len(), sample_ids.len());
        let mut tri_mat = TriMat::new(shape);
        for &(row, col, val) in triplets {
            if row >= shape.0 || col >= shape.1 {
                return Err(TensorError::Shape(format!(
                    "Triplet ({}, {}) outside a {} x {} matrix",
                    row, col, shape.0, shape.1
                )));
            }
            tri_mat.add_triplet(row, col, val);
        }
        Self::new(tri_mat.to_csr(), feature_ids, sample_ids)
    }

    /// Get the value at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data.get(row, col).copied().unwrap_or(0.0)
    }

    /// Number of features (rows).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.data.rows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.cols()
    }

    /// Total number of non-zero entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.data.nnz()
    }

    /// Feature identifiers.
    #[inline]
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get the underlying sparse matrix.
    #[inline]
    pub fn data(&self) -> &CsMat<f64> {
        &self.data
    }

    /// Get a dense vector for a specific row (feature).
    pub fn row_dense(&self, row: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Compute row sums (total counts per feature).
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n_features())
            .into_par_iter()
            .map(|row| {
                self.data
                    .outer_view(row)
                    .map(|v| v.iter().map(|(_, &val)| val).sum())
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Compute column sums (sequencing depth per sample).
    pub fn col_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_samples()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Convert to a dense matrix (features × samples).
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.n_features(), self.n_samples());
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                dense[(row, col)] = val;
            }
        }
        dense
    }

    /// Convert to a dense matrix with samples as rows (compositions × components).
    pub fn to_dense_samples(&self) -> DMatrix<f64> {
        self.to_dense().transpose()
    }

    /// Create from a dense matrix (features × samples).
    pub fn from_dense(
        data: &DMatrix<f64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        validate_values(data.iter().copied())?;
        let (nrows, ncols) = data.shape();
        let mut tri_mat = TriMat::new((nrows, ncols));

        for row in 0..nrows {
            for col in 0..ncols {
                let val = data[(row, col)];
                if val > 0.0 {
                    tri_mat.add_triplet(row, col, val);
                }
            }
        }

        Self::new(tri_mat.to_csr(), feature_ids, sample_ids)
    }

    /// Return a copy with `value` added to every entry, zeros included.
    pub fn add_scalar(&self, value: f64) -> Result<Self> {
        let dense = self.to_dense().add_scalar(value);
        Self::from_dense(&dense, self.feature_ids.clone(), self.sample_ids.clone())
    }
}

/// Fail on negative, infinite or NaN values.
pub(crate) fn validate_values(values: impl Iterator<Item = f64>) -> Result<()> {
    for val in values {
        if val.is_nan() {
            return Err(TensorError::Domain("Table contains NaN or missing values".to_string()));
        }
        if val.is_infinite() {
            return Err(TensorError::Domain("Table contains inf or -inf".to_string()));
        }
        if val < 0.0 {
            return Err(TensorError::Domain("Table contains negative values".to_string()));
        }
    }
    Ok(())
}
