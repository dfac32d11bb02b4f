//! Classic centered log-ratio (CLR) and table-level transformations.

use crate::data::CountMatrix;
use crate::error::{Result, TensorError};
use crate::normalize::rclr::{matrix_closure, rclr_with_centers};
use crate::zero::pseudocount::{add_pseudocount, resolve_pseudocount};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A transformed matrix with metadata about the transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedMatrix {
    /// The transformed data (features × samples).
    #[serde(skip)]
    pub data: DMatrix<f64>,
    /// Feature identifiers.
    pub feature_ids: Vec<String>,
    /// Sample identifiers.
    pub sample_ids: Vec<String>,
    /// Name of the transformation applied.
    pub transformation: String,
    /// Geometric mean of the (observed) closed values per sample.
    pub geometric_means: Vec<f64>,
}

impl TransformedMatrix {
    /// Get the transformed value for a feature and sample.
    pub fn get(&self, feature: usize, sample: usize) -> f64 {
        self.data[(feature, sample)]
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Get a row (feature) as a vector.
    pub fn row(&self, feature: usize) -> Vec<f64> {
        self.data.row(feature).iter().cloned().collect()
    }

    /// Get a column (sample) as a vector.
    pub fn col(&self, sample: usize) -> Vec<f64> {
        self.data.column(sample).iter().cloned().collect()
    }

    /// Get reference to the underlying matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Copy with every non-finite value replaced by zero.
    pub fn zero_filled(&self) -> Self {
        let mut out = self.clone();
        out.data
            .iter_mut()
            .filter(|v| !v.is_finite())
            .for_each(|v| *v = 0.0);
        out
    }
}

/// Classic CLR of a matrix (rows = compositions, columns = components).
///
/// # Formula
/// For row i: CLR(x_ij) = log(x_ij / sum(x_i)) - mean_j(log(x_ij / sum(x_i)))
///
/// # Note
/// Input must be strictly positive (add pseudocounts first).
pub fn matrix_clr(mat: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    Ok(clr_with_centers(mat)?.0)
}

fn clr_with_centers(mat: &DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<f64>)> {
    let (n_rows, n_cols) = mat.shape();
    if n_rows == 0 || n_cols == 0 {
        return Err(TensorError::EmptyData(
            "Cannot apply CLR to empty matrix".to_string(),
        ));
    }

    for i in 0..n_rows {
        for j in 0..n_cols {
            let val = mat[(i, j)];
            if !(val > 0.0 && val.is_finite()) {
                return Err(TensorError::Domain(format!(
                    "CLR requires positive values; found {} at ({}, {})",
                    val, i, j
                )));
            }
        }
    }

    let log_data = matrix_closure(mat).map(f64::ln);
    let centers: Vec<f64> = (0..n_rows)
        .into_par_iter()
        .map(|i| log_data.row(i).sum() / n_cols as f64)
        .collect();

    let clr = DMatrix::from_fn(n_rows, n_cols, |i, j| log_data[(i, j)] - centers[i]);
    Ok((clr, centers))
}

/// Robust CLR of a whole table.
///
/// Structural zeros remain NaN in the result; see
/// [`TransformedMatrix::zero_filled`].
pub fn rclr_transformation(counts: &CountMatrix) -> Result<TransformedMatrix> {
    let (data, centers) = rclr_with_centers(&counts.to_dense_samples(), None)?;
    Ok(TransformedMatrix {
        data: data.transpose(),
        feature_ids: counts.feature_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        transformation: "rCLR".to_string(),
        geometric_means: centers.into_iter().map(f64::exp).collect(),
    })
}

/// Classic CLR of a whole table after adding a pseudocount.
///
/// A pseudocount of `0.0` uses the smallest non-zero count.
pub fn clr_transformation(counts: &CountMatrix, pseudocount: f64) -> Result<TransformedMatrix> {
    let pseudocount = resolve_pseudocount(counts, pseudocount)?;
    let data = add_pseudocount(counts, pseudocount)?;
    let (clr, centers) = clr_with_centers(&data.transpose())?;
    Ok(TransformedMatrix {
        data: clr.transpose(),
        feature_ids: counts.feature_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        transformation: format!("CLR (pseudocount={})", pseudocount),
        geometric_means: centers.into_iter().map(f64::exp).collect(),
    })
}
