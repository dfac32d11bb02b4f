//! Pseudocount addition for zero handling.

use crate::data::CountMatrix;
use crate::error::{Result, TensorError};
use nalgebra::DMatrix;

/// Add a pseudocount to all entries, converting to a dense matrix.
///
/// The pseudocount is added to all entries (zero and non-zero) so the
/// classic, non-robust log-ratio can be applied afterwards.
///
/// # Arguments
/// * `counts` - The count matrix
/// * `pseudocount` - Value to add (must be positive and finite)
///
/// # Returns
/// A dense matrix (features × samples) with pseudocounts added.
pub fn add_pseudocount(counts: &CountMatrix, pseudocount: f64) -> Result<DMatrix<f64>> {
    if !(pseudocount > 0.0 && pseudocount.is_finite()) {
        return Err(TensorError::Config(
            "Pseudocount must be positive and finite".to_string(),
        ));
    }
    Ok(counts.to_dense().add_scalar(pseudocount))
}

/// Smallest non-zero value in the table.
///
/// Returns `None` when the table holds no non-zero value.
pub fn min_pseudocount(counts: &CountMatrix) -> Option<f64> {
    counts
        .data()
        .data()
        .iter()
        .copied()
        .filter(|&v| v > 0.0)
        .min_by(|a, b| a.total_cmp(b))
}

/// Resolve a requested pseudocount; `0.0` selects [`min_pseudocount`].
pub fn resolve_pseudocount(counts: &CountMatrix, pseudocount: f64) -> Result<f64> {
    if pseudocount == 0.0 {
        min_pseudocount(counts).ok_or_else(|| {
            TensorError::Domain("Cannot derive a pseudocount from an all-zero table".to_string())
        })
    } else {
        Ok(pseudocount)
    }
}
