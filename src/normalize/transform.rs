//! Pluggable row transformations.

use crate::error::Result;
use crate::normalize::clr::matrix_clr;
use crate::normalize::rclr::matrix_rclr;
use nalgebra::DMatrix;

/// A row-wise transformation of a compositions × components matrix.
///
/// Implementations receive optional per-column weights (branch lengths)
/// and may ignore them.
pub trait RowTransform: Send + Sync {
    /// Short name used in diagnostics and transformed-table labels.
    fn name(&self) -> &str;

    /// Transform every row of `mat`.
    fn transform(&self, mat: &DMatrix<f64>, branch_lengths: Option<&[f64]>) -> Result<DMatrix<f64>>;
}

/// Robust CLR, see [`matrix_rclr`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Rclr;

impl RowTransform for Rclr {
    fn name(&self) -> &str {
        "rCLR"
    }

    fn transform(&self, mat: &DMatrix<f64>, branch_lengths: Option<&[f64]>) -> Result<DMatrix<f64>> {
        matrix_rclr(mat, branch_lengths)
    }
}

/// Classic CLR, see [`matrix_clr`]. Branch lengths are not used.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clr;

impl RowTransform for Clr {
    fn name(&self) -> &str {
        "CLR"
    }

    fn transform(&self, mat: &DMatrix<f64>, _branch_lengths: Option<&[f64]>) -> Result<DMatrix<f64>> {
        matrix_clr(mat)
    }
}
