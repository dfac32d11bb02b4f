//! Robust centered log-ratio (rclr) transformation.
//!
//! The rclr is the classic centered log-ratio computed only over observed
//! values: structural zeros are excluded from the per-composition center
//! instead of being replaced by a pseudocount. Entries that were zero in
//! the input come back as NaN.
//!
//! All functions here treat rows as compositions and columns as components.

use crate::data::validate_values;
use crate::error::{Result, TensorError};
use nalgebra::DMatrix;
use ndarray::{ArrayD, Axis};
use rayon::prelude::*;

/// Close each row so that it sums to one.
///
/// Unlike a strict closure this tolerates all-zero rows, which come back
/// as NaN. Such rows appear when a tensor slice has no observations.
pub fn matrix_closure(mat: &DMatrix<f64>) -> DMatrix<f64> {
    let row_sums: Vec<f64> = mat.row_iter().map(|row| row.sum()).collect();
    DMatrix::from_fn(mat.nrows(), mat.ncols(), |i, j| mat[(i, j)] / row_sums[i])
}

/// Arithmetic mean of each row over the entries where `mask` is true.
///
/// Rows with no unmasked entry have a NaN mean.
pub fn masked_row_means(mat: &DMatrix<f64>, mask: &DMatrix<bool>) -> Vec<f64> {
    (0..mat.nrows())
        .into_par_iter()
        .map(|i| {
            let (sum, count) = (0..mat.ncols())
                .filter(|&j| mask[(i, j)])
                .fold((0.0, 0usize), |(s, c), j| (s + mat[(i, j)], c + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Robust clr of a matrix (rows = compositions, columns = components).
///
/// With `branch_lengths`, each closed row is weighted per column and
/// closed again before the log is taken.
///
/// # Errors
/// * `Domain` if any value is negative, infinite or NaN
/// * `DimensionMismatch` if the weights do not match the column count
pub fn matrix_rclr(mat: &DMatrix<f64>, branch_lengths: Option<&[f64]>) -> Result<DMatrix<f64>> {
    Ok(rclr_with_centers(mat, branch_lengths)?.0)
}

/// Robust clr that also returns the per-row center (masked mean log).
pub(crate) fn rclr_with_centers(
    mat: &DMatrix<f64>,
    branch_lengths: Option<&[f64]>,
) -> Result<(DMatrix<f64>, Vec<f64>)> {
    validate_values(mat.iter().copied())?;

    let closed = match branch_lengths {
        Some(weights) => {
            if weights.len() != mat.ncols() {
                return Err(TensorError::DimensionMismatch {
                    expected: mat.ncols(),
                    actual: weights.len(),
                });
            }
            validate_values(weights.iter().copied())?;
            let first = matrix_closure(mat);
            let weighted =
                DMatrix::from_fn(mat.nrows(), mat.ncols(), |i, j| first[(i, j)] * weights[j]);
            matrix_closure(&weighted)
        }
        None => matrix_closure(mat),
    };

    let logged = closed.map(f64::ln);
    let mask = logged.map(|v| v.is_finite());
    let centers = masked_row_means(&logged, &mask);

    let centered = DMatrix::from_fn(logged.nrows(), logged.ncols(), |i, j| {
        if mask[(i, j)] {
            logged[(i, j)] - centers[i]
        } else {
            f64::NAN
        }
    });
    Ok((centered, centers))
}

/// The observation mask the rclr would use, without transforming.
///
/// `true` marks entries that stay finite under [`matrix_rclr`] (non-zero
/// input values); `false` marks structural zeros.
pub fn mask_value_only(mat: &DMatrix<f64>) -> Result<DMatrix<bool>> {
    validate_values(mat.iter().copied())?;
    Ok(mat.map(|v| v > 0.0))
}

/// Convert a dynamic array of at most two dimensions into a matrix.
///
/// Scalars and vectors become a single row.
pub fn array_as_matrix(array: &ArrayD<f64>) -> Result<DMatrix<f64>> {
    let values: Vec<f64> = array.iter().copied().collect();
    match array.ndim() {
        0 | 1 => Ok(DMatrix::from_row_slice(1, values.len(), &values)),
        2 => Ok(DMatrix::from_row_slice(
            array.shape()[0],
            array.shape()[1],
            &values,
        )),
        n => Err(TensorError::Shape(format!(
            "Input matrix can only have two dimensions or less, got {}",
            n
        ))),
    }
}

/// [`matrix_rclr`] over a dynamically shaped array.
pub fn matrix_rclr_dyn(array: &ArrayD<f64>, branch_lengths: Option<&[f64]>) -> Result<DMatrix<f64>> {
    matrix_rclr(&array_as_matrix(array)?, branch_lengths)
}

/// [`mask_value_only`] over a dynamically shaped array.
pub fn mask_value_only_dyn(array: &ArrayD<f64>) -> Result<DMatrix<bool>> {
    mask_value_only(&array_as_matrix(array)?)
}

/// Robust clr over an N-mode tensor.
///
/// The tensor is laid out as `[subjects, features, conditions...]`. Every
/// fiber along the feature axis is treated as one composition; the result
/// has the input's shape with non-finite values replaced by zero.
///
/// # Errors
/// * `Shape` if the tensor has fewer than two modes
/// * `Domain` if any value is negative, infinite or NaN
pub fn tensor_rclr(tensor: &ArrayD<f64>, branch_lengths: Option<&[f64]>) -> Result<ArrayD<f64>> {
    if tensor.ndim() < 2 {
        return Err(TensorError::Shape(
            "Tensor is less than 2-dimensions".to_string(),
        ));
    }
    validate_values(tensor.iter().copied())?;

    let n_features = tensor.shape()[1];
    let fibers: Vec<Vec<f64>> = tensor
        .lanes(Axis(1))
        .into_iter()
        .map(|lane| lane.to_vec())
        .collect();
    let flat = DMatrix::from_fn(fibers.len(), n_features, |i, j| fibers[i][j]);
    let transformed = matrix_rclr(&flat, branch_lengths)?;

    let mut out = ArrayD::zeros(tensor.raw_dim());
    for (i, mut lane) in out.lanes_mut(Axis(1)).into_iter().enumerate() {
        for j in 0..n_features {
            let v = transformed[(i, j)];
            lane[j] = if v.is_finite() { v } else { 0.0 };
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;
    use ndarray::IxDyn;

    #[test]
    fn test_closure_tolerates_zero_rows() {
        let mat = DMatrix::from_row_slice(2, 3, &[2.0, 2.0, 6.0, 0.0, 0.0, 0.0]);
        let closed = matrix_closure(&mat);
        assert_relative_eq!(closed[(0, 0)], 0.2, epsilon = 1e-12);
        assert_relative_eq!(closed[(0, 2)], 0.6, epsilon = 1e-12);
        assert!(closed[(1, 0)].is_nan());
    }

    #[test]
    fn test_rclr_manual_calculation() {
        // Row 0 of [[3,0,1],[0,2,2]]
        let mat = DMatrix::from_row_slice(2, 3, &[3.0, 0.0, 1.0, 0.0, 2.0, 2.0]);
        let result = matrix_rclr(&mat, Some(&[1.0, 1.0, 1.0])).unwrap();

        let a = (3.0_f64 / 4.0).ln();
        let b = (1.0_f64 / 4.0).ln();
        let mean = (a + b) / 2.0;
        assert_relative_eq!(result[(0, 0)], a - mean, epsilon = 1e-12);
        assert_relative_eq!(result[(0, 2)], b - mean, epsilon = 1e-12);
        assert!(!result[(0, 1)].is_finite());

        // Row 1 has two equal observed parts
        assert!(!result[(1, 0)].is_finite());
        assert_relative_eq!(result[(1, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(result[(1, 2)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rclr_equals_clr_without_zeros() {
        let mat = DMatrix::from_row_slice(2, 3, &[1.0, 4.0, 2.0, 5.0, 5.0, 10.0]);
        let result = matrix_rclr(&mat, None).unwrap();
        for i in 0..2 {
            let logs: Vec<f64> = (0..3).map(|j| mat[(i, j)].ln()).collect();
            let mean = logs.iter().sum::<f64>() / 3.0;
            for j in 0..3 {
                assert_relative_eq!(result[(i, j)], logs[j] - mean, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_rclr_inverts_to_proportions() {
        let mat = DMatrix::from_row_slice(2, 4, &[3.0, 0.0, 1.0, 6.0, 0.0, 2.0, 2.0, 4.0]);
        let result = matrix_rclr(&mat, None).unwrap();
        let closed = matrix_closure(&mat);
        for i in 0..2 {
            let exp: Vec<f64> = (0..4)
                .map(|j| if result[(i, j)].is_finite() { result[(i, j)].exp() } else { 0.0 })
                .collect();
            let total: f64 = exp.iter().sum();
            for j in 0..4 {
                assert_relative_eq!(exp[j] / total, closed[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_rclr_observed_entries_center_to_zero() {
        let mat = DMatrix::from_row_slice(1, 5, &[7.0, 0.0, 2.0, 0.0, 11.0]);
        let result = matrix_rclr(&mat, None).unwrap();
        let sum: f64 = result.iter().filter(|v| v.is_finite()).sum();
        assert_relative_eq!(sum, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rclr_all_zero_row_is_nan() {
        let mat = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 3.0]);
        let result = matrix_rclr(&mat, None).unwrap();
        assert!(result[(0, 0)].is_nan());
        assert!(result[(0, 1)].is_nan());
        assert!(result[(1, 0)].is_finite());
    }

    #[test]
    fn test_rclr_rejects_invalid_input() {
        for bad in [-1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mat = DMatrix::from_row_slice(1, 2, &[1.0, bad]);
            assert_eq!(matrix_rclr(&mat, None).unwrap_err().kind(), ErrorKind::Domain);
        }
    }

    #[test]
    fn test_rclr_weight_length_mismatch() {
        let mat = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        let err = matrix_rclr(&mat, Some(&[1.0, 1.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_zero_weight_masks_component() {
        let mat = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        let result = matrix_rclr(&mat, Some(&[1.0, 0.0, 2.0])).unwrap();
        assert!(!result[(0, 1)].is_finite());
        assert_relative_eq!(result[(0, 0)] + result[(0, 2)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mask_matches_rclr_finiteness() {
        let mat = DMatrix::from_row_slice(2, 3, &[3.0, 0.0, 1.0, 0.0, 2.0, 2.0]);
        let mask = mask_value_only(&mat).unwrap();
        let rclr = matrix_rclr(&mat, None).unwrap();
        assert_eq!(mask, rclr.map(|v| v.is_finite()));
    }

    #[test]
    fn test_dyn_rejects_three_dimensions() {
        let cube = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 1.0);
        assert_eq!(matrix_rclr_dyn(&cube, None).unwrap_err().kind(), ErrorKind::Shape);
        assert_eq!(mask_value_only_dyn(&cube).unwrap_err().kind(), ErrorKind::Shape);

        let vector = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 0.0, 1.0]).unwrap();
        let row = matrix_rclr_dyn(&vector, None).unwrap();
        assert_eq!(row.shape(), (1, 3));
        assert_relative_eq!(row[(0, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tensor_rclr_matches_slices() {
        // 2 subjects × 3 features × 2 conditions
        let data = vec![
            1.0, 2.0, // s0 f0 (c0, c1)
            3.0, 0.0, // s0 f1
            6.0, 2.0, // s0 f2
            0.0, 0.0, // s1 f0
            0.0, 5.0, // s1 f1
            0.0, 5.0, // s1 f2
        ];
        let tensor = ArrayD::from_shape_vec(IxDyn(&[2, 3, 2]), data).unwrap();
        let result = tensor_rclr(&tensor, None).unwrap();
        assert_eq!(result.shape(), &[2, 3, 2]);

        let slice = DMatrix::from_row_slice(1, 3, &[1.0, 3.0, 6.0]);
        let expected = matrix_rclr(&slice, None).unwrap();
        for f in 0..3 {
            assert_relative_eq!(result[[0, f, 0]], expected[(0, f)], epsilon = 1e-12);
        }
        // zero-origin and empty slices are filled with zero
        assert_eq!(result[[0, 1, 1]], 0.0);
        for f in 0..3 {
            assert_eq!(result[[1, f, 0]], 0.0);
        }
        assert_relative_eq!(result[[1, 1, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tensor_rclr_rejects_vectors() {
        let vector = ArrayD::from_elem(IxDyn(&[4]), 1.0);
        assert_eq!(tensor_rclr(&vector, None).unwrap_err().kind(), ErrorKind::Shape);
    }
}
