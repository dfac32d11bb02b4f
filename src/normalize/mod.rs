//! Log-ratio transformations for compositional data.
//!
//! - **rCLR**: robust centered log-ratio that masks structural zeros
//! - **CLR**: classic centered log-ratio on strictly positive data
//! - **RowTransform**: strategy trait used by the tensor builders

pub mod clr;
pub mod rclr;
pub mod transform;

pub use clr::{clr_transformation, matrix_clr, rclr_transformation, TransformedMatrix};
pub use rclr::{
    array_as_matrix, mask_value_only, mask_value_only_dyn, masked_row_means, matrix_closure,
    matrix_rclr, matrix_rclr_dyn, tensor_rclr,
};
pub use transform::{Clr, Rclr, RowTransform};
