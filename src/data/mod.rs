//! Core input data structures.

mod count_matrix;
mod metadata;

pub use count_matrix::CountMatrix;
pub(crate) use count_matrix::validate_values;
pub use metadata::{Metadata, Variable, VariableType};
