//! Tensor builders.
//!
//! - **dense**: fixed-shape `[subjects, features, conditions...]` arrays
//! - **sparse**: per-subject feature × state series with replicate policies
//! - **centralize**: SVD removal of the subject-shared mean structure

pub mod centralize;
pub mod dense;
pub mod replicate;
pub mod sparse;

pub use centralize::{svd_centralize, Centralized};
pub use dense::{build_dense, build_dense_with_config, DenseTensor, DenseTensorConfig};
pub use replicate::ReplicateHandling;
pub use sparse::{
    build_sparse, build_sparse_with_config, build_sparse_with_transform, SparseTensor,
    SparseTensorConfig,
};
