//! Compositional Tensor Preprocessing Library
//!
//! This library turns sparse microbial count tables into the inputs of
//! tensor factorization methods for longitudinal, repeated-measures data.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (CountMatrix, Metadata)
//! - **zero**: Zero handling strategies (pseudocount)
//! - **normalize**: Log-ratio transforms (rCLR, CLR, tensor rCLR)
//! - **tree**: Rooted phylogenies (shear, prune, topology filter)
//! - **phylo**: Phylogenetic expansion of tables and taxonomy labels
//! - **tensor**: Dense tensors and per-subject sparse series
//! - **pipeline**: Pipeline composition and execution
//! - **diagnostics**: Non-fatal events reported during preprocessing
//!
//! # Example
//!
//! ```no_run
//! use compositional_tensor::prelude::*;
//!
//! # fn demo(counts: &CountMatrix, metadata: &Metadata, tree: &mut PhyloTree) -> Result<()> {
//! let output = Pipeline::new()
//!     .shear_tree()
//!     .filter_topology(2)
//!     .phylo_expand()
//!     .build_sparse(SparseTensorConfig::new("subject", "day"))
//!     .run(counts, metadata, Some(tree))?;
//!
//! if let Some(series) = output.sparse() {
//!     println!("{} subjects", series.n_subjects());
//! }
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod diagnostics;
pub mod error;
pub mod normalize;
pub mod phylo;
pub mod pipeline;
pub mod tensor;
pub mod tree;
pub mod zero;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::data::{CountMatrix, Metadata, Variable, VariableType};
    pub use crate::diagnostics::{count_kind, Diagnostic, DiagnosticKind};
    pub use crate::error::{ErrorKind, Result, TensorError};
    pub use crate::normalize::{
        clr_transformation, matrix_clr, matrix_rclr, rclr_transformation, tensor_rclr, Clr, Rclr,
        RowTransform, TransformedMatrix,
    };
    pub use crate::phylo::{
        create_taxonomy_metadata, fast_unifrac, phylogenetic_clr_transformation,
        phylogenetic_rclr_transformation, prepare_phylogeny, PhyloExpansion, TaxonomyRecord,
    };
    pub use crate::pipeline::{
        run_phylogenetic_sparse, Pipeline, PipelineConfig, PipelineOutput, PipelineStep,
    };
    pub use crate::tensor::{
        build_dense, build_sparse, svd_centralize, DenseTensor, DenseTensorConfig,
        ReplicateHandling, SparseTensor, SparseTensorConfig,
    };
    pub use crate::tree::{tree_topology_filter, NodeId, PhyloTree};
    pub use crate::zero::{add_pseudocount, resolve_pseudocount};
}
