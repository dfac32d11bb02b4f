//! Pipeline composition and execution for tensor preprocessing.

mod runner;

pub use runner::{
    run_phylogenetic_sparse, Pipeline, PipelineConfig, PipelineOutput, PipelineStep,
};
