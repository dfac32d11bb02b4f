//! Phylogenetic expansion of count tables.
//!
//! Tip counts are summed onto every internal node of a tree so that each
//! clade becomes a feature weighted by its branch length.

pub mod expand;
pub mod taxonomy;

pub use expand::{
    fast_unifrac, phylogenetic_clr_transformation, phylogenetic_rclr_transformation,
    prepare_phylogeny, relabel_tree, vectorize_counts_and_tree, NodeCounts, PhyloExpansion,
    PhyloTransformed,
};
pub use taxonomy::{
    create_taxonomy_metadata, feature_taxonomy, find_taxonomy_column, normalize_rank_strings,
    TaxonomyRecord, VALID_TAXONOMY_COLUMN_NAMES,
};
