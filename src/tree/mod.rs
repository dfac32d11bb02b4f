//! Rooted phylogenetic trees.
//!
//! - [`PhyloTree`]: arena tree with traversal, shearing and pruning
//! - [`tree_topology_filter`]: dissolve clades with too few tips

pub mod arena;
pub mod node;
pub mod topology;

pub use arena::PhyloTree;
pub use node::{Node, NodeId};
pub use topology::tree_topology_filter;
