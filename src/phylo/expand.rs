//! Aggregation of tip counts onto every node of a tree.

use crate::data::CountMatrix;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{Result, TensorError};
use crate::normalize::clr::TransformedMatrix;
use crate::normalize::rclr::rclr_with_centers;
use crate::tree::{tree_topology_filter, NodeId, PhyloTree};
use crate::zero::pseudocount::resolve_pseudocount;
use nalgebra::DMatrix;
use std::collections::HashSet;

/// Counts for every node of a tree, columns in postorder.
#[derive(Debug, Clone)]
pub struct NodeCounts {
    /// Samples × nodes; an internal node holds the sum of its descendant tips.
    pub counts: DMatrix<f64>,
    /// Arena id of each column's node.
    pub node_ids: Vec<NodeId>,
    /// Branch length of each column's node (missing lengths are 0).
    pub branch_lengths: Vec<f64>,
    /// Row labels.
    pub sample_ids: Vec<String>,
}

/// Node-level table produced by [`fast_unifrac`].
#[derive(Debug, Clone)]
pub struct PhyloExpansion {
    /// Samples × retained nodes.
    pub counts_by_node: DMatrix<f64>,
    /// Branch length per retained node, strictly positive.
    pub branch_lengths: Vec<f64>,
    /// Feature id per retained node: the tip name for table features,
    /// `n<postorder index>` for internal nodes.
    pub feature_ids: Vec<String>,
    /// Arena id per retained node.
    pub node_ids: Vec<NodeId>,
    /// Postorder index per retained node.
    pub postorder_index: Vec<usize>,
    /// Row labels.
    pub sample_ids: Vec<String>,
    /// Feature ids of the input table.
    pub tip_ids: Vec<String>,
    /// Nodes dropped for having no counts or no branch length.
    pub diagnostics: Vec<Diagnostic>,
}

impl PhyloExpansion {
    /// Number of retained nodes.
    pub fn n_nodes(&self) -> usize {
        self.feature_ids.len()
    }

    /// Write the synthesized ids onto `tree`, see [`relabel_tree`].
    pub fn relabel_tree(&self, tree: &mut PhyloTree) -> Result<()> {
        relabel_tree(self, tree)
    }

    /// The expansion as a features × samples [`CountMatrix`].
    pub fn to_count_matrix(&self) -> Result<CountMatrix> {
        CountMatrix::from_dense(
            &self.counts_by_node.transpose(),
            self.feature_ids.clone(),
            self.sample_ids.clone(),
        )
    }
}

/// Sum tip counts up the tree.
///
/// Every node gets a column, in postorder with the root last. Tips absent
/// from the table and unnamed tips get zero counts.
///
/// # Errors
/// * `Config` if a table feature is not a tip of the tree
/// * `Config` if two tips share a name
pub fn vectorize_counts_and_tree(counts: &CountMatrix, tree: &PhyloTree) -> Result<NodeCounts> {
    let root = tree.require_root()?;
    let tip_index = tree.tip_index()?;

    let missing: Vec<&str> = counts
        .feature_ids()
        .iter()
        .filter(|id| !tip_index.contains_key(id.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(TensorError::Config(format!(
            "{} table features are not tips of the tree: {}",
            missing.len(),
            missing.join(", ")
        )));
    }

    let order = tree.postorder(root);
    let mut column_of = vec![usize::MAX; order.iter().copied().max().map_or(0, |m| m + 1)];
    for (col, &id) in order.iter().enumerate() {
        column_of[id] = col;
    }

    let n_samples = counts.n_samples();
    let mut node_counts = DMatrix::zeros(n_samples, order.len());

    for (feature, name) in counts.feature_ids().iter().enumerate() {
        let col = column_of[tip_index[name]];
        for (sample, value) in counts.row_dense(feature).into_iter().enumerate() {
            node_counts[(sample, col)] = value;
        }
    }

    for (col, &id) in order.iter().enumerate() {
        for &child in &tree[id].children {
            let child_col = column_of[child];
            for sample in 0..n_samples {
                node_counts[(sample, col)] += node_counts[(sample, child_col)];
            }
        }
    }

    let branch_lengths = order
        .iter()
        .map(|&id| tree[id].length.unwrap_or(0.0))
        .collect();

    Ok(NodeCounts {
        counts: node_counts,
        node_ids: order,
        branch_lengths,
        sample_ids: counts.sample_ids().to_vec(),
    })
}

/// Expand a table onto all nodes of the tree and drop uninformative nodes.
///
/// A node is kept when it has a positive total count and a positive
/// branch length. The root usually has no length and is dropped. Each
/// dropped node is reported as a [`Diagnostic`].
///
/// The tree is read, not modified. Use [`relabel_tree`] to carry the new
/// internal node ids back onto it.
///
/// # Errors
/// * `Config` as for [`vectorize_counts_and_tree`]
/// * `Domain` if every branch length is zero
pub fn fast_unifrac(counts: &CountMatrix, tree: &PhyloTree) -> Result<PhyloExpansion> {
    let node_counts = vectorize_counts_and_tree(counts, tree)?;

    if node_counts.branch_lengths.iter().sum::<f64>() == 0.0 {
        return Err(TensorError::Domain(
            "All tree branch lengths are zero; the tree cannot weight the table".to_string(),
        ));
    }

    let table_features: HashSet<&str> = counts.feature_ids().iter().map(String::as_str).collect();
    let mut keep = Vec::new();
    let mut feature_ids = Vec::new();
    let mut diagnostics = Vec::new();

    for (col, &id) in node_counts.node_ids.iter().enumerate() {
        let node = &tree[id];
        let feature_id = match &node.name {
            Some(name) if node.is_tip() && table_features.contains(name.as_str()) => name.clone(),
            _ => format!("n{}", col),
        };
        let total = node_counts.counts.column(col).sum();
        let length = node_counts.branch_lengths[col];

        if total <= 0.0 {
            diagnostics.push(Diagnostic::emit(
                DiagnosticKind::ZeroCountNodeDropped,
                feature_id,
                vec![],
                "node has no counts in any sample",
            ));
        } else if length <= 0.0 {
            diagnostics.push(Diagnostic::emit(
                DiagnosticKind::ZeroLengthNodeDropped,
                feature_id,
                vec![],
                "node has no branch length",
            ));
        } else {
            keep.push(col);
            feature_ids.push(feature_id);
        }
    }

    if keep.is_empty() {
        return Err(TensorError::EmptyData(
            "No tree node has both counts and a branch length".to_string(),
        ));
    }

    let counts_by_node = node_counts.counts.select_columns(keep.iter());
    log::info!(
        "Expanded {} features to {} tree nodes ({} dropped)",
        counts.n_features(),
        keep.len(),
        diagnostics.len()
    );

    Ok(PhyloExpansion {
        counts_by_node,
        branch_lengths: keep.iter().map(|&c| node_counts.branch_lengths[c]).collect(),
        node_ids: keep.iter().map(|&c| node_counts.node_ids[c]).collect(),
        postorder_index: keep,
        feature_ids,
        sample_ids: node_counts.sample_ids,
        tip_ids: counts.feature_ids().to_vec(),
        diagnostics,
    })
}

/// Name the retained internal nodes of `tree` after their expansion ids.
///
/// `tree` must be the tree the expansion was computed from, unchanged
/// since.
pub fn relabel_tree(expansion: &PhyloExpansion, tree: &mut PhyloTree) -> Result<()> {
    for (&id, feature_id) in expansion.node_ids.iter().zip(&expansion.feature_ids) {
        let node = tree.get_node_mut(id).ok_or_else(|| {
            TensorError::Config(format!("Node {} of the expansion is not in the tree", id))
        })?;
        if !node.is_tip() {
            node.name = Some(feature_id.clone());
        }
    }
    Ok(())
}

/// Reduce a tree to the table's features and collapse shallow clades.
///
/// Shears the tree to the table's feature ids, collapses single-child
/// nodes and applies [`tree_topology_filter`] with `min_depth`.
pub fn prepare_phylogeny(counts: &CountMatrix, tree: &mut PhyloTree, min_depth: usize) -> Result<()> {
    let names: HashSet<String> = counts.feature_ids().iter().cloned().collect();
    tree.shear(&names)?;
    tree.compact();
    tree_topology_filter(tree, min_depth)
}

/// Result of a phylogenetic log-ratio transformation.
#[derive(Debug, Clone)]
pub struct PhyloTransformed {
    /// Node-level counts (features × samples).
    pub counts_by_node: CountMatrix,
    /// Transformed node-level table (features × samples).
    pub transformed: TransformedMatrix,
    /// The underlying expansion.
    pub expansion: PhyloExpansion,
}

/// Phylogenetic robust clr of a table.
///
/// Prepares the tree with [`prepare_phylogeny`], expands the table onto its
/// nodes and applies the branch-length weighted rclr.
pub fn phylogenetic_rclr_transformation(
    counts: &CountMatrix,
    tree: &mut PhyloTree,
    min_depth: usize,
) -> Result<PhyloTransformed> {
    prepare_phylogeny(counts, tree, min_depth)?;
    weighted_transform(counts, tree, "phylo-rCLR".to_string())
}

/// Phylogenetic clr of a table after adding a pseudocount.
///
/// A pseudocount of `0.0` uses the smallest non-zero count.
pub fn phylogenetic_clr_transformation(
    counts: &CountMatrix,
    tree: &mut PhyloTree,
    pseudocount: f64,
    min_depth: usize,
) -> Result<PhyloTransformed> {
    let pseudocount = resolve_pseudocount(counts, pseudocount)?;
    let shifted = counts.add_scalar(pseudocount)?;
    prepare_phylogeny(&shifted, tree, min_depth)?;
    weighted_transform(
        &shifted,
        tree,
        format!("phylo-CLR (pseudocount={})", pseudocount),
    )
}

fn weighted_transform(
    counts: &CountMatrix,
    tree: &PhyloTree,
    transformation: String,
) -> Result<PhyloTransformed> {
    let expansion = fast_unifrac(counts, tree)?;
    let (data, centers) =
        rclr_with_centers(&expansion.counts_by_node, Some(&expansion.branch_lengths))?;
    let transformed = TransformedMatrix {
        data: data.transpose(),
        feature_ids: expansion.feature_ids.clone(),
        sample_ids: expansion.sample_ids.clone(),
        transformation,
        geometric_means: centers.into_iter().map(f64::exp).collect(),
    };
    Ok(PhyloTransformed {
        counts_by_node: expansion.to_count_matrix()?,
        transformed,
        expansion,
    })
}
