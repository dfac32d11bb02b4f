//! Topology filtering of shallow clades.

use crate::error::{Result, TensorError};
use crate::tree::arena::PhyloTree;
use crate::tree::node::NodeId;

/// Dissolve every internal node with at most `min_depth` descendant tips.
///
/// The tips of a dissolved node are re-attached to its parent as direct
/// children, so the tip set is unchanged and no count mass is lost when
/// the tree is later used to aggregate a table. The arena is compacted
/// afterwards when anything was removed, which invalidates held node ids.
///
/// `min_depth = 0` leaves the tree untouched. Calling the filter twice with
/// the same depth is the same as calling it once.
///
/// # Errors
/// `Config` if the tree is empty or has `min_depth` tips or fewer. The tree
/// is not modified in that case.
pub fn tree_topology_filter(tree: &mut PhyloTree, min_depth: usize) -> Result<()> {
    let root = tree.require_root()?;
    let n_tips = tree.compute_tip_counts()?;
    if n_tips <= min_depth {
        return Err(TensorError::Config(format!(
            "min_depth ({}) must be smaller than the number of tips in the tree ({})",
            min_depth, n_tips
        )));
    }

    let mut removed = 0usize;
    loop {
        let shallow: Vec<NodeId> = tree
            .postorder(root)
            .into_iter()
            .filter(|&id| !tree[id].is_tip() && tree[id].n <= min_depth)
            .collect();
        if shallow.is_empty() {
            break;
        }

        for id in shallow {
            let Some(node) = tree.get_node(id) else {
                continue;
            };
            let Some(parent) = node.parent else {
                continue;
            };
            for tip in tree.tips(id) {
                tree.add_child(parent, tip)?;
            }
            tree.remove_subtree(id);
            removed += 1;
        }
        tree.compute_tip_counts()?;
    }

    if removed > 0 {
        log::debug!(
            "Topology filter (min_depth={}) dissolved {} internal nodes",
            min_depth,
            removed
        );
        tree.compact();
        tree.compute_tip_counts()?;
    }
    Ok(())
}
