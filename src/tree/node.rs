//! Tree node stored in the [`PhyloTree`](super::PhyloTree) arena.

/// Index of a node inside its tree's arena.
pub type NodeId = usize;

/// A node of a rooted phylogenetic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Arena index.
    pub id: NodeId,
    /// Node label; tips carry feature ids, internal nodes are often unnamed.
    pub name: Option<String>,
    /// Length of the branch leading to this node.
    pub length: Option<f64>,
    /// Parent node (`None` for the root and for detached nodes).
    pub parent: Option<NodeId>,
    /// Child nodes in order.
    pub children: Vec<NodeId>,
    /// Number of descendant tips (1 for a tip), see
    /// [`PhyloTree::compute_tip_counts`](super::PhyloTree::compute_tip_counts).
    pub n: usize,
    pub(crate) deleted: bool,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: Option<String>, length: Option<f64>) -> Self {
        Self {
            id,
            name,
            length,
            parent: None,
            children: Vec::new(),
            n: 0,
            deleted: false,
        }
    }

    /// A tip has no children.
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }

    /// The root has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Name, or the empty string for unnamed nodes.
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}
