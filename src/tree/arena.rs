//! Arena-backed rooted tree.
//!
//! Nodes live in a single `Vec` and refer to each other by index. Removal
//! is a soft delete; [`PhyloTree::compact`] rebuilds the arena without the
//! deleted nodes.

use crate::error::{Result, TensorError};
use crate::tree::node::{Node, NodeId};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::ops::Index;

/// A rooted phylogenetic tree.
#[derive(Debug, Clone, Default)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl PhyloTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detached node and return its id.
    ///
    /// The first node added becomes the root unless [`set_root`](Self::set_root)
    /// is called.
    pub fn add_node(&mut self, name: Option<&str>, length: Option<f64>) -> NodeId {
        let id = self.nodes.len();
        self.nodes
            .push(Node::new(id, name.map(str::to_string), length));
        if self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    /// Make `id` the root.
    pub fn set_root(&mut self, id: NodeId) -> Result<()> {
        self.live(id)?;
        self.root = Some(id);
        Ok(())
    }

    /// Append `child` as the last child of `parent`.
    ///
    /// A child that already has a parent is moved.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.live(parent)?;
        self.live(child)?;
        if parent == child || self.is_ancestor(child, parent) {
            return Err(TensorError::Config(format!(
                "Attaching node {} under node {} would create a cycle",
                child, parent
            )));
        }
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        Ok(())
    }

    /// Root id, if the tree has any node.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Live node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).filter(|n| !n.deleted)
    }

    /// Mutable live node by id.
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).filter(|n| !n.deleted)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.deleted).count()
    }

    /// True when the tree has no live node.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the node is a tip. Unknown ids are not tips.
    pub fn is_tip(&self, id: NodeId) -> bool {
        self.get_node(id).map(Node::is_tip).unwrap_or(false)
    }

    /// Nodes below `start` in postorder (children before parents), `start` last.
    pub fn postorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if self.get_node(start).is_none() {
            return order;
        }
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in self.nodes[id].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// Nodes below `start` in preorder (parents before children), `start` first.
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if self.get_node(start).is_none() {
            return order;
        }
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Descendant tips of `start` in left-to-right order, `start` excluded.
    pub fn tips(&self, start: NodeId) -> Vec<NodeId> {
        self.preorder(start)
            .into_iter()
            .filter(|&id| id != start && self.nodes[id].is_tip())
            .collect()
    }

    /// All tips of the tree. A single-node tree is its own tip.
    pub fn all_tips(&self) -> Vec<NodeId> {
        match self.root {
            Some(root) => self
                .preorder(root)
                .into_iter()
                .filter(|&id| self.nodes[id].is_tip())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Names of all named tips.
    pub fn tip_names(&self) -> Vec<String> {
        self.all_tips()
            .into_iter()
            .filter_map(|id| self.nodes[id].name.clone())
            .collect()
    }

    /// First tip carrying `name`.
    pub fn find_tip(&self, name: &str) -> Option<NodeId> {
        self.all_tips()
            .into_iter()
            .find(|&id| self.nodes[id].name.as_deref() == Some(name))
    }

    /// Map from tip name to node id.
    ///
    /// # Errors
    /// `Config` if two tips share a name.
    pub fn tip_index(&self) -> Result<HashMap<String, NodeId>> {
        let mut index = HashMap::new();
        for id in self.all_tips() {
            if let Some(name) = &self.nodes[id].name {
                if index.insert(name.clone(), id).is_some() {
                    return Err(TensorError::Config(format!(
                        "Tip name '{}' occurs more than once in the tree",
                        name
                    )));
                }
            }
        }
        Ok(index)
    }

    /// Fill [`Node::n`] for every node and return the root's count.
    pub fn compute_tip_counts(&mut self) -> Result<usize> {
        let root = self.require_root()?;
        for id in self.postorder(root) {
            let n = if self.nodes[id].is_tip() {
                1
            } else {
                self.nodes[id]
                    .children
                    .iter()
                    .map(|&c| self.nodes[c].n)
                    .sum()
            };
            self.nodes[id].n = n;
        }
        Ok(self.nodes[root].n)
    }

    /// Remove `id` from its parent's children. The node stays live.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) {
            self.nodes[parent].children.retain(|&c| c != id);
            self.nodes[id].parent = None;
        }
    }

    /// Detach `id` and soft-delete it together with everything below it.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if self.get_node(id).is_none() {
            return;
        }
        self.detach(id);
        for node in self.postorder(id) {
            self.nodes[node].deleted = true;
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    /// Keep only the tips named in `names`, then [`prune`](Self::prune).
    ///
    /// Internal nodes left without children are removed bottom-up.
    ///
    /// # Errors
    /// `Config` if the tree is empty or no tip name is in `names`.
    pub fn shear(&mut self, names: &HashSet<String>) -> Result<()> {
        let root = self.require_root()?;
        let order = self.postorder(root);
        let keep = order.iter().any(|&id| {
            self.nodes[id].is_tip()
                && self.nodes[id]
                    .name
                    .as_ref()
                    .map(|n| names.contains(n))
                    .unwrap_or(false)
        });
        if !keep {
            return Err(TensorError::Config(
                "No tip names of the tree occur in the table".to_string(),
            ));
        }

        let internal: HashSet<NodeId> = order
            .iter()
            .copied()
            .filter(|&id| !self.nodes[id].is_tip())
            .collect();

        for id in order {
            if id == root {
                continue;
            }
            let node = &self.nodes[id];
            let drop = if internal.contains(&id) {
                node.children.is_empty()
            } else {
                !node.name.as_ref().map(|n| names.contains(n)).unwrap_or(false)
            };
            if drop {
                self.remove_subtree(id);
            }
        }

        self.prune();
        Ok(())
    }

    /// Collapse internal nodes that have a single child.
    ///
    /// The child takes the node's place and its branch length becomes the
    /// sum of both lengths. A root with a single internal child adopts
    /// that child's children.
    pub fn prune(&mut self) {
        let Some(root) = self.root else {
            return;
        };

        let unary: Vec<NodeId> = self
            .preorder(root)
            .into_iter()
            .filter(|&id| id != root && self.nodes[id].children.len() == 1)
            .collect();

        for id in unary {
            let child = self.nodes[id].children[0];
            let Some(parent) = self.nodes[id].parent else {
                continue;
            };
            let merged = sum_lengths(self.nodes[id].length, self.nodes[child].length);

            if let Some(pos) = self.nodes[parent].children.iter().position(|&c| c == id) {
                self.nodes[parent].children[pos] = child;
            }
            self.nodes[child].parent = Some(parent);
            self.nodes[child].length = merged;
            self.nodes[id].children.clear();
            self.nodes[id].parent = None;
            self.nodes[id].deleted = true;
        }

        if self.nodes[root].children.len() == 1 {
            let child = self.nodes[root].children[0];
            if !self.nodes[child].is_tip() {
                let grandchildren = std::mem::take(&mut self.nodes[child].children);
                for &gc in &grandchildren {
                    self.nodes[gc].parent = Some(root);
                }
                self.nodes[root].children = grandchildren;
                if self.nodes[root].name.is_none() {
                    self.nodes[root].name = self.nodes[child].name.take();
                }
                self.nodes[child].parent = None;
                self.nodes[child].deleted = true;
            }
        }
    }

    /// Rebuild the arena without soft-deleted nodes.
    ///
    /// Node ids change; ids held from before the call are invalid.
    pub fn compact(&mut self) {
        let mut old_to_new: HashMap<NodeId, NodeId> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for node in self.nodes.iter().filter(|n| !n.deleted) {
            old_to_new.insert(node.id, nodes.len());
            nodes.push(node.clone());
        }

        for node in nodes.iter_mut() {
            node.id = old_to_new[&node.id];
            node.parent = node.parent.and_then(|p| old_to_new.get(&p).copied());
            node.children = node
                .children
                .iter()
                .filter_map(|c| old_to_new.get(c).copied())
                .collect();
        }

        self.root = self.root.and_then(|r| old_to_new.get(&r).copied());
        self.nodes = nodes;
    }

    /// Newick rendering, e.g. `((A:1,B:2)n1:0.5,C:1);`.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.write_newick(root, &mut out);
        }
        out.push(';');
        out
    }

    fn write_newick(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(child, out);
            }
            out.push(')');
        }
        out.push_str(node.name_or_empty());
        if let Some(length) = node.length {
            let _ = write!(out, ":{}", length);
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.nodes[id].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[p].parent;
        }
        false
    }

    fn live(&self, id: NodeId) -> Result<()> {
        self.get_node(id).map(|_| ()).ok_or_else(|| {
            TensorError::Config(format!("Node {} does not exist in the tree", id))
        })
    }

    pub(crate) fn require_root(&self) -> Result<NodeId> {
        self.root
            .ok_or_else(|| TensorError::Config("Tree is empty".to_string()))
    }
}

impl Index<NodeId> for PhyloTree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

fn sum_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ((A:1,B:2)x:0.5,(C:1)y:1)r;
    fn create_tree() -> PhyloTree {
        let mut tree = PhyloTree::new();
        let r = tree.add_node(Some("r"), None);
        let x = tree.add_node(Some("x"), Some(0.5));
        let y = tree.add_node(Some("y"), Some(1.0));
        let a = tree.add_node(Some("A"), Some(1.0));
        let b = tree.add_node(Some("B"), Some(2.0));
        let c = tree.add_node(Some("C"), Some(1.0));
        tree.add_child(r, x).unwrap();
        tree.add_child(r, y).unwrap();
        tree.add_child(x, a).unwrap();
        tree.add_child(x, b).unwrap();
        tree.add_child(y, c).unwrap();
        tree
    }

    fn names(tree: &PhyloTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| tree[id].name_or_empty().to_string()).collect()
    }

    #[test]
    fn test_traversals() {
        let tree = create_tree();
        let root = tree.root().unwrap();
        assert_eq!(names(&tree, &tree.postorder(root)), vec!["A", "B", "x", "C", "y", "r"]);
        assert_eq!(names(&tree, &tree.preorder(root)), vec!["r", "x", "A", "B", "y", "C"]);
        assert_eq!(names(&tree, &tree.tips(root)), vec!["A", "B", "C"]);
        assert_eq!(tree.find_tip("B"), Some(4));
        assert_eq!(tree.find_tip("x"), None);
    }

    #[test]
    fn test_tip_counts() {
        let mut tree = create_tree();
        assert_eq!(tree.compute_tip_counts().unwrap(), 3);
        assert_eq!(tree[1].n, 2);
        assert_eq!(tree[2].n, 1);
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let mut tree = create_tree();
        assert!(tree.add_child(3, 1).is_err());
        assert!(tree.add_child(1, 0).is_err());
    }

    #[test]
    fn test_prune_merges_lengths() {
        let mut tree = create_tree();
        tree.prune();
        tree.compact();
        assert_eq!(tree.len(), 5);
        let c = tree.find_tip("C").unwrap();
        assert_eq!(tree[c].length, Some(2.0));
        assert_eq!(tree[c].parent, tree.root());
        assert_eq!(tree.to_newick(), "((A:1,B:2)x:0.5,C:2)r;");
    }

    #[test]
    fn test_shear_removes_emptied_nodes() {
        let mut tree = create_tree();
        let keep: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        tree.shear(&keep).unwrap();
        tree.compact();
        // y loses its only tip, then the root has a single child x
        assert_eq!(tree.to_newick(), "(A:1,B:2)r;");
    }

    #[test]
    fn test_shear_without_overlap_fails() {
        let mut tree = create_tree();
        let keep: HashSet<String> = ["Q".to_string()].into_iter().collect();
        assert!(tree.shear(&keep).is_err());
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn test_duplicate_tip_names() {
        let mut tree = create_tree();
        let root = tree.root().unwrap();
        let dup = tree.add_node(Some("A"), Some(1.0));
        tree.add_child(root, dup).unwrap();
        assert!(tree.tip_index().is_err());
    }

    #[test]
    fn test_compact_remaps_ids() {
        let mut tree = create_tree();
        tree.remove_subtree(1);
        assert_eq!(tree.len(), 3);
        tree.compact();
        let root = tree.root().unwrap();
        assert_eq!(root, 0);
        assert_eq!(names(&tree, &tree.postorder(root)), vec!["C", "y", "r"]);
        for id in tree.postorder(root) {
            assert_eq!(tree[id].id, id);
        }
    }
}
