//! Bottom-up mark totals.
//!
//! A leaf's marks are its own; a container's are the sum over its children.
//! Leaves are never written, so running the aggregator twice, or after any
//! edit, gives the same tree.
//!
//! Both rely on `kind` matching the tree's shape. Trees that arrive as JSON
//! go through [`normalize_kinds`] first.

use crate::model::{NodeKind, QuestionNode};

/// Marks of `node` as the aggregator defines them, without mutating anything.
pub fn subtree_marks(node: &QuestionNode) -> f64 {
    if node.is_leaf() {
        node.marks
    } else {
        node.children.iter().map(subtree_marks).sum()
    }
}

/// Rewrite every container's `marks` in place. Returns the total over `roots`.
pub fn aggregate_marks(roots: &mut [QuestionNode]) -> f64 {
    roots.iter_mut().map(aggregate_node).sum()
}

fn aggregate_node(node: &mut QuestionNode) -> f64 {
    if !node.is_leaf() {
        node.marks = node.children.iter_mut().map(aggregate_node).sum();
    }
    node.marks
}

/// Make every node a leaf exactly when it has no children. A childless
/// container becomes a zero-mark leaf. Returns the number of nodes changed.
pub fn normalize_kinds(roots: &mut [QuestionNode]) -> usize {
    roots.iter_mut().map(normalize_node).sum()
}

fn normalize_node(node: &mut QuestionNode) -> usize {
    let below: usize = node.children.iter_mut().map(normalize_node).sum();
    let kind = if node.children.is_empty() {
        NodeKind::Leaf
    } else {
        NodeKind::Container
    };
    if node.kind == kind {
        return below;
    }
    if kind == NodeKind::Leaf {
        node.marks = 0.0;
    }
    node.kind = kind;
    below + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<QuestionNode> {
        let mut q1 = QuestionNode::container("1");
        q1.push_child(QuestionNode::leaf("a", 2.0));
        let mut b = QuestionNode::container("b");
        b.push_child(QuestionNode::leaf("i", 1.0));
        b.push_child(QuestionNode::leaf("ii", 3.5));
        q1.push_child(b);
        vec![q1, QuestionNode::leaf("2", 4.0)]
    }

    #[test]
    fn containers_sum_descendant_leaves() {
        let mut tree = sample();
        let total = aggregate_marks(&mut tree);
        assert_eq!(total, 10.5);
        assert_eq!(tree[0].marks, 6.5);
        assert_eq!(tree[0].children[1].marks, 4.5);
        assert_eq!(tree[1].marks, 4.0);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let mut tree = sample();
        aggregate_marks(&mut tree);
        let first: Vec<f64> = tree.iter().map(|n| n.marks).collect();
        aggregate_marks(&mut tree);
        let second: Vec<f64> = tree.iter().map(|n| n.marks).collect();
        assert_eq!(first, second);
        assert_eq!(tree[0].children[0].marks, 2.0);
    }

    #[test]
    fn stale_container_value_is_overwritten() {
        let mut tree = sample();
        tree[0].marks = 99.0;
        assert_eq!(subtree_marks(&tree[0]), 6.5);
        aggregate_marks(&mut tree);
        assert_eq!(tree[0].marks, 6.5);
    }

    #[test]
    fn empty_container_totals_zero() {
        let mut tree = vec![QuestionNode::container("3")];
        assert_eq!(tree[0].kind, NodeKind::Container);
        assert_eq!(aggregate_marks(&mut tree), 0.0);
    }

    #[test]
    fn leaf_with_children_becomes_a_container() {
        let mut q = QuestionNode::leaf("1", 4.0);
        q.children = vec![QuestionNode::leaf("a", 2.0), QuestionNode::leaf("b", 3.0)];
        let mut tree = vec![q, QuestionNode::container("2")];

        assert_eq!(normalize_kinds(&mut tree), 2);
        assert_eq!(tree[0].kind, NodeKind::Container);
        assert_eq!(tree[1].kind, NodeKind::Leaf);
        assert_eq!(tree[1].marks, 0.0);
        assert_eq!(aggregate_marks(&mut tree), 5.0);
        assert_eq!(normalize_kinds(&mut tree), 0);
    }
}
