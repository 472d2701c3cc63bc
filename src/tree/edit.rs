//! Path-addressed edits for operator correction of a built tree.
//!
//! A [`TreePath`] is a list of child indices starting from the root list:
//! `[0]` is the first question, `[0, 1]` its second part. Every edit checks
//! its address before touching the tree, so a failed edit leaves the tree
//! exactly as it was.

use crate::error::EditError;
use crate::model::{NodeKind, QuestionNode};
use crate::tree::marks::{aggregate_marks, normalize_kinds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Address of a node: child indices from the root list down.
///
/// Displays as `0.1`; also parses the `0.children.1` form used by older
/// front ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(pub Vec<usize>);

impl TreePath {
    pub fn root_list() -> Self {
        Self(Vec::new())
    }

    pub fn is_root_list(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, index: usize) -> Self {
        let mut v = self.0.clone();
        v.push(index);
        Self(v)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for TreePath {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        let parts: Vec<String> = self.0.iter().map(usize::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// A path string that is neither `0.1` nor `0.children.1` style.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tree path '{0}'")]
pub struct ParsePathError(pub String);

impl FromStr for TreePath {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "<root>" {
            return Ok(Self::root_list());
        }
        s.split('.')
            .filter(|seg| *seg != "children")
            .map(|seg| seg.parse::<usize>().map_err(|_| ParsePathError(s.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(TreePath)
    }
}

/// The node at `path`, if any.
pub fn find<'a>(roots: &'a [QuestionNode], path: &TreePath) -> Option<&'a QuestionNode> {
    let (first, rest) = path.0.split_first()?;
    let mut node = roots.get(*first)?;
    for &i in rest {
        node = node.children.get(i)?;
    }
    Some(node)
}

/// Mutable access to the node at `path`, if any.
pub fn find_mut<'a>(roots: &'a mut [QuestionNode], path: &TreePath) -> Option<&'a mut QuestionNode> {
    let (first, rest) = path.0.split_first()?;
    let mut node = roots.get_mut(*first)?;
    for &i in rest {
        node = node.children.get_mut(i)?;
    }
    Some(node)
}

/// The child list addressed by `parent`: the root list for an empty path.
fn children_mut<'a>(
    roots: &'a mut Vec<QuestionNode>,
    parent: &TreePath,
) -> Result<&'a mut Vec<QuestionNode>, EditError> {
    if parent.is_root_list() {
        return Ok(roots);
    }
    find_mut(roots, parent)
        .map(|n| &mut n.children)
        .ok_or_else(|| EditError::NodeNotFound {
            path: parent.clone(),
        })
}

/// One correction, as sent by an operator's front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TreeEdit {
    /// Append an empty leaf to `parent_path`'s children.
    AddChild {
        #[serde(default)]
        parent_path: TreePath,
    },
    /// Remove child `child_index` of `parent_path`, with its subtree.
    RemoveNode {
        #[serde(default)]
        parent_path: TreePath,
        child_index: usize,
    },
    /// Set a leaf's marks.
    UpdateMarks { node_path: TreePath, marks: f64 },
    /// Rename a node.
    UpdateLabel { node_path: TreePath, label: String },
}

/// Apply one edit in place. On error the tree is unchanged.
///
/// Container marks are not touched here; run
/// [`crate::tree::marks::aggregate_marks`] afterwards, or use
/// [`EditSession`], which does.
pub fn apply_edit(roots: &mut Vec<QuestionNode>, edit: &TreeEdit) -> Result<(), EditError> {
    match edit {
        TreeEdit::AddChild { parent_path } => {
            let is_root_list = parent_path.is_root_list();
            let siblings = children_mut(roots, parent_path)?;
            let mut child = QuestionNode::leaf(String::new(), 1.0);
            child.order = siblings.len();
            siblings.push(child);
            if !is_root_list {
                if let Some(parent) = find_mut(roots, parent_path) {
                    parent.kind = NodeKind::Container;
                }
            }
            debug!("Added child under {}", parent_path);
        }

        TreeEdit::RemoveNode {
            parent_path,
            child_index,
        } => {
            let siblings = children_mut(roots, parent_path)?;
            if *child_index >= siblings.len() {
                return Err(EditError::ChildIndexOutOfRange {
                    path: parent_path.clone(),
                    index: *child_index,
                    len: siblings.len(),
                });
            }
            siblings.remove(*child_index);
            for (i, s) in siblings.iter_mut().enumerate() {
                s.order = i;
            }
            let emptied = siblings.is_empty();
            if emptied && !parent_path.is_root_list() {
                if let Some(parent) = find_mut(roots, parent_path) {
                    parent.kind = NodeKind::Leaf;
                    parent.marks = 0.0;
                }
            }
            debug!("Removed child {} of {}", child_index, parent_path);
        }

        TreeEdit::UpdateMarks { node_path, marks } => {
            if !marks.is_finite() || *marks < 0.0 {
                return Err(EditError::InvalidMarks { value: *marks });
            }
            let node = find_mut(roots, node_path).ok_or_else(|| EditError::NodeNotFound {
                path: node_path.clone(),
            })?;
            if !node.is_leaf() {
                return Err(EditError::NotALeaf {
                    path: node_path.clone(),
                });
            }
            node.marks = *marks;
        }

        TreeEdit::UpdateLabel { node_path, label } => {
            let node = find_mut(roots, node_path).ok_or_else(|| EditError::NodeNotFound {
                path: node_path.clone(),
            })?;
            node.label = label.clone();
        }
    }
    Ok(())
}

/// A single-writer correction session over one imported tree.
///
/// Owns the tree between slicing and persistence; every successful edit
/// re-runs the mark aggregator and bumps `revision`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "StoredSession")]
pub struct EditSession {
    tree: Vec<QuestionNode>,
    revision: u64,
}

#[derive(Deserialize)]
struct StoredSession {
    tree: Vec<QuestionNode>,
    revision: u64,
}

impl From<StoredSession> for EditSession {
    fn from(stored: StoredSession) -> Self {
        Self {
            revision: stored.revision,
            ..Self::new(stored.tree)
        }
    }
}

impl EditSession {
    /// Start a session. Node kinds are corrected to match the tree's shape
    /// before marks are aggregated.
    pub fn new(mut tree: Vec<QuestionNode>) -> Self {
        let fixed = normalize_kinds(&mut tree);
        if fixed > 0 {
            warn!("Corrected the kind of {} nodes to match their children", fixed);
        }
        aggregate_marks(&mut tree);
        Self { tree, revision: 0 }
    }

    pub fn tree(&self) -> &[QuestionNode] {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Vec<QuestionNode> {
        &mut self.tree
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn find(&self, path: &TreePath) -> Option<&QuestionNode> {
        find(&self.tree, path)
    }

    /// Apply an edit and re-aggregate marks.
    pub fn apply(&mut self, edit: &TreeEdit) -> Result<u64, EditError> {
        apply_edit(&mut self.tree, edit)?;
        aggregate_marks(&mut self.tree);
        self.revision += 1;
        Ok(self.revision)
    }

    /// Hand the corrected tree over, e.g. to persistence.
    pub fn into_tree(self) -> Vec<QuestionNode> {
        self.tree
    }
}
