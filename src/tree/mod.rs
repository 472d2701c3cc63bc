//! The question tree: building it from band intervals, totalling marks,
//! correcting it, and persisting it.
//!
//! ```text
//! intervals ──▶ builder ──▶ marks ──▶ edit (operator) ──▶ persist
//! ```
//!
//! Nodes own their children outright; there are no parent pointers.
//! In-memory addressing is by [`edit::TreePath`], storage addressing by the
//! [`crate::model::RecordId`] each node receives on persistence.

pub mod builder;
pub mod edit;
pub mod marks;
pub mod parse;
pub mod persist;

pub use builder::{build_tree, BuiltTree, TreeBuilder};
pub use edit::{apply_edit, find, find_mut, EditSession, TreeEdit, TreePath};
pub use marks::{aggregate_marks, normalize_kinds, subtree_marks};
pub use persist::{persist, InMemoryStore, PersistContext, QuestionStore};
