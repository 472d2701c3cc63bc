//! Recursive, all-or-nothing persistence of a corrected tree.
//!
//! Nodes are written depth-first, pre-order, so every parent has an id
//! before its children are written. The storage collaborator provides the
//! transaction; this module guarantees the write order, rolls back on the
//! first failure, and only writes the new ids onto the in-memory tree once
//! the commit has succeeded.

use crate::error::{PersistError, StoreError};
use crate::model::{NodeKind, QuestionNode, RecordId, SpaceType};
use crate::pipeline::encode::encode_png;
use crate::tree::edit::TreePath;
use crate::tree::marks::{normalize_kinds, subtree_marks};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Where an import is filed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistContext {
    pub grade: String,
    pub subject: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub owner: String,
}

impl PersistContext {
    fn validate(&self) -> Result<(), PersistError> {
        if self.grade.trim().is_empty() {
            return Err(PersistError::MissingContext("grade"));
        }
        if self.subject.trim().is_empty() {
            return Err(PersistError::MissingContext("subject"));
        }
        Ok(())
    }
}

/// One question record as handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub parent_id: Option<RecordId>,
    pub label: String,
    pub marks: f64,
    pub kind: NodeKind,
    /// PNG bytes; roots only.
    #[serde(skip)]
    pub content_image: Option<Vec<u8>>,
    pub content_text: String,
    pub answer_text: Option<String>,
    pub order: usize,
    pub grade: String,
    pub subject: String,
    pub topic: Option<String>,
    pub year: Option<i32>,
    pub owner: String,
}

/// One answer-space record, scoped to its question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnswerSpace {
    pub question_id: RecordId,
    pub space_type: SpaceType,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub marks: f64,
    pub order: usize,
    pub config: Map<String, Value>,
}

/// The storage side of persistence.
///
/// Implementations must make everything between `begin_transaction` and
/// `commit` visible atomically, and discard it on `rollback`.
pub trait QuestionStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError>;
    fn create_question(&mut self, record: &NewQuestion) -> Result<RecordId, StoreError>;
    fn create_answer_space(&mut self, record: &NewAnswerSpace) -> Result<RecordId, StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Persist `roots` in one transaction and return the root ids.
///
/// On success every node's `id` is set. On failure the transaction is
/// rolled back, no `id` is set, and the error names the node that failed.
pub fn persist<S: QuestionStore + ?Sized>(
    store: &mut S,
    roots: &mut [QuestionNode],
    ctx: &PersistContext,
) -> Result<Vec<RecordId>, PersistError> {
    ctx.validate()?;
    let fixed = normalize_kinds(roots);
    if fixed > 0 {
        warn!("Corrected the kind of {} nodes before writing", fixed);
    }
    store.begin_transaction().map_err(PersistError::Begin)?;

    // Ids in pre-order, matching the traversal used to write them back.
    let mut assigned = Vec::new();
    let written = roots.iter().enumerate().try_for_each(|(i, root)| {
        write_node(store, root, None, &TreePath(vec![i]), ctx, &mut assigned)
    });

    if let Err(e) = written {
        warn!("Persist failed, rolling back: {}", e);
        if let Err(rb) = store.rollback() {
            warn!("Rollback failed: {}", rb);
        }
        return Err(e);
    }

    store.commit().map_err(|e| {
        if let Err(rb) = store.rollback() {
            warn!("Rollback after failed commit failed: {}", rb);
        }
        PersistError::Commit(e)
    })?;

    let mut ids = assigned.into_iter();
    for root in roots.iter_mut() {
        assign_ids(root, &mut ids);
    }
    let root_ids: Vec<RecordId> = roots.iter().filter_map(|r| r.id).collect();
    info!("Persisted {} questions", root_ids.len());
    Ok(root_ids)
}

fn write_node<S: QuestionStore + ?Sized>(
    store: &mut S,
    node: &QuestionNode,
    parent_id: Option<RecordId>,
    path: &TreePath,
    ctx: &PersistContext,
    assigned: &mut Vec<RecordId>,
) -> Result<(), PersistError> {
    let content_image = match (&parent_id, &node.content_image) {
        (None, Some(img)) => Some(encode_png(img).map_err(|e| PersistError::Encode {
            path: path.clone(),
            detail: e.to_string(),
        })?),
        _ => None,
    };

    let record = NewQuestion {
        parent_id,
        label: node.label.clone(),
        marks: subtree_marks(node),
        kind: node.kind,
        content_image,
        content_text: node.content_text.clone(),
        answer_text: node.answer_text.clone(),
        order: node.order,
        grade: ctx.grade.clone(),
        subject: ctx.subject.clone(),
        topic: ctx.topic.clone(),
        year: ctx.year,
        owner: ctx.owner.clone(),
    };
    let id = store
        .create_question(&record)
        .map_err(|source| PersistError::WriteQuestion {
            path: path.clone(),
            label: node.label.clone(),
            source,
        })?;
    debug!("Wrote question {} '{}' → id {}", path, node.label, id);
    assigned.push(id);

    for (index, space) in node.answer_spaces.iter().enumerate() {
        let record = NewAnswerSpace {
            question_id: id,
            space_type: space.space_type,
            x: space.x,
            y: space.y,
            width: space.width,
            height: space.height,
            marks: space.marks,
            order: index,
            config: space.config.clone(),
        };
        store
            .create_answer_space(&record)
            .map_err(|source| PersistError::WriteAnswerSpace {
                path: path.clone(),
                index,
                source,
            })?;
    }

    for (i, child) in node.children.iter().enumerate() {
        write_node(store, child, Some(id), &path.child(i), ctx, assigned)?;
    }
    Ok(())
}

fn assign_ids(node: &mut QuestionNode, ids: &mut impl Iterator<Item = RecordId>) {
    node.id = ids.next();
    for child in &mut node.children {
        assign_ids(child, ids);
    }
}

// ── In-memory store ──────────────────────────────────────────────────────

/// A committed question row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: NewQuestion,
    /// Size of the stored PNG, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_bytes: Option<usize>,
}

/// A committed answer-space row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnswerSpace {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: NewAnswerSpace,
}

#[derive(Debug, Default)]
struct Staged {
    questions: Vec<StoredQuestion>,
    answer_spaces: Vec<StoredAnswerSpace>,
    next_id: u64,
}

/// A [`QuestionStore`] that keeps rows in memory.
///
/// Writes are staged per transaction and only become visible on commit.
/// Ids increase monotonically and are never reused, even after a rollback.
#[derive(Debug, Default, Serialize)]
pub struct InMemoryStore {
    questions: Vec<StoredQuestion>,
    answer_spaces: Vec<StoredAnswerSpace>,
    #[serde(skip)]
    next_id: u64,
    #[serde(skip)]
    staged: Option<Staged>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn questions(&self) -> &[StoredQuestion] {
        &self.questions
    }

    pub fn answer_spaces(&self) -> &[StoredAnswerSpace] {
        &self.answer_spaces
    }

    /// Children of `parent` in stored order.
    pub fn children_of(&self, parent: RecordId) -> Vec<&StoredQuestion> {
        let mut kids: Vec<_> = self
            .questions
            .iter()
            .filter(|q| q.record.parent_id == Some(parent))
            .collect();
        kids.sort_by_key(|q| q.record.order);
        kids
    }

    fn staged(&mut self) -> Result<&mut Staged, StoreError> {
        self.staged
            .as_mut()
            .ok_or_else(|| StoreError::new("no transaction in progress"))
    }
}

impl QuestionStore for InMemoryStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::new("transaction already in progress"));
        }
        self.staged = Some(Staged {
            next_id: self.next_id,
            ..Staged::default()
        });
        Ok(())
    }

    fn create_question(&mut self, record: &NewQuestion) -> Result<RecordId, StoreError> {
        let staged = self.staged()?;
        if let Some(parent) = record.parent_id {
            if !staged.questions.iter().any(|q| q.id == parent) {
                return Err(StoreError::new(format!("unknown parent id {parent}")));
            }
        }
        staged.next_id += 1;
        let id = RecordId(staged.next_id);
        staged.questions.push(StoredQuestion {
            id,
            image_bytes: record.content_image.as_ref().map(Vec::len),
            record: record.clone(),
        });
        Ok(id)
    }

    fn create_answer_space(&mut self, record: &NewAnswerSpace) -> Result<RecordId, StoreError> {
        let staged = self.staged()?;
        if !staged.questions.iter().any(|q| q.id == record.question_id) {
            return Err(StoreError::new(format!(
                "unknown question id {}",
                record.question_id
            )));
        }
        staged.next_id += 1;
        let id = RecordId(staged.next_id);
        staged.answer_spaces.push(StoredAnswerSpace {
            id,
            record: record.clone(),
        });
        Ok(id)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| StoreError::new("no transaction in progress"))?;
        self.next_id = staged.next_id;
        self.questions.extend(staged.questions);
        self.answer_spaces.extend(staged.answer_spaces);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| StoreError::new("no transaction in progress"))?;
        self.next_id = staged.next_id;
        Ok(())
    }
}
