//! Persistence tests: corrected trees committed through a store that can be
//! told to fail.

use exam_slicer::error::{PersistError, StoreError};
use exam_slicer::tree::persist::{NewAnswerSpace, NewQuestion, QuestionStore};
use exam_slicer::{
    persist, AnswerSpace, EditSession, InMemoryStore, NodeKind, PersistContext, QuestionNode,
    RecordId, SpaceType, TreeEdit, TreePath,
};
use image::{DynamicImage, RgbImage};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Wraps an [`InMemoryStore`] and fails the `fail_on`-th write (1-based,
/// questions and answer spaces counted together).
struct FlakyStore {
    inner: InMemoryStore,
    writes: usize,
    fail_on: usize,
}

impl FlakyStore {
    fn new(fail_on: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            writes: 0,
            fail_on,
        }
    }

    fn tick(&mut self) -> Result<(), StoreError> {
        self.writes += 1;
        if self.writes == self.fail_on {
            Err(StoreError::new(format!("disk full on write {}", self.writes)))
        } else {
            Ok(())
        }
    }
}

impl QuestionStore for FlakyStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.inner.begin_transaction()
    }
    fn create_question(&mut self, record: &NewQuestion) -> Result<RecordId, StoreError> {
        self.tick()?;
        self.inner.create_question(record)
    }
    fn create_answer_space(&mut self, record: &NewAnswerSpace) -> Result<RecordId, StoreError> {
        self.tick()?;
        self.inner.create_answer_space(record)
    }
    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()
    }
    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

fn ctx() -> PersistContext {
    PersistContext {
        grade: "10".into(),
        subject: "Physics".into(),
        topic: Some("Forces".into()),
        year: Some(2023),
        owner: "examiner".into(),
    }
}

fn space(y: u32) -> AnswerSpace {
    AnswerSpace {
        space_type: SpaceType::TextLine,
        x: 40,
        y,
        width: 300,
        height: 30,
        marks: 1.0,
        order: 9,
        config: Default::default(),
    }
}

/// Two questions: `1` with parts a (2 marks, one answer space) and
/// b (3 marks, two spaces); `2` standalone with 4 marks.
/// Seven writes in all.
fn sample_tree() -> Vec<QuestionNode> {
    let mut q1 = QuestionNode::container("1");
    q1.content_image = Some(DynamicImage::ImageRgb8(RgbImage::new(120, 90)));
    let mut a = QuestionNode::leaf("a", 2.0);
    a.answer_spaces.push(space(10));
    let mut b = QuestionNode::leaf("b", 3.0);
    b.answer_spaces.extend([space(50), space(90)]);
    q1.push_child(a);
    q1.push_child(b);

    let mut q2 = QuestionNode::leaf("2", 4.0);
    q2.order = 1;
    vec![q1, q2]
}

fn all_ids(nodes: &[QuestionNode]) -> Vec<Option<RecordId>> {
    nodes
        .iter()
        .flat_map(|n| std::iter::once(n.id).chain(all_ids(&n.children)))
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn every_forced_failure_leaves_nothing_behind() {
    // 4 questions + 3 answer spaces = 7 writes.
    for n in 1..=7 {
        let mut tree = sample_tree();
        let mut store = FlakyStore::new(n);

        let err = persist(&mut store, &mut tree, &ctx()).unwrap_err();
        assert!(
            matches!(
                err,
                PersistError::WriteQuestion { .. } | PersistError::WriteAnswerSpace { .. }
            ),
            "write {n}: {err}"
        );
        assert!(store.inner.questions().is_empty(), "write {n} left questions");
        assert!(store.inner.answer_spaces().is_empty(), "write {n} left spaces");
        assert!(all_ids(&tree).iter().all(Option::is_none), "write {n} set ids");
    }
}

#[test]
fn failure_names_the_node() {
    let mut tree = sample_tree();
    // Writes: 1, a, a.space0, b, b.space0 ← fails
    let mut store = FlakyStore::new(5);
    match persist(&mut store, &mut tree, &ctx()).unwrap_err() {
        PersistError::WriteAnswerSpace { path, index, .. } => {
            assert_eq!(path, TreePath(vec![0, 1]));
            assert_eq!(index, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn store_is_usable_after_a_failed_import() {
    let mut store = FlakyStore::new(3);
    let mut first = sample_tree();
    assert!(persist(&mut store, &mut first, &ctx()).is_err());

    let mut second = sample_tree();
    let ids = persist(&mut store, &mut second, &ctx()).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(store.inner.questions().len(), 4);
    assert_eq!(store.inner.answer_spaces().len(), 3);
}

#[test]
fn successful_import_links_parents_and_writes_back_ids() {
    let mut tree = sample_tree();
    let mut store = InMemoryStore::new();
    let ids = persist(&mut store, &mut tree, &ctx()).unwrap();

    assert_eq!(ids, vec![tree[0].id.unwrap(), tree[1].id.unwrap()]);
    assert!(all_ids(&tree).iter().all(Option::is_some));

    let rows = store.questions();
    assert_eq!(rows.len(), 4);
    // Pre-order: parents precede children.
    assert_eq!(rows[0].record.label, "1");
    assert_eq!(rows[0].record.parent_id, None);
    assert_eq!(rows[0].record.kind, NodeKind::Container);
    assert_eq!(rows[0].record.marks, 5.0);
    assert!(rows[0].image_bytes.unwrap_or(0) > 0);
    assert_eq!(rows[0].record.topic.as_deref(), Some("Forces"));

    let kids = store.children_of(ids[0]);
    let labels: Vec<&str> = kids.iter().map(|q| q.record.label.as_str()).collect();
    assert_eq!(labels, ["a", "b"]);
    assert!(kids.iter().all(|q| q.image_bytes.is_none()));

    let b_id = tree[0].children[1].id.unwrap();
    let b_spaces: Vec<&NewAnswerSpace> = store
        .answer_spaces()
        .iter()
        .map(|s| &s.record)
        .filter(|r| r.question_id == b_id)
        .collect();
    assert_eq!(b_spaces.len(), 2);
    assert_eq!(b_spaces[0].order, 0);
    assert_eq!(b_spaces[1].order, 1);
    assert_eq!(b_spaces[1].y, 90);
}

#[test]
fn operator_corrections_flow_into_storage() {
    let mut session = EditSession::new(sample_tree());
    session
        .apply(&TreeEdit::UpdateMarks {
            node_path: TreePath(vec![0, 0]),
            marks: 6.0,
        })
        .unwrap();
    // The container total reflects the edit straight away.
    assert_eq!(session.tree()[0].marks, 9.0);

    session
        .apply(&TreeEdit::AddChild {
            parent_path: TreePath(vec![0]),
        })
        .unwrap();
    session
        .apply(&TreeEdit::UpdateLabel {
            node_path: TreePath(vec![0, 2]),
            label: "c".into(),
        })
        .unwrap();
    session
        .apply(&TreeEdit::RemoveNode {
            parent_path: TreePath::root_list(),
            child_index: 1,
        })
        .unwrap();
    assert_eq!(session.revision(), 4);

    let mut tree = session.into_tree();
    let mut store = InMemoryStore::new();
    let ids = persist(&mut store, &mut tree, &ctx()).unwrap();

    assert_eq!(ids.len(), 1);
    let root = &store.questions()[0];
    assert_eq!(root.record.marks, 6.0 + 3.0 + 1.0);
    let labels: Vec<String> = store
        .children_of(ids[0])
        .iter()
        .map(|q| format!("{}={}", q.record.label, q.record.marks))
        .collect();
    assert_eq!(labels, ["a=6", "b=3", "c=1"]);
}

#[test]
fn missing_grade_is_rejected_before_any_write() {
    let mut tree = sample_tree();
    let mut store = FlakyStore::new(usize::MAX);
    let blank_grade = PersistContext {
        grade: "  ".into(),
        ..ctx()
    };
    let err = persist(&mut store, &mut tree, &blank_grade).unwrap_err();
    assert!(matches!(err, PersistError::MissingContext("grade")));
    assert_eq!(store.writes, 0);
}

#[test]
fn mislabelled_kinds_are_written_by_shape() {
    let mut root = QuestionNode::leaf("1", 4.0);
    root.children = vec![QuestionNode::leaf("a", 2.0), QuestionNode::leaf("b", 3.0)];
    let mut tree = vec![root];
    let mut store = InMemoryStore::new();
    persist(&mut store, &mut tree, &ctx()).unwrap();

    let rows = store.questions();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].record.kind, NodeKind::Container);
    assert_eq!(rows[0].record.marks, 5.0);
    assert!(rows[1..].iter().all(|q| q.record.kind == NodeKind::Leaf));
    assert_eq!(tree[0].kind, NodeKind::Container);
}
