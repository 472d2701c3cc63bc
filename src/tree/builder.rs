//! The colour-driven state machine that turns band intervals into a
//! question tree.
//!
//! Intervals arrive in document order, each with its cropped image and
//! recognised text. The colour of an interval decides what it opens:
//!
//! | colour | opens | needs |
//! |--------|-------|-------|
//! | red    | a new root question | nothing; finalises the previous root |
//! | green  | a part of the open root | an open root |
//! | purple | the answer of the last part | a part under the open root |
//!
//! A continuation interval (the top of a page, carrying the previous page's
//! colour) extends whatever the previous interval opened. Intervals that
//! cannot be placed are dropped with a [`Diagnostic::DetectionAmbiguity`],
//! and so are their continuations.
//!
//! Finalising a root stitches every fragment collected under it into its
//! composite image and resolves a root with no parts into a standalone leaf.

use crate::error::Diagnostic;
use crate::model::{ColorKind, NodeKind, QuestionNode};
use crate::pipeline::region::{Interval, IntervalRole, RegionContent};
use crate::pipeline::stitch::stitch_regions;
use crate::tree::marks::aggregate_marks;
use crate::tree::parse;
use image::DynamicImage;
use tracing::{debug, warn};

/// Roots built from a document, plus what could not be placed.
#[derive(Debug, Clone, Default)]
pub struct BuiltTree {
    pub questions: Vec<QuestionNode>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Which part of the current part a continuation extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartFocus {
    Content,
    Answer,
}

#[derive(Debug, Default)]
enum BuilderState {
    #[default]
    Idle,
    /// A root is open and the last interval was its stem.
    InQuestion(OpenQuestion),
    /// A root is open and the last interval belonged to its last part.
    InPart(OpenQuestion, PartFocus),
}

#[derive(Debug)]
struct OpenQuestion {
    label: String,
    stem_text: String,
    /// Every image collected under this root, in document order.
    fragments: Vec<DynamicImage>,
    parts: Vec<OpenPart>,
}

#[derive(Debug)]
struct OpenPart {
    label: String,
    marks: Option<f64>,
    text: String,
    content: Vec<DynamicImage>,
    answer_text: Option<String>,
    answer: Vec<DynamicImage>,
}

/// Incremental builder; feed intervals in document order, then [`finish`].
///
/// [`finish`]: TreeBuilder::finish
#[derive(Debug)]
pub struct TreeBuilder {
    state: BuilderState,
    questions: Vec<QuestionNode>,
    diagnostics: Vec<Diagnostic>,
    red_count: usize,
    default_part_marks: f64,
    /// Set when the last opening interval was dropped, so its
    /// continuations are dropped too.
    discarding: bool,
}

impl TreeBuilder {
    pub fn new(default_part_marks: f64) -> Self {
        Self {
            state: BuilderState::Idle,
            questions: Vec::new(),
            diagnostics: Vec::new(),
            red_count: 0,
            default_part_marks,
            discarding: false,
        }
    }

    /// Consume one interval and its content.
    pub fn feed(&mut self, interval: &Interval, content: RegionContent) {
        let state = std::mem::take(&mut self.state);
        self.state = match interval.role {
            IntervalRole::Opening => self.open(state, interval, content),
            IntervalRole::Continuation => self.extend(state, interval, content),
        };
    }

    /// Finalise any open root and return the tree with containers' marks
    /// aggregated.
    pub fn finish(mut self) -> BuiltTree {
        if let Some(q) = take_question(std::mem::take(&mut self.state)) {
            self.finalize(q);
        }
        aggregate_marks(&mut self.questions);
        debug!(
            "Built {} questions ({} diagnostics)",
            self.questions.len(),
            self.diagnostics.len()
        );
        BuiltTree {
            questions: self.questions,
            diagnostics: self.diagnostics,
        }
    }

    fn open(
        &mut self,
        state: BuilderState,
        interval: &Interval,
        content: RegionContent,
    ) -> BuilderState {
        self.discarding = false;
        match (interval.kind, state) {
            (ColorKind::Red, state) => {
                if let Some(previous) = take_question(state) {
                    self.finalize(previous);
                }
                self.red_count += 1;
                let label = parse::question_number(&content.text)
                    .unwrap_or_else(|| self.red_count.to_string());
                debug!("Opened question {}", label);
                BuilderState::InQuestion(OpenQuestion {
                    label,
                    stem_text: content.text,
                    fragments: vec![content.image],
                    parts: Vec::new(),
                })
            }

            (ColorKind::Green, BuilderState::InQuestion(mut q))
            | (ColorKind::Green, BuilderState::InPart(mut q, _)) => {
                let label = parse::part_letter(&content.text)
                    .unwrap_or_else(|| parse::sequential_letter(q.parts.len()));
                debug!("Question {}: opened part {}", q.label, label);
                q.fragments.push(content.image.clone());
                q.parts.push(OpenPart {
                    label,
                    marks: parse::marks(&content.text),
                    text: content.text,
                    content: vec![content.image],
                    answer_text: None,
                    answer: Vec::new(),
                });
                BuilderState::InPart(q, PartFocus::Content)
            }

            (ColorKind::Purple, BuilderState::InPart(mut q, _)) => {
                q.fragments.push(content.image.clone());
                if let Some(part) = q.parts.last_mut() {
                    append_text_opt(&mut part.answer_text, content.text);
                    part.answer.push(content.image);
                }
                BuilderState::InPart(q, PartFocus::Answer)
            }

            (ColorKind::Green, state) => {
                self.drop_interval(interval, "green band with no open question");
                state
            }
            (ColorKind::Purple, state) => {
                self.drop_interval(interval, "purple band with no part to attach to");
                state
            }
            (ColorKind::Blue, state) => state,
        }
    }

    fn extend(
        &mut self,
        state: BuilderState,
        interval: &Interval,
        content: RegionContent,
    ) -> BuilderState {
        if self.discarding {
            debug!(
                "Page {}: dropping continuation of a discarded interval",
                interval.region.page_index + 1
            );
            return state;
        }
        match state {
            BuilderState::Idle => {
                self.drop_interval(interval, "continuation with no open question");
                BuilderState::Idle
            }
            BuilderState::InQuestion(mut q) => {
                append_text(&mut q.stem_text, content.text);
                q.fragments.push(content.image);
                BuilderState::InQuestion(q)
            }
            BuilderState::InPart(mut q, focus) => {
                q.fragments.push(content.image.clone());
                if let Some(part) = q.parts.last_mut() {
                    match focus {
                        PartFocus::Content => {
                            append_text(&mut part.text, content.text);
                            part.content.push(content.image);
                            // The marks bracket often sits at the end of a
                            // part that ran over the page break.
                            if part.marks.is_none() {
                                part.marks = parse::marks(&part.text);
                            }
                        }
                        PartFocus::Answer => {
                            append_text_opt(&mut part.answer_text, content.text);
                            part.answer.push(content.image);
                        }
                    }
                }
                BuilderState::InPart(q, focus)
            }
        }
    }

    fn drop_interval(&mut self, interval: &Interval, detail: &str) {
        warn!(
            "Page {} @ y={:.1}: {}",
            interval.region.page_index + 1,
            interval.region.y_start,
            detail
        );
        self.diagnostics.push(Diagnostic::DetectionAmbiguity {
            page: interval.region.page_index + 1,
            y: interval.region.y_start,
            detail: detail.to_string(),
        });
        self.discarding = true;
    }

    fn finalize(&mut self, q: OpenQuestion) {
        let context = format!("question {}", q.label);
        let mut root = if q.parts.is_empty() {
            let marks = parse::marks(&q.stem_text).unwrap_or(self.default_part_marks);
            QuestionNode::leaf(q.label, marks)
        } else {
            QuestionNode::container(q.label)
        };
        root.content_text = q.stem_text;
        root.content_image = self.stitch(&q.fragments, &context);

        for part in q.parts {
            let part_context = format!("{context}({})", part.label);
            let mut leaf = QuestionNode::leaf(
                part.label,
                part.marks.unwrap_or(self.default_part_marks),
            );
            leaf.content_text = part.text;
            leaf.content_image = self.stitch(&part.content, &part_context);
            leaf.answer_text = part.answer_text;
            leaf.answer_image = self.stitch(&part.answer, &format!("{part_context} answer"));
            root.push_child(leaf);
        }

        debug!(
            "Finalised question {} ({} parts, {})",
            root.label,
            root.children.len(),
            if root.kind == NodeKind::Leaf { "standalone" } else { "container" }
        );
        root.order = self.questions.len();
        self.questions.push(root);
    }

    fn stitch(&mut self, fragments: &[DynamicImage], context: &str) -> Option<DynamicImage> {
        if fragments.is_empty() {
            return None;
        }
        match stitch_regions(fragments) {
            Ok(stitched) => {
                self.diagnostics.extend(stitched.diagnostics(context));
                Some(stitched.image)
            }
            Err(e) => {
                warn!("{}: {}", context, e);
                None
            }
        }
    }
}

fn take_question(state: BuilderState) -> Option<OpenQuestion> {
    match state {
        BuilderState::Idle => None,
        BuilderState::InQuestion(q) | BuilderState::InPart(q, _) => Some(q),
    }
}

fn append_text(target: &mut String, more: String) {
    if more.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(&more);
}

fn append_text_opt(target: &mut Option<String>, more: String) {
    match target {
        Some(existing) => append_text(existing, more),
        None => *target = Some(more),
    }
}

/// Run the builder over a full interval list.
///
/// `contents[i]` is the content of `intervals[i]`.
pub fn build_tree(
    intervals: &[Interval],
    contents: Vec<RegionContent>,
    default_part_marks: f64,
) -> BuiltTree {
    let mut builder = TreeBuilder::new(default_part_marks);
    for (interval, content) in intervals.iter().zip(contents) {
        builder.feed(interval, content);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Region;
    use image::GenericImageView;

    fn interval(kind: ColorKind, role: IntervalRole, page: usize, y0: f32, y1: f32) -> Interval {
        Interval {
            kind,
            role,
            region: Region {
                page_index: page,
                y_start: y0,
                y_end: y1,
                x_bounds: None,
            },
        }
    }

    fn content(text: &str, height: u32) -> RegionContent {
        RegionContent {
            image: DynamicImage::new_rgb8(50, height),
            text: text.to_string(),
        }
    }

    fn run(steps: Vec<(Interval, RegionContent)>) -> BuiltTree {
        let (intervals, contents): (Vec<_>, Vec<_>) = steps.into_iter().unzip();
        build_tree(&intervals, contents, 1.0)
    }

    use ColorKind::*;
    use IntervalRole::*;

    #[test]
    fn red_green_purple_red() {
        let tree = run(vec![
            (interval(Red, Opening, 0, 10.0, 60.0), content("1 Forces", 50)),
            (interval(Green, Opening, 0, 60.0, 120.0), content("(a) Define force. [3]", 60)),
            (interval(Purple, Opening, 0, 120.0, 200.0), content("push or pull", 80)),
            (interval(Red, Opening, 0, 200.0, 300.0), content("2 Energy [4]", 100)),
        ]);
        assert!(tree.diagnostics.is_empty(), "{:?}", tree.diagnostics);
        assert_eq!(tree.questions.len(), 2);

        let q1 = &tree.questions[0];
        assert_eq!(q1.label, "1");
        assert_eq!(q1.kind, NodeKind::Container);
        assert_eq!(q1.marks, 3.0);
        assert_eq!(q1.content_image.as_ref().unwrap().dimensions(), (50, 190));
        let a = &q1.children[0];
        assert_eq!((a.label.as_str(), a.marks, a.order), ("a", 3.0, 0));
        assert_eq!(a.answer_text.as_deref(), Some("push or pull"));
        assert_eq!(a.answer_image.as_ref().unwrap().height(), 80);

        let q2 = &tree.questions[1];
        assert_eq!(q2.kind, NodeKind::Leaf);
        assert_eq!(q2.marks, 4.0);
        assert_eq!(q2.order, 1);
    }

    #[test]
    fn labels_fall_back_to_counters() {
        let tree = run(vec![
            (interval(Red, Opening, 0, 0.0, 50.0), content("", 10)),
            (interval(Green, Opening, 0, 50.0, 90.0), content("", 10)),
            (interval(Green, Opening, 0, 90.0, 130.0), content("", 10)),
            (interval(Red, Opening, 0, 130.0, 200.0), content("", 10)),
        ]);
        let labels: Vec<_> = tree.questions[0].children.iter().map(|c| c.label.clone()).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(tree.questions[0].marks, 2.0);
        assert_eq!(tree.questions[1].label, "2");
        assert_eq!(tree.questions[1].marks, 1.0);
    }

    #[test]
    fn green_without_question_is_dropped_with_its_continuation() {
        let tree = run(vec![
            (interval(Green, Opening, 0, 700.0, 800.0), content("(a) orphan [2]", 10)),
            (interval(Green, Continuation, 1, 0.0, 100.0), content("more orphan", 10)),
            (interval(Red, Opening, 1, 100.0, 300.0), content("5", 10)),
        ]);
        assert_eq!(tree.diagnostics.len(), 1);
        assert!(matches!(
            tree.diagnostics[0],
            Diagnostic::DetectionAmbiguity { page: 1, .. }
        ));
        assert_eq!(tree.questions.len(), 1);
        assert_eq!(tree.questions[0].label, "5");
        assert!(!tree.questions[0].content_text.contains("orphan"));
    }

    #[test]
    fn purple_without_part_is_dropped() {
        let tree = run(vec![
            (interval(Red, Opening, 0, 0.0, 100.0), content("1", 10)),
            (interval(Purple, Opening, 0, 100.0, 200.0), content("answer", 10)),
        ]);
        assert_eq!(tree.diagnostics.len(), 1);
        assert_eq!(tree.questions[0].kind, NodeKind::Leaf);
        assert_eq!(tree.questions[0].content_image.as_ref().unwrap().height(), 10);
    }

    #[test]
    fn continuations_extend_across_pages() {
        let tree = run(vec![
            (interval(Red, Opening, 0, 20.0, 100.0), content("3 Waves", 80)),
            (interval(Green, Opening, 0, 100.0, 400.0), content("(a) Describe", 300)),
            (interval(Green, Continuation, 1, 0.0, 120.0), content("the motion. [5]", 120)),
            (interval(Purple, Opening, 1, 120.0, 200.0), content("transverse", 80)),
            (interval(Purple, Continuation, 2, 0.0, 60.0), content("oscillation", 60)),
        ]);
        let q = &tree.questions[0];
        let a = &q.children[0];
        assert_eq!(a.content_text, "(a) Describe\nthe motion. [5]");
        assert_eq!(a.marks, 5.0);
        assert_eq!(a.content_image.as_ref().unwrap().height(), 420);
        assert_eq!(a.answer_text.as_deref(), Some("transverse\noscillation"));
        assert_eq!(q.content_image.as_ref().unwrap().height(), 80 + 300 + 120 + 80 + 60);
        assert_eq!(q.marks, 5.0);
    }

    #[test]
    fn stem_continuation_before_first_part() {
        let tree = run(vec![
            (interval(Red, Opening, 0, 600.0, 800.0), content("4 A table shows", 10)),
            (interval(Red, Continuation, 1, 0.0, 200.0), content("the results.", 10)),
            (interval(Green, Opening, 1, 200.0, 300.0), content("(a) Plot [2]", 10)),
        ]);
        assert_eq!(tree.questions[0].content_text, "4 A table shows\nthe results.");
        assert_eq!(tree.questions[0].children.len(), 1);
    }

    #[test]
    fn no_intervals_no_questions() {
        let tree = run(vec![]);
        assert!(tree.questions.is_empty());
        assert!(tree.diagnostics.is_empty());
    }

    #[test]
    fn mismatched_widths_are_reported() {
        let tree = run(vec![
            (interval(Red, Opening, 0, 0.0, 100.0), content("1", 10)),
            (
                interval(Red, Continuation, 1, 0.0, 100.0),
                RegionContent {
                    image: DynamicImage::new_rgb8(40, 10),
                    text: String::new(),
                },
            ),
        ]);
        assert_eq!(tree.questions[0].content_image.as_ref().unwrap().width(), 50);
        assert!(tree
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::GeometryMismatch { .. })));
    }
}
