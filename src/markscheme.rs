//! Parser for Cambridge-style mark-scheme tables.
//!
//! Mark schemes are typeset PDFs whose table rows read
//! `Question | Answer | Marks`. Once the text layer is flattened into lines,
//! a row starts with its question reference (`1`, `1(a)`, `1(a)(ii)`),
//! carries the answer, and may end with a mark code such as `B1`, `M1`,
//! `A1` or `C2`. Lines without a reference continue the previous row's
//! question or part.
//!
//! The parsed scheme fills in the answer text of sliced parts that have
//! none; see [`apply_markscheme`].

use crate::model::QuestionNode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Page index (0-based) the answer table usually starts on; earlier pages
/// hold the generic marking principles.
pub const DEFAULT_START_PAGE: usize = 4;

static RE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?:\(([a-z])\))?(?:\(([ivx]+)\))?(?:\s|$)").unwrap());

static RE_MARK_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([ABCM])(\d+)\s*$").unwrap());

const BOILERPLATE: [&str; 5] = ["Cambridge", "IGCSE", "PUBLISHED", "Mark Scheme", "UCLES"];

/// One answer line with its mark code, if it has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeEntry {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl SchemeEntry {
    /// Marks awarded by the code (`B2` → 2).
    pub fn marks(&self) -> u32 {
        self.code
            .as_deref()
            .and_then(|c| c[1..].parse().ok())
            .unwrap_or(0)
    }

    fn render(&self) -> Option<String> {
        match (&self.code, self.answer.is_empty()) {
            (Some(code), true) => Some(format!("[{code}]")),
            (Some(code), false) => Some(format!("{} [{code}]", self.answer)),
            (None, false) => Some(self.answer.clone()),
            (None, true) => None,
        }
    }
}

/// Everything the scheme says about one main question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionScheme {
    /// Lines filed against the question number alone.
    pub stem_answers: Vec<SchemeEntry>,
    /// Keyed `a`, `b`, `a(ii)`, ….
    pub parts: BTreeMap<String, Vec<SchemeEntry>>,
    pub total_marks: u32,
}

impl QuestionScheme {
    /// Entries for a part label, including its sub-parts: `a` collects
    /// `a`, `a(i)`, `a(ii)`, ….
    pub fn entries_for(&self, part: &str) -> Vec<&SchemeEntry> {
        let prefix = format!("{part}(");
        self.parts
            .iter()
            .filter(|(key, _)| key.as_str() == part || key.starts_with(&prefix))
            .flat_map(|(_, entries)| entries.iter())
            .collect()
    }
}

/// A parsed mark scheme, keyed by question number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Markscheme {
    pub questions: BTreeMap<u32, QuestionScheme>,
}

impl Markscheme {
    pub fn get(&self, number: u32) -> Option<&QuestionScheme> {
        self.questions.get(&number)
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Parse the text of mark-scheme pages.
pub fn parse_markscheme<S: AsRef<str>>(pages: &[S]) -> Markscheme {
    parse_markscheme_lines(pages.iter().flat_map(|p| p.as_ref().lines()))
}

/// Parse mark-scheme text one line at a time.
pub fn parse_markscheme_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Markscheme {
    let mut scheme = Markscheme::default();
    let mut current: Option<(u32, Option<String>)> = None;

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() || is_boilerplate(line) {
            continue;
        }

        let rest = if let Some(caps) = RE_REFERENCE.captures(line) {
            let Ok(number) = caps[1].parse::<u32>() else {
                continue;
            };
            let part = caps.get(2).map(|p| match caps.get(3) {
                Some(sub) => format!("{}({})", p.as_str(), sub.as_str()),
                None => p.as_str().to_string(),
            });
            current = Some((number, part));
            line[caps.get(0).map_or(0, |m| m.end())..].trim()
        } else {
            line
        };

        let Some((number, part)) = current.as_ref() else {
            continue;
        };
        let entry = split_mark_code(rest);
        let q = scheme.questions.entry(*number).or_default();
        q.total_marks += entry.marks();
        match part {
            Some(key) => q.parts.entry(key.clone()).or_default().push(entry),
            None => q.stem_answers.push(entry),
        }
    }

    debug!("Parsed mark scheme: {} questions", scheme.questions.len());
    scheme
}

fn is_boilerplate(line: &str) -> bool {
    (line.contains("Question") && line.contains("Answer"))
        || BOILERPLATE.iter().any(|b| line.contains(b))
}

fn split_mark_code(text: &str) -> SchemeEntry {
    match RE_MARK_CODE.captures(text) {
        Some(caps) => {
            let start = caps.get(0).map_or(text.len(), |m| m.start());
            SchemeEntry {
                answer: text[..start].trim().to_string(),
                code: Some(format!("{}{}", &caps[1], &caps[2])),
            }
        }
        None => SchemeEntry {
            answer: text.to_string(),
            code: None,
        },
    }
}

fn render_entries<'a>(entries: impl IntoIterator<Item = &'a SchemeEntry>) -> Option<String> {
    let lines: Vec<String> = entries.into_iter().filter_map(SchemeEntry::render).collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Fill `answer_text` of parts (and standalone questions) that have none.
///
/// Roots are matched by numeric label, parts by letter. Returns the number
/// of nodes filled.
pub fn apply_markscheme(roots: &mut [QuestionNode], scheme: &Markscheme) -> usize {
    let mut filled = 0;
    for root in roots.iter_mut() {
        let Some(q) = root
            .label
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(|n| scheme.get(n))
        else {
            continue;
        };

        if root.children.is_empty() {
            if root.answer_text.is_none() {
                let all = q.stem_answers.iter().chain(q.parts.values().flatten());
                if let Some(text) = render_entries(all) {
                    root.answer_text = Some(text);
                    filled += 1;
                }
            }
            continue;
        }

        for part in root.children.iter_mut().filter(|c| c.answer_text.is_none()) {
            if let Some(text) = render_entries(q.entries_for(part.label.trim())) {
                part.answer_text = Some(text);
                filled += 1;
            }
        }
    }
    debug!("Mark scheme filled {} answers", filled);
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "\
Cambridge IGCSE – Mark Scheme PUBLISHED
Question Answer Marks
1(a) 3.2 N B1
1(b)(i) weight = mass × g C1
W = 0.5 × 10 = 5 N A1
1(b)(ii) downwards B1
2 any two from: M1
friction at the axle B1
9.8 m/s² is the acceleration
3(a) ray bends towards normal B2
© UCLES 2023 Page 5 of 12
";

    #[test]
    fn parses_rows_and_continuations() {
        let ms = parse_markscheme(&[PAGE]);
        let q1 = ms.get(1).unwrap();
        assert_eq!(q1.total_marks, 4);
        assert_eq!(q1.parts["a"][0].answer, "3.2 N");
        assert_eq!(q1.parts["a"][0].code.as_deref(), Some("B1"));
        assert_eq!(q1.parts["b(i)"].len(), 2);
        assert_eq!(q1.parts["b(i)"][1].answer, "W = 0.5 × 10 = 5 N");

        let q2 = ms.get(2).unwrap();
        assert_eq!(q2.stem_answers.len(), 3);
        assert_eq!(q2.stem_answers[2].code, None);
        assert_eq!(q2.total_marks, 2);

        assert_eq!(ms.get(3).unwrap().total_marks, 2);
        assert_eq!(ms.questions.len(), 3);
    }

    #[test]
    fn lines_before_first_reference_are_ignored() {
        let ms = parse_markscheme_lines(["Generic marking principles", "1 yes B1"]);
        assert_eq!(ms.questions.len(), 1);
        assert_eq!(ms.get(1).unwrap().stem_answers[0].answer, "yes");
    }

    #[test]
    fn entries_for_collects_subparts() {
        let ms = parse_markscheme(&[PAGE]);
        let q1 = ms.get(1).unwrap();
        assert_eq!(q1.entries_for("b").len(), 3);
        assert_eq!(q1.entries_for("a").len(), 1);
        assert!(q1.entries_for("c").is_empty());
    }

    #[test]
    fn apply_fills_missing_answers_only() {
        let ms = parse_markscheme(&[PAGE]);
        let mut q1 = QuestionNode::container("1");
        q1.push_child(QuestionNode::leaf("a", 1.0));
        let mut b = QuestionNode::leaf("b", 3.0);
        b.answer_text = Some("from the slice".into());
        q1.push_child(b);
        let mut roots = vec![q1, QuestionNode::leaf("3", 2.0), QuestionNode::leaf("7", 1.0)];

        let filled = apply_markscheme(&mut roots, &ms);
        assert_eq!(filled, 2);
        assert_eq!(roots[0].children[0].answer_text.as_deref(), Some("3.2 N [B1]"));
        assert_eq!(roots[0].children[1].answer_text.as_deref(), Some("from the slice"));
        assert_eq!(
            roots[1].answer_text.as_deref(),
            Some("ray bends towards normal [B2]")
        );
        assert!(roots[2].answer_text.is_none());
    }
}
