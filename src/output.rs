//! Result types returned by the slicing entry points.

use crate::error::Diagnostic;
use crate::model::QuestionNode;
use serde::{Deserialize, Serialize};

/// Everything a slicing run produces.
///
/// `questions` is always present, possibly empty; anything that went wrong
/// along the way is listed in `diagnostics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceOutput {
    pub questions: Vec<QuestionNode>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub stats: SliceStats,
}

impl SliceOutput {
    /// Total marks over all root questions.
    pub fn total_marks(&self) -> f64 {
        self.questions.iter().map(|q| q.marks).sum()
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceStats {
    pub total_pages: usize,
    pub pages_scanned: usize,
    pub bands_detected: usize,
    pub regions_extracted: usize,
    pub ocr_failures: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
}

/// Page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Metadata extracted from the PDF document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub page_sizes: Vec<PageSize>,
    pub pdf_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionNode;

    #[test]
    fn total_marks_sums_roots() {
        let out = SliceOutput {
            questions: vec![QuestionNode::leaf("1", 3.0), QuestionNode::leaf("2", 4.5)],
            diagnostics: vec![],
            stats: SliceStats::default(),
        };
        assert_eq!(out.total_marks(), 7.5);
    }

    #[test]
    fn output_deserialises_without_optional_sections() {
        let json = r#"{"questions":[{"label":"1","kind":"leaf","marks":2}]}"#;
        let out: SliceOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out.questions[0].marks, 2.0);
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.stats.pages_scanned, 0);
    }
}
