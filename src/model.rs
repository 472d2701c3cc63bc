//! Core data model: bitmaps, colour bands, regions and the question tree.
//!
//! Coordinates come in two flavours. Band positions and regions are in
//! *page units* (PDF points, i.e. bitmap pixels divided by the render zoom)
//! so they stay meaningful whatever zoom a page was rasterised at. Answer
//! spaces are in *pixels* of the owning question's composite image, because
//! that is the image an operator draws them on.

use crate::pipeline::encode::data_uri;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One rasterised PDF page. Lives only for the duration of a slicing run.
#[derive(Debug, Clone)]
pub struct PageBitmap {
    /// 0-based page index within the document.
    pub page_index: usize,
    /// Pixels per page unit the page was rendered at.
    pub zoom: f32,
    pub image: DynamicImage,
}

impl PageBitmap {
    pub fn new(page_index: usize, zoom: f32, image: DynamicImage) -> Self {
        Self {
            page_index,
            zoom,
            image,
        }
    }

    /// Page width in page units.
    pub fn width_units(&self) -> f32 {
        self.image.width() as f32 / self.zoom
    }

    /// Page height in page units.
    pub fn height_units(&self) -> f32 {
        self.image.height() as f32 / self.zoom
    }
}

/// Marker colours a human draws on the paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorKind {
    /// Start of a new top-level question.
    Red,
    /// Start of a sub-part.
    Green,
    /// Start of an answer / mark-scheme region.
    Purple,
    /// Bounding rectangle fixing the content width.
    Blue,
}

impl ColorKind {
    pub(crate) fn slot(self) -> usize {
        match self {
            ColorKind::Red => 0,
            ColorKind::Green => 1,
            ColorKind::Purple => 2,
            ColorKind::Blue => 3,
        }
    }
}

impl fmt::Display for ColorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColorKind::Red => "red",
            ColorKind::Green => "green",
            ColorKind::Purple => "purple",
            ColorKind::Blue => "blue",
        };
        f.write_str(s)
    }
}

/// Horizontal extent in page units, `[x_start, x_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizontalSpan {
    pub x_start: f32,
    pub x_end: f32,
}

impl HorizontalSpan {
    pub fn width(&self) -> f32 {
        (self.x_end - self.x_start).max(0.0)
    }
}

/// A detected horizontal marker on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorBand {
    pub y_position: f32,
    pub color_kind: ColorKind,
    pub page_index: usize,
    /// Only set for Blue bands: the bounding rectangle's horizontal extent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<HorizontalSpan>,
}

impl ColorBand {
    pub fn new(page_index: usize, y_position: f32, color_kind: ColorKind) -> Self {
        Self {
            y_position,
            color_kind,
            page_index,
            span: None,
        }
    }
}

/// A rectangular slice of a page, in page units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub page_index: usize,
    pub y_start: f32,
    pub y_end: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_bounds: Option<HorizontalSpan>,
}

impl Region {
    pub fn height(&self) -> f32 {
        (self.y_end - self.y_start).max(0.0)
    }
}

/// Whether a node aggregates its children or carries its own marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Container,
    Leaf,
}

/// Identity handed out by the storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A question, part or sub-part.
///
/// Parents own their children; there are no back-pointers. Nodes are
/// addressed by [`crate::tree::edit::TreePath`] while in memory and receive
/// an [`RecordId`] once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub label: String,
    #[serde(default)]
    pub marks: f64,
    pub kind: NodeKind,
    #[serde(default, with = "data_uri", skip_serializing_if = "Option::is_none")]
    pub content_image: Option<DynamicImage>,
    #[serde(default)]
    pub content_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
    #[serde(default, with = "data_uri", skip_serializing_if = "Option::is_none")]
    pub answer_image: Option<DynamicImage>,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub children: Vec<QuestionNode>,
    #[serde(default)]
    pub answer_spaces: Vec<AnswerSpace>,
}

impl QuestionNode {
    /// An empty leaf with the given label.
    pub fn leaf(label: impl Into<String>, marks: f64) -> Self {
        Self {
            id: None,
            label: label.into(),
            marks,
            kind: NodeKind::Leaf,
            content_image: None,
            content_text: String::new(),
            answer_text: None,
            answer_image: None,
            order: 0,
            children: Vec::new(),
            answer_spaces: Vec::new(),
        }
    }

    /// An empty container with the given label.
    pub fn container(label: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Container,
            ..Self::leaf(label, 0.0)
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Append a child, setting its `order` and promoting `self` to a container.
    pub fn push_child(&mut self, mut child: QuestionNode) {
        child.order = self.children.len();
        self.children.push(child);
        self.kind = NodeKind::Container;
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(QuestionNode::subtree_len).sum::<usize>()
    }
}

/// Kinds of answer capture area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    #[default]
    TextLine,
    CalcSpace,
    TableCell,
    Canvas,
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpaceType::TextLine => "text_line",
            SpaceType::CalcSpace => "calc_space",
            SpaceType::TableCell => "table_cell",
            SpaceType::Canvas => "canvas",
        };
        f.write_str(s)
    }
}

/// A sub-region of a question image where a student's response is captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSpace {
    #[serde(default, alias = "type")]
    pub space_type: SpaceType,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_space_marks")]
    pub marks: f64,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_space_marks() -> f64 {
    1.0
}
