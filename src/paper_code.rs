//! Cambridge paper codes such as `0625_s23_qp_31`.
//!
//! The file stem of a question paper names its syllabus, exam series,
//! document kind and component. The CLI uses it to default the subject and
//! year of the persistence context.

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Exam series letter: `s` (May/June), `w` (Oct/Nov) or `m` (Feb/March).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Summer,
    Winter,
    March,
}

impl Season {
    fn from_letter(c: char) -> Option<Self> {
        match c {
            's' => Some(Self::Summer),
            'w' => Some(Self::Winter),
            'm' => Some(Self::March),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Mcq,
    Theory,
    Practical,
    AlternativeToPractical,
}

impl Component {
    /// Component family of a two-digit paper number (`31` → Theory).
    pub fn from_paper_number(n: u8) -> Option<Self> {
        match (n / 10, n % 10) {
            (1 | 2, 1..=3) => Some(Self::Mcq),
            (3 | 4, 1..=3) => Some(Self::Theory),
            (5, 1..=3) => Some(Self::Practical),
            (6, 1..=3) => Some(Self::AlternativeToPractical),
            _ => None,
        }
    }

    /// Multiple-choice papers have no written parts to slice.
    pub fn is_written(self) -> bool {
        !matches!(self, Self::Mcq)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mcq => "MCQ",
            Self::Theory => "Theory",
            Self::Practical => "Practical",
            Self::AlternativeToPractical => "Alternative to Practical",
        })
    }
}

/// Subject name for a four-digit syllabus code.
pub fn subject_name(code: &str) -> Option<&'static str> {
    match code {
        "0625" => Some("Physics"),
        "0620" => Some("Chemistry"),
        "0610" => Some("Biology"),
        _ => None,
    }
}

/// What a paper code says. Every field is optional because codes in the
/// wild are often truncated or renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperCode {
    pub raw: String,
    pub syllabus: Option<String>,
    pub subject: Option<&'static str>,
    pub season: Option<Season>,
    pub year: Option<i32>,
    pub component: Option<Component>,
    pub paper_number: Option<u8>,
}

impl PaperCode {
    pub fn parse(code: &str) -> Self {
        let raw = code.trim();
        let stem = raw
            .strip_suffix(".pdf")
            .or_else(|| raw.strip_suffix(".PDF"))
            .unwrap_or(raw);
        let fields: Vec<&str> = stem.split('_').collect();

        let syllabus = stem
            .get(..4)
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_string);
        let subject = syllabus.as_deref().and_then(subject_name);

        let (season, year) = fields
            .iter()
            .find_map(|f| {
                let mut chars = f.chars();
                let season = Season::from_letter(chars.next()?)?;
                let digits = chars.as_str();
                if digits.len() != 2 {
                    return None;
                }
                let yy: i32 = digits.parse().ok()?;
                Some((Some(season), Some(2000 + yy)))
            })
            .unwrap_or((None, None));

        let paper_number = fields
            .iter()
            .rev()
            .find(|f| f.len() == 2 && f.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|f| f.parse::<u8>().ok());
        let component = paper_number.and_then(Component::from_paper_number);

        Self {
            raw: raw.to_string(),
            syllabus,
            subject,
            season,
            year,
            component,
            paper_number,
        }
    }

    /// Parse the file stem of `path`.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(Self::parse)
    }
}
