//! Deterministic cleanup of OCR output before it is parsed.
//!
//! Tesseract output carries artefacts that get in the way of the label and
//! marks patterns: CRLF endings, a trailing form feed per page, trailing
//! blanks, zero-width characters from the PDF text layer, and long runs of
//! empty lines where the answer rules were. Each rule is a pure
//! `&str → String` pass.
//!
//! Rules (applied in order):
//! 1. Normalise line endings (CRLF / CR → LF)
//! 2. Drop form feeds
//! 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 4. Trim trailing whitespace per line
//! 5. Collapse 3+ consecutive blank lines down to 1
//! 6. Trim the whole text

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to raw OCR text.
pub fn clean_ocr_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = s.replace('\u{000C}', "");
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}
