//! Label and marks patterns applied to recognised region text.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_QUESTION_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)").unwrap());

static RE_PART_IN_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([a-z])\)").unwrap());

// "a)", "a.", "(a " at the start of a strip whose brackets OCR mangled.
static RE_PART_LEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(?([a-z])\)?[.\s)]").unwrap());

static RE_MARKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[(\d+)\]|\((\d+)\s*marks?\)").unwrap());

/// Leading question number of a red strip, e.g. `"3 (a) Define…"` → `"3"`.
pub fn question_number(text: &str) -> Option<String> {
    RE_QUESTION_NUMBER
        .captures(text.trim_start())
        .map(|c| c[1].trim_start_matches('0').to_string())
        .map(|n| if n.is_empty() { "0".to_string() } else { n })
}

/// Part letter of a green strip: `(b)` anywhere, else a bare leading `b)`.
pub fn part_letter(text: &str) -> Option<String> {
    let text = text.trim_start();
    RE_PART_IN_PARENS
        .captures(text)
        .or_else(|| RE_PART_LEADING.captures(text))
        .map(|c| c[1].to_string())
}

/// First `[n]` or `(n marks)` in the text.
pub fn marks(text: &str) -> Option<f64> {
    let caps = RE_MARKS.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(f64::from)
}

/// The letter used for the `n`-th part (0-based) when none was read:
/// `a`…`z`, then `aa`, `ab`, ….
pub fn sequential_letter(n: usize) -> String {
    let mut n = n;
    let mut out = Vec::new();
    loop {
        out.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
