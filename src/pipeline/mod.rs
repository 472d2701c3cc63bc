//! Pipeline stages for slicing a marked-up exam paper.
//!
//! Each submodule implements one step and can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ detect ──▶ region ──▶ ocr ──▶ textclean ──▶ tree::builder
//! (path)    (pdfium)   (bands)    (crops)   (text)   (cleanup)      │
//!                                                                   ▼
//!                                               stitch (per-question composites)
//! ```
//!
//! 1. [`input`]     validate a local PDF, or spill in-memory bytes to a temp file
//! 2. [`render`]    rasterise selected pages in `spawn_blocking`
//! 3. [`detect`]    find red / green / purple rules and the blue rectangle
//! 4. [`region`]    plan band intervals across pages and crop them
//! 5. [`ocr`]       recognise region text with a bounded timeout, fail-soft
//! 6. [`textclean`] deterministic cleanup of OCR output
//! 7. [`stitch`]    join a question's fragments into one composite image
//!
//! [`encode`] and [`composite`] are used after slicing: for tree JSON, for
//! persistence and for grading review.

pub mod composite;
pub mod detect;
pub mod encode;
pub mod input;
pub mod ocr;
pub mod region;
pub mod render;
pub mod stitch;
pub mod textclean;
