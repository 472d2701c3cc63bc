//! Text recognition for region crops.
//!
//! OCR sits behind the [`OcrEngine`] trait. With the `tesseract` feature
//! the crate links Tesseract in-process through `leptess`; without it
//! regions go unread unless the caller plugs in their own recogniser.
//!
//! ## Fail-soft contract
//!
//! Recognition never stops a slicing run. [`recognize_with_timeout`] bounds
//! every call, and the region extractor turns any [`OcrError`] into empty
//! text plus a [`crate::error::Diagnostic::RecognitionFailure`].

use crate::error::OcrError;
#[cfg(feature = "tesseract")]
use crate::pipeline::encode::encode_png;
use image::DynamicImage;
#[cfg(feature = "tesseract")]
use leptess::{LepTess, Variable};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "tesseract")]
use tracing::{debug, info};
use tracing::warn;

/// Tesseract language used when no engine is configured.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// A text recogniser for a single image.
///
/// Called from blocking threads, possibly several at once.
pub trait OcrEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// Recognises nothing. Used when no engine is available; trees are still
/// built, with default labels and marks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn name(&self) -> &str {
        "none"
    }

    fn recognize_text(&self, _image: &DynamicImage) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// Tesseract through its C API, via `leptess`.
///
/// A `LepTess` handle is not `Send`, so each call creates its own on the
/// blocking thread that runs it.
#[cfg(feature = "tesseract")]
#[derive(Debug, Clone)]
pub struct Tesseract {
    /// Language code(s), e.g. `eng` or `eng+fra`.
    pub language: String,
    /// Page segmentation mode. 6 ("single uniform block") suits question strips.
    pub psm: u8,
}

#[cfg(feature = "tesseract")]
impl Tesseract {
    /// Load Tesseract once to check that `language` data is installed.
    pub fn new(language: impl Into<String>) -> Result<Self, OcrError> {
        let engine = Self {
            language: language.into(),
            psm: 6,
        };
        engine.load()?;
        debug!("Tesseract ready for '{}'", engine.language);
        Ok(engine)
    }

    fn load(&self) -> Result<LepTess, OcrError> {
        LepTess::new(None, &self.language).map_err(|e| {
            OcrError::Unavailable(format!("tesseract ({}): {}", self.language, e))
        })
    }
}

#[cfg(feature = "tesseract")]
impl OcrEngine for Tesseract {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let mut lt = self.load()?;
        lt.set_variable(Variable::TesseditPagesegMode, &self.psm.to_string())
            .map_err(|e| OcrError::Recognition(format!("cannot set page segmentation mode: {}", e)))?;

        let png = encode_png(image).map_err(|e| OcrError::Encode(e.to_string()))?;
        lt.set_image_from_mem(&png)
            .map_err(|e| OcrError::Recognition(format!("region rejected: {}", e)))?;
        lt.get_utf8_text()
            .map_err(|e| OcrError::Recognition(e.to_string()))
    }
}

/// Pick the engine for a run: the configured one, else Tesseract when the
/// crate is built with it and English data loads, else [`NoOcr`].
pub fn resolve_engine(configured: Option<Arc<dyn OcrEngine>>) -> Arc<dyn OcrEngine> {
    match configured {
        Some(engine) => engine,
        None => default_engine(),
    }
}

#[cfg(feature = "tesseract")]
fn default_engine() -> Arc<dyn OcrEngine> {
    match Tesseract::new(DEFAULT_LANGUAGE) {
        Ok(t) => {
            info!("OCR: using tesseract ({})", t.language);
            Arc::new(t)
        }
        Err(e) => {
            warn!("OCR: {}; labels and marks fall back to defaults", e);
            Arc::new(NoOcr)
        }
    }
}

#[cfg(not(feature = "tesseract"))]
fn default_engine() -> Arc<dyn OcrEngine> {
    warn!("OCR: built without the `tesseract` feature; labels and marks fall back to defaults");
    Arc::new(NoOcr)
}

/// Run `engine` on a blocking thread, giving up after `timeout`.
///
/// A call that times out keeps its thread until the engine returns.
pub async fn recognize_with_timeout(
    engine: Arc<dyn OcrEngine>,
    image: DynamicImage,
    timeout: Duration,
) -> Result<String, OcrError> {
    let task = tokio::task::spawn_blocking(move || engine.recognize_text(&image));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(OcrError::Panicked(join.to_string())),
        Err(_) => Err(OcrError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}
