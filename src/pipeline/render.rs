//! PDF rasterisation through pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and does CPU-heavy work. All pdfium calls run inside
//! `tokio::task::spawn_blocking` so the async workers never stall.
//!
//! ## Why a `PageSource` trait?
//!
//! Everything downstream of rasterisation only needs "how many pages" and
//! "give me page *n* at zoom *z*". Putting that behind a trait lets the
//! detector, the interval planner and the tree builder be exercised with
//! synthetic bitmaps, with no pdfium library present.

use crate::config::PageSelection;
use crate::error::{Diagnostic, SliceError};
use crate::model::PageBitmap;
use crate::output::{DocumentMetadata, PageSize};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Anything that can hand out rasterised pages.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Page width and height in page units (points).
    fn page_size(&self, index: usize) -> Result<PageSize, SliceError>;

    fn render_page(&self, index: usize, zoom: f32) -> Result<PageBitmap, SliceError>;
}

/// Pages rendered for one slicing run.
#[derive(Debug, Default)]
pub struct Rasterised {
    pub total_pages: usize,
    pub pages: Vec<PageBitmap>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Render `indices` from `source`, skipping pages that fail.
///
/// A page that cannot be rendered is reported as a
/// [`Diagnostic::RenderFailed`] and the run continues without it.
pub fn render_selected(source: &dyn PageSource, indices: &[usize], zoom: f32) -> Rasterised {
    let total_pages = source.page_count();
    let mut out = Rasterised {
        total_pages,
        pages: Vec::with_capacity(indices.len()),
        diagnostics: Vec::new(),
    };

    for &idx in indices {
        if idx >= total_pages {
            warn!("Skipping page {} (out of range, total={})", idx + 1, total_pages);
            continue;
        }
        match source.render_page(idx, zoom) {
            Ok(bitmap) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    bitmap.image.width(),
                    bitmap.image.height()
                );
                out.pages.push(bitmap);
            }
            Err(e) => {
                warn!("Page {}: {}", idx + 1, e);
                out.diagnostics.push(Diagnostic::RenderFailed {
                    page: idx + 1,
                    detail: e.to_string(),
                });
            }
        }
    }
    out
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Bind to a pdfium library.
///
/// Resolution order: `explicit` path, then `PDFIUM_LIB_PATH`, then the
/// system library. Either path may name the library file or the directory
/// holding it.
pub fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, SliceError> {
    let configured = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match configured {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| SliceError::PdfiumBindingFailed(e.to_string()))?;

    Ok(Pdfium::new(bindings))
}

/// Open a document, translating pdfium's errors into [`SliceError`].
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, SliceError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                SliceError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                SliceError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            SliceError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// A pdfium document seen as a [`PageSource`].
pub struct PdfiumPages<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumPages<'a> {
    pub fn new(document: PdfDocument<'a>) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &PdfDocument<'a> {
        &self.document
    }

    fn page(&self, index: usize) -> Result<PdfPage<'a>, SliceError> {
        self.document
            .pages()
            .get(index as u16)
            .map_err(|e| SliceError::RasterisationFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            })
    }
}

impl PageSource for PdfiumPages<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, index: usize) -> Result<PageSize, SliceError> {
        let page = self.page(index)?;
        Ok(PageSize {
            width: page.width().value,
            height: page.height().value,
        })
    }

    fn render_page(&self, index: usize, zoom: f32) -> Result<PageBitmap, SliceError> {
        let page = self.page(index)?;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(zoom);
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            SliceError::RasterisationFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            }
        })?;
        Ok(PageBitmap::new(index, zoom, bitmap.as_image()))
    }
}

/// What [`rasterize_document`] needs to know.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub pdf_path: PathBuf,
    pub password: Option<String>,
    pub pdfium_library: Option<PathBuf>,
    pub zoom: f32,
    pub pages: PageSelection,
}

/// Rasterise the selected pages of a PDF.
pub async fn rasterize_document(req: RenderRequest) -> Result<Rasterised, SliceError> {
    tokio::task::spawn_blocking(move || rasterize_blocking(&req))
        .await
        .map_err(|e| SliceError::Internal(format!("Render task panicked: {}", e)))?
}

fn rasterize_blocking(req: &RenderRequest) -> Result<Rasterised, SliceError> {
    let pdfium = bind_pdfium(req.pdfium_library.as_deref())?;
    let document = open_document(&pdfium, &req.pdf_path, req.password.as_deref())?;
    let source = PdfiumPages::new(document);

    let total_pages = source.page_count();
    info!("PDF loaded: {} pages", total_pages);

    let indices = req.pages.to_indices(total_pages);
    if indices.is_empty() && total_pages > 0 {
        return Err(SliceError::PageOutOfRange {
            page: first_requested(&req.pages),
            total: total_pages,
        });
    }

    Ok(render_selected(&source, &indices, req.zoom))
}

fn first_requested(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 1,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(0),
    }
}

/// Extract document metadata without rendering pages.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
    pdfium_library: Option<&Path>,
) -> Result<DocumentMetadata, SliceError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);
    let lib = pdfium_library.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || {
        extract_metadata_blocking(&path, pwd.as_deref(), lib.as_deref())
    })
    .await
    .map_err(|e| SliceError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    pdfium_library: Option<&Path>,
) -> Result<DocumentMetadata, SliceError> {
    let pdfium = bind_pdfium(pdfium_library)?;
    let source = PdfiumPages::new(open_document(&pdfium, pdf_path, password)?);
    let document = source.document();
    let metadata = document.metadata();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let page_count = source.page_count();
    let page_sizes = (0..page_count)
        .map(|i| source.page_size(i))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count,
        page_sizes,
        pdf_version: format!("{:?}", document.version()),
    })
}

/// Extract the text layer of every page from `start_page` (0-based) on.
///
/// Used for mark schemes, which are typeset rather than scanned.
pub async fn extract_page_text(
    pdf_path: &Path,
    password: Option<&str>,
    pdfium_library: Option<&Path>,
    start_page: usize,
) -> Result<Vec<String>, SliceError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);
    let lib = pdfium_library.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || -> Result<Vec<String>, SliceError> {
        let pdfium = bind_pdfium(lib.as_deref())?;
        let document = open_document(&pdfium, &path, pwd.as_deref())?;
        let pages = document.pages();
        let total = pages.len() as usize;
        let mut texts = Vec::with_capacity(total.saturating_sub(start_page));
        for idx in start_page..total {
            let page = pages
                .get(idx as u16)
                .map_err(|e| SliceError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;
            match page.text() {
                Ok(text) => texts.push(text.all()),
                Err(e) => {
                    warn!("Page {}: no text layer ({:?})", idx + 1, e);
                    texts.push(String::new());
                }
            };
        }
        debug!("Extracted text from {} pages", texts.len());
        Ok(texts)
    })
    .await
    .map_err(|e| SliceError::Internal(format!("Text extraction task panicked: {}", e)))?
}
