//! Input resolution: validate a local PDF or spill in-memory bytes to disk.
//!
//! pdfium opens documents by path here, so bytes handed to
//! [`crate::slice::slice_bytes`] are written into a `TempDir` that lives as
//! long as the [`ResolvedInput`]. The `%PDF` magic is checked up front so a
//! wrong file surfaces as [`SliceError::NotAPdf`] instead of a pdfium error.

use crate::error::SliceError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// A PDF ready for pdfium to open.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input arrived as bytes; the `TempDir` is kept alive until processing completes.
    Spilled { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Spilled { path, .. } => path,
        }
    }
}

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn resolve_local(path: &Path) -> Result<ResolvedInput, SliceError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(SliceError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(SliceError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(SliceError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(SliceError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Write PDF bytes to a temporary file.
pub fn spill_bytes(bytes: &[u8]) -> Result<ResolvedInput, SliceError> {
    let temp_dir = TempDir::new().map_err(|e| SliceError::Internal(e.to_string()))?;
    let path = temp_dir.path().join("input.pdf");

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(SliceError::NotAPdf { path, magic });
    }

    std::fs::write(&path, bytes)
        .map_err(|e| SliceError::Internal(format!("Failed to write temp file: {}", e)))?;
    debug!("Spilled {} bytes to {}", bytes.len(), path.display());

    Ok(ResolvedInput::Spilled {
        path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_reported() {
        let err = resolve_local(Path::new("/definitely/not/here.pdf"))
            .err()
            .unwrap();
        assert!(matches!(err, SliceError::FileNotFound { .. }));
    }

    #[test]
    fn non_pdf_magic_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04rest-of-zip").unwrap();
        let err = resolve_local(f.path()).err().unwrap();
        match err {
            SliceError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pdf_magic_is_accepted() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        let resolved = resolve_local(f.path()).unwrap();
        assert_eq!(resolved.path(), f.path());
    }

    #[test]
    fn spilled_bytes_live_until_drop() {
        let resolved = spill_bytes(b"%PDF-1.4\n%%EOF").unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.exists());
        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn spilled_non_pdf_is_rejected() {
        assert!(matches!(
            spill_bytes(b"\x89PNG...."),
            Err(SliceError::NotAPdf { .. })
        ));
    }
}
