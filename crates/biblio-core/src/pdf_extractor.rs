//! External PDF-text-extraction collaborator boundary (§6 `ingest-pdf`):
//! this crate never parses PDF bytes itself. A [`PdfExtractor`] turns a
//! file on disk into candidate [`NewReference`]s; the caller decides how
//! (OCR, embedded text layer, reference-string heuristics).

use std::path::Path;

use async_trait::async_trait;

use crate::model::NewReference;

/// Object-safe by design (`dyn PdfExtractor`) for the same reason as
/// [`crate::pdf_resolver::PdfResolver`] — native async trait methods are
/// not dyn-compatible on this edition.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<NewReference>, String>;
}
