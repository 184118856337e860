//! Concrete implementations of biblio-core's external collaborator traits.
//! Real text-layer/OCR extraction is out of scope for this crate (SPEC_FULL.md
//! §1); `ManifestExtractor` stands in for it by reading a JSON sidecar a
//! separate extraction tool is expected to have produced alongside the PDF.

use std::path::Path;

use async_trait::async_trait;
use biblio_core::{FetchedPdf, NewReference, PdfExtractor, PdfFetcher, ResolvedPdf};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct Manifest {
    references: Vec<NewReference>,
}

/// Reads `{pdf path}`'s sibling manifest file and returns its references
/// verbatim. A real extractor (OCR, embedded text layer) would implement the
/// same trait and could be swapped in without touching the orchestrator.
pub struct ManifestExtractor {
    manifest_path: std::path::PathBuf,
}

impl ManifestExtractor {
    #[must_use]
    pub fn new(manifest_path: std::path::PathBuf) -> Self {
        Self { manifest_path }
    }
}

#[async_trait]
impl PdfExtractor for ManifestExtractor {
    async fn extract(&self, _path: &Path) -> Result<Vec<NewReference>, String> {
        let body = std::fs::read_to_string(&self.manifest_path)
            .map_err(|e| format!("reading manifest {}: {e}", self.manifest_path.display()))?;
        let manifest: Manifest =
            serde_json::from_str(&body).map_err(|e| format!("parsing manifest: {e}"))?;
        Ok(manifest.references)
    }
}

/// Fetches a resolved PDF over HTTP and writes it under `library_dir`, named
/// by its SHA-256 checksum so repeated downloads of the same bytes collide
/// on disk instead of accumulating duplicates.
pub struct HttpPdfFetcher {
    client: reqwest::Client,
    library_dir: std::path::PathBuf,
}

impl HttpPdfFetcher {
    #[must_use]
    pub fn new(library_dir: std::path::PathBuf) -> Self {
        Self { client: reqwest::Client::new(), library_dir }
    }
}

#[async_trait]
impl PdfFetcher for HttpPdfFetcher {
    async fn fetch(&self, resolved: &ResolvedPdf, enriched_id: i64) -> Result<FetchedPdf, String> {
        let response = self
            .client
            .get(&resolved.url)
            .send()
            .await
            .map_err(|e| format!("GET {}: {e}", resolved.url))?;
        if !response.status().is_success() {
            return Err(format!("GET {} returned {}", resolved.url, response.status()));
        }
        let bytes = response.bytes().await.map_err(|e| format!("reading body: {e}"))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let checksum_pdf = format!("{:x}", hasher.finalize());

        std::fs::create_dir_all(&self.library_dir)
            .map_err(|e| format!("creating {}: {e}", self.library_dir.display()))?;
        let file_path = self.library_dir.join(format!("{checksum_pdf}.pdf"));
        std::fs::write(&file_path, &bytes).map_err(|e| format!("writing {}: {e}", file_path.display()))?;

        let _ = enriched_id;
        Ok(FetchedPdf { file_path: file_path.display().to_string(), checksum_pdf })
    }
}
