//! External PDF-fetch collaborator boundary (§6): this crate never fetches
//! bytes off the network itself. A [`PdfResolver`] only says *where* a PDF
//! lives; the orchestrator's caller is responsible for the actual HTTP GET
//! and bytes-to-disk write.

use async_trait::async_trait;

use crate::model::NewReference;

#[derive(Debug, Clone)]
pub struct ResolvedPdf {
    pub url: String,
    pub source: String,
}

/// Object-safe by design (`dyn PdfResolver`), since native `async fn` in
/// traits is not dyn-compatible on this edition — mirrors the teacher's
/// `Resolver` trait in `resolver/mod.rs`.
#[async_trait]
pub trait PdfResolver: Send + Sync {
    async fn resolve(&self, reference: &NewReference) -> Option<ResolvedPdf>;
}

/// The only resolver this crate commits to: trusts `reference.url` verbatim.
/// Publisher-specific scraping resolvers belong to the external HTTP-fetcher
/// collaborator, not this crate (§6).
#[derive(Debug, Clone, Default)]
pub struct DirectUrlResolver;

#[async_trait]
impl PdfResolver for DirectUrlResolver {
    async fn resolve(&self, reference: &NewReference) -> Option<ResolvedPdf> {
        let url = reference.url.clone()?;
        Some(ResolvedPdf { url, source: "direct".to_string() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_url_resolver_passes_through_url() {
        let resolver = DirectUrlResolver;
        let reference = NewReference {
            url: Some("https://example.org/paper.pdf".to_string()),
            ..Default::default()
        };
        let resolved = resolver.resolve(&reference).await.unwrap();
        assert_eq!(resolved.url, "https://example.org/paper.pdf");
        assert_eq!(resolved.source, "direct");
    }

    #[tokio::test]
    async fn direct_url_resolver_returns_none_without_url() {
        let resolver = DirectUrlResolver;
        let resolved = resolver.resolve(&NewReference::default()).await;
        assert!(resolved.is_none());
    }
}
