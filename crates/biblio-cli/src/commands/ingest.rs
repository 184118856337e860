use anyhow::{Context, Result};
use biblio_core::{parse_bibtex, BatchCounters, Orchestrator};

use crate::cli::{IngestBibtexArgs, IngestPdfArgs};
use crate::pdf::ManifestExtractor;

pub(crate) async fn run_ingest_pdf(
    orchestrator: &Orchestrator,
    args: &IngestPdfArgs,
) -> Result<BatchCounters> {
    let corpus_id = match &args.corpus {
        Some(name) => Some(orchestrator.store().get_or_create_corpus(name).await?.id),
        None => None,
    };
    let extractor = ManifestExtractor::new(args.manifest.clone());
    let counters = orchestrator.ingest_pdf(&args.path, &extractor, corpus_id).await?;
    Ok(counters)
}

pub(crate) async fn run_ingest_bibtex(
    orchestrator: &Orchestrator,
    args: &IngestBibtexArgs,
) -> Result<BatchCounters> {
    let corpus_id = match &args.corpus {
        Some(name) => Some(orchestrator.store().get_or_create_corpus(name).await?.id),
        None => None,
    };
    let body = std::fs::read_to_string(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let result = parse_bibtex(&body, "bibtex", corpus_id);
    for skipped in &result.skipped {
        tracing::warn!(reason = %skipped.reason, "skipped malformed bibtex entry");
    }
    Ok(orchestrator.ingest(&result.references).await)
}
