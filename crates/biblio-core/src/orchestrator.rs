//! C10 — Orchestrator: drives stage transitions, batches per-row operations,
//! and aggregates the `{processed, promoted, queued, duplicates, failed}`
//! counters every batch operation reports (§4.10, §7 "Surface rules").

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use std::path::Path;

use crate::enrich::openalex::OpenAlexClient;
use crate::enrich::EnrichmentMatcher;
use crate::error::PipelineError;
use crate::expand::{ExpandOptions, ReferenceExpander};
use crate::model::NewReference;
use crate::pdf_extractor::PdfExtractor;
use crate::pdf_resolver::{PdfResolver, ResolvedPdf};
use crate::queue::{ClaimOptions, FailOutcome};
use crate::rate_limiter::RateLimiter;
use crate::store::{InsertOutcome, PromoteOutcome, Store};
use std::sync::Arc;

pub const DEFAULT_ENRICH_BATCH_SIZE: i64 = 10;
pub const DEFAULT_DOWNLOAD_BATCH_SIZE: i64 = 8;
pub const DEFAULT_LEASE_SECONDS: i64 = 300;
pub const DEFAULT_DOWNLOAD_RETRY_BUDGET: i64 = 3;

/// Per-batch aggregate reported by every orchestrator operation (§7). A
/// per-row failure is recorded here and never aborts the rest of the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchCounters {
    pub processed: u64,
    pub promoted: u64,
    pub queued: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl BatchCounters {
    fn note_error(&mut self, context: &str, err: &PipelineError) {
        self.failed += 1;
        self.errors.push(format!("{context}: {err}"));
    }
}

/// Fetches an already-resolved PDF's bytes to disk. The orchestrator never
/// performs this I/O itself (§6 "PDF resolver (external collaborator)");
/// implementors own the HTTP GET and the checksum computation.
#[async_trait]
pub trait PdfFetcher: Send + Sync {
    async fn fetch(&self, resolved: &ResolvedPdf, enriched_id: i64) -> Result<FetchedPdf, String>;
}

#[derive(Debug, Clone)]
pub struct FetchedPdf {
    pub file_path: String,
    pub checksum_pdf: String,
}

/// `backfill-edges` (§6 maintenance) aggregate: how many enriched rows were
/// considered, and how many `citation_edges` rows were (or would have been,
/// under `dry_run`) inserted versus already present.
#[derive(Debug, Clone, Default)]
pub struct BackfillStats {
    pub rows_seen: u64,
    pub edges_inserted: u64,
    pub edges_skipped: u64,
}

pub struct Orchestrator {
    store: Store,
    matcher: EnrichmentMatcher,
    expander: ReferenceExpander,
    openalex: OpenAlexClient,
    rate_limiter: Arc<RateLimiter>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Store,
        matcher: EnrichmentMatcher,
        expander: ReferenceExpander,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { store, matcher, expander, openalex: OpenAlexClient::new(), rate_limiter }
    }

    #[must_use]
    pub fn with_openalex_client(
        store: Store,
        matcher: EnrichmentMatcher,
        expander: ReferenceExpander,
        openalex: OpenAlexClient,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { store, matcher, expander, openalex, rate_limiter }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// `ingest-pdf`/`ingest-bibtex` (§6): the caller has already turned a PDF
    /// or BibTeX file into `NewReference` candidates via an external
    /// extractor/parser; this just runs each through `insert_raw`.
    #[instrument(skip(self, candidates))]
    pub async fn ingest(&self, candidates: &[NewReference]) -> BatchCounters {
        let mut counters = BatchCounters::default();
        for candidate in candidates {
            counters.processed += 1;
            match self.store.insert_raw(candidate).await {
                Ok(InsertOutcome::Inserted(_)) => counters.promoted += 1,
                Ok(InsertOutcome::Rejected(_)) => counters.duplicates += 1,
                Err(err) => counters.note_error("insert_raw", &err),
            }
        }
        counters
    }

    /// `ingest-pdf` (§6): hands `path` to `extractor` and ingests whatever
    /// candidates it returns. A single extraction failure aborts the
    /// operation — unlike a per-row dedup rejection, a failed extraction
    /// means there is nothing to ingest at all.
    #[instrument(skip(self, extractor))]
    pub async fn ingest_pdf(
        &self,
        path: &Path,
        extractor: &dyn PdfExtractor,
        corpus_id: Option<i64>,
    ) -> Result<BatchCounters, PipelineError> {
        let mut candidates = extractor
            .extract(path)
            .await
            .map_err(|message| PipelineError::TerminalExternal { endpoint: "pdf_extractor".to_string(), message })?;
        for candidate in &mut candidates {
            candidate.corpus_id = candidate.corpus_id.or(corpus_id);
            candidate.ingest_source = candidate.ingest_source.clone().or_else(|| Some("pdf".to_string()));
        }
        Ok(self.ingest(&candidates).await)
    }

    /// `keyword-search` (§6): records a search run before calling OpenAlex so
    /// a crash mid-search still leaves an audit trail, then either persists
    /// every hit to `search_results` (preview mode) or ingests them straight
    /// into `raw` when `enqueue` is set.
    #[instrument(skip(self))]
    pub async fn keyword_search(
        &self,
        query: &str,
        corpus_id: Option<i64>,
        enqueue: bool,
    ) -> Result<(i64, BatchCounters), PipelineError> {
        let run_id = self.store.start_ingest_run(Some(query), None, None).await?;
        let permit = self.acquire_openalex().await?;
        let hits = self.openalex.search_free_text(query).await;
        drop(permit);
        let hits = hits?;

        let mut counters = BatchCounters::default();
        if enqueue {
            let candidates: Vec<NewReference> = hits
                .into_iter()
                .map(|work| NewReference {
                    title: work.display_name.clone(),
                    authors: work.author_names(),
                    year: work.publication_year,
                    doi: work.doi.clone(),
                    openalex_id: work.normalized_id(),
                    entry_type: work.work_type.clone(),
                    source: work.container_name(),
                    corpus_id,
                    ingest_source: Some("keyword_search".to_string()),
                    ..Default::default()
                })
                .collect();
            counters = self.ingest(&candidates).await;
        } else {
            for work in &hits {
                counters.processed += 1;
                self.store
                    .record_search_result(
                        run_id,
                        Some(&work.id),
                        work.doi.as_deref(),
                        work.display_name.as_deref(),
                        work.publication_year,
                        None,
                    )
                    .await?;
            }
        }

        Ok((run_id, counters))
    }

    async fn acquire_openalex(&self) -> Result<crate::rate_limiter::Permit, PipelineError> {
        let cancel = CancellationToken::new();
        self.rate_limiter
            .acquire(self.openalex.endpoint_key(), 0, &cancel)
            .await
            .ok_or_else(|| PipelineError::TransientExternal {
                endpoint: self.openalex.endpoint_key().to_string(),
                message: "rate limit wait cancelled".to_string(),
            })
    }

    /// `enrich-batch` (§6): drains up to `limit` rows from `raw`, matches
    /// each via C6, promotes matches to `enriched`, enqueues every promoted
    /// row for download, optionally expands their citation neighborhood via
    /// C7, and moves misses to `failed_enrichment`.
    #[instrument(skip(self, cancel))]
    pub async fn enrich_batch(
        &self,
        limit: i64,
        expand_options: Option<ExpandOptions>,
        cancel: &CancellationToken,
    ) -> Result<BatchCounters, PipelineError> {
        let mut counters = BatchCounters::default();
        let candidates = self.store.list_raw(limit, 0).await?;

        for raw in candidates {
            if cancel.is_cancelled() {
                info!("enrich_batch cancelled; {} of {} rows processed", counters.processed, limit);
                break;
            }
            counters.processed += 1;

            let matched = match self.matcher.enrich(&raw, cancel).await {
                Ok(matched) => matched,
                Err(err) => {
                    counters.note_error("enrich", &err);
                    continue;
                }
            };

            let Some(matched) = matched else {
                if let Err(err) = self.store.fail_enrichment(raw.id, "no match").await {
                    counters.note_error("fail_enrichment", &err);
                } else {
                    counters.failed += 1;
                }
                continue;
            };

            let download_source = matched.openalex_id.as_deref().map(|_| "openalex");
            match self.store.promote_to_enriched(raw.id, &matched, download_source).await {
                Ok(PromoteOutcome::Promoted(enriched_id)) => {
                    counters.promoted += 1;
                    match self.store.enqueue_for_download(enriched_id, 0).await {
                        Ok(true) => counters.queued += 1,
                        Ok(false) => {}
                        Err(err) => counters.note_error("enqueue_for_download", &err),
                    }
                    if let Some(options) = expand_options {
                        if let Some(openalex_id) = matched.openalex_id.as_deref() {
                            if let Err(err) =
                                self.expander.expand(&self.store, openalex_id, options, cancel).await
                            {
                                warn!(enriched_id, error = %err, "reference expansion failed");
                            }
                        }
                    }
                }
                Ok(PromoteOutcome::Rejected(_)) => counters.duplicates += 1,
                Err(err) => counters.note_error("promote_to_enriched", &err),
            }
        }

        Ok(counters)
    }

    /// `expand` (§6): walks one already-enriched work's neighborhood without
    /// touching `raw` — used when a caller wants to widen an existing corpus
    /// rather than enrich fresh candidates.
    pub async fn expand(
        &self,
        openalex_id: &str,
        options: ExpandOptions,
        cancel: &CancellationToken,
    ) -> Result<crate::expand::ExpandStats, PipelineError> {
        self.expander.expand(&self.store, openalex_id, options, cancel).await
    }

    /// `download-batch` (§6): claims up to `limit` rows, resolves a PDF
    /// location for each via `resolver`, and drives `fetcher` to persist the
    /// bytes. A row with no resolver hit, or whose fetch fails, counts
    /// against its retry budget through [`crate::queue::Store::fail_download`].
    #[instrument(skip(self, resolver, fetcher, cancel))]
    pub async fn download_batch(
        &self,
        worker_id: &str,
        limit: i64,
        lease_seconds: i64,
        retry_budget: i64,
        resolver: &dyn PdfResolver,
        fetcher: &dyn PdfFetcher,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<BatchCounters, PipelineError> {
        let mut counters = BatchCounters::default();
        let options = ClaimOptions { corpus_id: None, limit, lease_seconds };
        let claimed = self.store.claim_batch(worker_id, options, now).await?;

        for row in claimed {
            if cancel.is_cancelled() {
                info!("download_batch cancelled after claiming; rows remain in_progress until lease expiry");
                break;
            }
            counters.processed += 1;

            let candidate = NewReference {
                title: row.title.clone(),
                doi: row.doi.clone(),
                openalex_id: row.openalex_id.clone(),
                url: row.url.clone(),
                ..Default::default()
            };

            let outcome = match resolver.resolve(&candidate).await {
                None => self.store.fail_download(row.id, "no pdf resolver match", retry_budget).await,
                Some(resolved) => match fetcher.fetch(&resolved, row.id).await {
                    Ok(fetched) => {
                        self.store
                            .complete_download(row.id, &fetched.file_path, &fetched.checksum_pdf)
                            .await?;
                        counters.promoted += 1;
                        continue;
                    }
                    Err(reason) => self.store.fail_download(row.id, &reason, retry_budget).await,
                },
            };

            match outcome {
                Ok(FailOutcome::Failed) => counters.failed += 1,
                Ok(FailOutcome::ExhaustedBudget) => counters.failed += 1,
                Ok(FailOutcome::NotFound) => {}
                Err(err) => counters.note_error("fail_download", &err),
            }
        }

        Ok(counters)
    }

    /// `backfill-edges` (§6 maintenance): re-fetches up to `limit` already
    /// enriched works and records any `references` edges missing from
    /// `citation_edges`. Does not touch `enriched` rows themselves. A single
    /// row's fetch failure is logged and skipped so one bad `openalex_id`
    /// doesn't abort the whole sweep.
    #[instrument(skip(self, cancel))]
    pub async fn backfill_edges(
        &self,
        limit: i64,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<BackfillStats, PipelineError> {
        let mut stats = BackfillStats::default();
        let rows = self.store.list_enriched_with_openalex_id(limit).await?;

        for row in rows {
            if cancel.is_cancelled() {
                info!("backfill_edges cancelled; {} rows seen", stats.rows_seen);
                break;
            }
            let Some(openalex_id) = row.openalex_id.as_deref() else {
                continue;
            };
            stats.rows_seen += 1;

            match self.expander.backfill(&self.store, openalex_id, dry_run).await {
                Ok((inserted, skipped)) => {
                    stats.edges_inserted += inserted;
                    stats.edges_skipped += skipped;
                }
                Err(err) => warn!(openalex_id, error = %err, "backfill_edges: fetch failed for row"),
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::rate_limiter::RateLimiter;
    use std::sync::Arc;

    struct AlwaysMissResolver;

    #[async_trait]
    impl PdfResolver for AlwaysMissResolver {
        async fn resolve(&self, _reference: &NewReference) -> Option<ResolvedPdf> {
            None
        }
    }

    struct StubExtractor(Vec<NewReference>);

    #[async_trait]
    impl PdfExtractor for StubExtractor {
        async fn extract(&self, _path: &std::path::Path) -> Result<Vec<NewReference>, String> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl PdfExtractor for FailingExtractor {
        async fn extract(&self, _path: &std::path::Path) -> Result<Vec<NewReference>, String> {
            Err("no text layer".to_string())
        }
    }

    struct NoopFetcher;

    #[async_trait]
    impl PdfFetcher for NoopFetcher {
        async fn fetch(&self, _resolved: &ResolvedPdf, _enriched_id: i64) -> Result<FetchedPdf, String> {
            Err("unused".to_string())
        }
    }

    async fn orchestrator() -> Orchestrator {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let limiter = Arc::new(RateLimiter::new());
        Orchestrator::new(
            store,
            EnrichmentMatcher::new(limiter.clone()),
            ReferenceExpander::new(limiter.clone()),
            limiter,
        )
    }

    #[tokio::test]
    async fn ingest_reports_promoted_and_duplicate_counts() {
        let orchestrator = orchestrator().await;
        let candidate = NewReference {
            title: Some("The Road to Serfdom".to_string()),
            doi: Some("10.1234/serfdom".to_string()),
            ..Default::default()
        };

        let counters = orchestrator.ingest(&[candidate.clone(), candidate]).await;
        assert_eq!(counters.processed, 2);
        assert_eq!(counters.promoted, 1);
        assert_eq!(counters.duplicates, 1);
        assert!(counters.errors.is_empty());
    }

    #[tokio::test]
    async fn ingest_pdf_tags_candidates_with_corpus_and_source() {
        let orchestrator = orchestrator().await;
        let extracted = vec![NewReference { title: Some("Extracted Work".to_string()), ..Default::default() }];
        let counters = orchestrator
            .ingest_pdf(std::path::Path::new("paper.pdf"), &StubExtractor(extracted), Some(3))
            .await
            .unwrap();
        assert_eq!(counters.promoted, 1);

        let raw = orchestrator.store.list_raw(10, 0).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].corpus_id, Some(3));
        assert_eq!(raw[0].ingest_source.as_deref(), Some("pdf"));
    }

    #[tokio::test]
    async fn ingest_pdf_propagates_extraction_failure() {
        let orchestrator = orchestrator().await;
        let result = orchestrator.ingest_pdf(std::path::Path::new("broken.pdf"), &FailingExtractor, None).await;
        assert!(matches!(result, Err(PipelineError::TerminalExternal { .. })));
    }

    #[tokio::test]
    async fn download_batch_with_no_resolver_match_counts_as_failed() {
        let orchestrator = orchestrator().await;
        let candidate = NewReference {
            title: Some("Stub Work".to_string()),
            openalex_id: Some("W1".to_string()),
            ..Default::default()
        };
        let raw_id = match orchestrator.store.insert_raw(&candidate).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!(),
        };
        let enriched_id = match orchestrator.store.promote_to_enriched(raw_id, &candidate, None).await.unwrap() {
            PromoteOutcome::Promoted(id) => id,
            PromoteOutcome::Rejected(_) => panic!(),
        };
        orchestrator.store.enqueue_for_download(enriched_id, 0).await.unwrap();

        let cancel = CancellationToken::new();
        let counters = orchestrator
            .download_batch("worker-1", 10, 60, 3, &AlwaysMissResolver, &NoopFetcher, 0, &cancel)
            .await
            .unwrap();

        assert_eq!(counters.processed, 1);
        assert_eq!(counters.failed, 1);
    }

    #[tokio::test]
    async fn backfill_edges_sweeps_enriched_rows_with_openalex_ids() {
        use crate::enrich::openalex::OpenAlexClient;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/W1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "W1",
                "referenced_works": ["W2"],
            })))
            .mount(&mock_server)
            .await;

        let store = Store::new(Database::new_in_memory().await.unwrap());
        let candidate = NewReference {
            title: Some("Root Work".to_string()),
            openalex_id: Some("W1".to_string()),
            ..Default::default()
        };
        let raw_id = match store.insert_raw(&candidate).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!(),
        };
        store.promote_to_enriched(raw_id, &candidate, None).await.unwrap();

        let limiter = Arc::new(RateLimiter::new());
        let expander = ReferenceExpander::with_client(
            OpenAlexClient::with_base_url(mock_server.uri()),
            limiter.clone(),
        );
        let orchestrator = Orchestrator::new(
            store,
            EnrichmentMatcher::new(limiter.clone()),
            expander,
            limiter,
        );

        let cancel = CancellationToken::new();
        let stats = orchestrator.backfill_edges(10, false, &cancel).await.unwrap();
        assert_eq!(stats.rows_seen, 1);
        assert_eq!(stats.edges_inserted, 1);
        assert_eq!(stats.edges_skipped, 0);
    }

    #[tokio::test]
    async fn keyword_search_preview_mode_persists_results_without_ingesting() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "id": "W1",
                    "doi": "10.1/x",
                    "display_name": "The Nature of the Firm",
                    "publication_year": 1937,
                    "referenced_works": [],
                }],
            })))
            .mount(&mock_server)
            .await;

        let store = Store::new(Database::new_in_memory().await.unwrap());
        let limiter = Arc::new(RateLimiter::new());
        let orchestrator = Orchestrator::with_openalex_client(
            store,
            EnrichmentMatcher::new(limiter.clone()),
            ReferenceExpander::new(limiter.clone()),
            OpenAlexClient::with_base_url(mock_server.uri()),
            limiter,
        );

        let (run_id, counters) =
            orchestrator.keyword_search("transaction cost economics", None, false).await.unwrap();
        assert_eq!(counters.processed, 1);

        let results = orchestrator.store.list_search_results(run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title.as_deref(), Some("The Nature of the Firm"));
        assert!(orchestrator.store.list_raw(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyword_search_enqueue_mode_ingests_hits_into_raw() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "id": "W1",
                    "doi": "10.1/x",
                    "display_name": "The Nature of the Firm",
                    "publication_year": 1937,
                    "referenced_works": [],
                }],
            })))
            .mount(&mock_server)
            .await;

        let store = Store::new(Database::new_in_memory().await.unwrap());
        let limiter = Arc::new(RateLimiter::new());
        let orchestrator = Orchestrator::with_openalex_client(
            store,
            EnrichmentMatcher::new(limiter.clone()),
            ReferenceExpander::new(limiter.clone()),
            OpenAlexClient::with_base_url(mock_server.uri()),
            limiter,
        );

        let (_, counters) = orchestrator.keyword_search("coase", Some(2), true).await.unwrap();
        assert_eq!(counters.promoted, 1);

        let raw = orchestrator.store.list_raw(10, 0).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].corpus_id, Some(2));
    }
}
