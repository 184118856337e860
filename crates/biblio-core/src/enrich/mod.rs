//! C6 — Enrichment Matcher: given a raw reference, returns either an
//! enriched record or none (§4.6).

pub mod author_match;
pub mod crossref;
pub mod openalex;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::PipelineError;
use crate::model::NewReference;
use crate::rate_limiter::RateLimiter;
use crate::store::RawRow;

use crossref::CrossrefClient;
use openalex::{OpenAlexClient, OpenAlexWork};

/// A deduplicated search hit, tagged with the earliest step that produced
/// it (lower is earlier, used as the acceptance tie-breaker).
#[derive(Debug, Clone)]
struct Candidate {
    record: NewReference,
    earliest_step: u8,
}

pub struct EnrichmentMatcher {
    openalex: OpenAlexClient,
    crossref: CrossrefClient,
    rate_limiter: Arc<RateLimiter>,
}

impl EnrichmentMatcher {
    #[must_use]
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            openalex: OpenAlexClient::new(),
            crossref: CrossrefClient::new(),
            rate_limiter,
        }
    }

    #[must_use]
    pub fn with_clients(openalex: OpenAlexClient, crossref: CrossrefClient, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { openalex, crossref, rate_limiter }
    }

    /// Runs every search strategy in order, scores the surviving candidates,
    /// and returns the accepted one (§4.6). Each step's network error is
    /// logged and treated as an empty result; no single step's failure
    /// aborts the search.
    #[instrument(skip(self, raw), fields(raw_id = raw.id))]
    pub async fn enrich(&self, raw: &RawRow, cancel: &CancellationToken) -> Result<Option<NewReference>, PipelineError> {
        let title = raw.title.clone().unwrap_or_default();
        if title.trim().is_empty() {
            return Ok(None);
        }
        let authors = parse_authors_json(&raw.authors);
        let container = raw.source.clone();
        let year = raw.year;

        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        macro_rules! fold_step {
            ($step:expr, $call:expr) => {
                if cancel.is_cancelled() {
                    break;
                }
                match $call {
                    Ok(works) => fold_openalex(&mut candidates, works, $step),
                    Err(err) => debug!(step = $step, error = %err, "enrichment search step yielded no results"),
                }
            };
        }

        loop {
            fold_step!(1u8, self.openalex_exact(&title, container.as_deref(), year).await);
            fold_step!(2u8, self.openalex_title_query(&title, container.as_deref(), year, true).await);
            fold_step!(3u8, self.openalex_title_query(&title, container.as_deref(), year, false).await);
            fold_step!(4u8, self.openalex_exact(&title, container.as_deref(), None).await);
            fold_step!(5u8, self.openalex_title_query(&title, container.as_deref(), None, true).await);
            fold_step!(6u8, self.openalex_title_query(&title, container.as_deref(), None, false).await);
            fold_step!(7u8, self.openalex_free_text(&title).await);

            if cancel.is_cancelled() {
                break;
            }
            match self.crossref_search(&title, container.as_deref(), year).await {
                Ok(items) => fold_crossref(&mut candidates, items, 8u8),
                Err(err) => debug!(step = 8, error = %err, "crossref search step yielded no results"),
            }

            if let Some(container) = container.as_deref() {
                fold_step!(9u8, self.openalex.search_free_text_container(container).await.map_err(|e| {
                    warn!(step = 9, error = %e, "openalex container fallback failed");
                    e
                }));
            }

            break;
        }

        let reference_people = authors;
        let mut scored: Vec<(f64, u8, Candidate)> = candidates
            .into_values()
            .map(|c| {
                let score = author_match::score_authors(&reference_people, &c.record.authors);
                (score, c.earliest_step, c)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));

        Ok(scored.into_iter().find(|(score, _, _)| *score > 0.0).map(|(_, _, c)| c.record))
    }

    async fn openalex_exact(
        &self,
        title: &str,
        container: Option<&str>,
        year: Option<i64>,
    ) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let _permit = self.acquire_openalex().await?;
        self.openalex.search_exact_title(title, container, year).await
    }

    async fn openalex_title_query(
        &self,
        title: &str,
        container: Option<&str>,
        year: Option<i64>,
        phrase: bool,
    ) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let _permit = self.acquire_openalex().await?;
        let query = if phrase { title.to_string() } else { title.split_whitespace().collect::<Vec<_>>().join(" ") };
        self.openalex.search_title_query(&query, container, year).await
    }

    async fn openalex_free_text(&self, title: &str) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let _permit = self.acquire_openalex().await?;
        self.openalex.search_free_text(title).await
    }

    async fn crossref_search(
        &self,
        title: &str,
        container: Option<&str>,
        year: Option<i64>,
    ) -> Result<Vec<crossref::CrossrefItem>, PipelineError> {
        let cancel = CancellationToken::new();
        let _permit = self
            .rate_limiter
            .acquire(self.crossref.endpoint_key(), 0, &cancel)
            .await
            .ok_or_else(|| PipelineError::TransientExternal {
                endpoint: self.crossref.endpoint_key().to_string(),
                message: "rate limit wait cancelled".to_string(),
            })?;
        self.crossref.search_works(title, container, year).await
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
}

fn parse_authors_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn fold_openalex(candidates: &mut HashMap<String, Candidate>, works: Vec<OpenAlexWork>, step: u8) {
    for work in works {
        let key = work.id.clone();
        let record = NewReference {
            title: work.display_name.clone(),
            authors: work.author_names(),
            year: work.publication_year,
            doi: work.doi.clone(),
            openalex_id: work.normalized_id(),
            entry_type: work.work_type.clone(),
            source: work.container_name(),
            abstract_text: work.reconstructed_abstract(),
            keywords: work.keywords.iter().filter_map(|k| k.display_name.clone()).collect(),
            ..Default::default()
        };
        candidates
            .entry(key)
            .and_modify(|c| c.earliest_step = c.earliest_step.min(step))
            .or_insert(Candidate { record, earliest_step: step });
    }
}

fn fold_crossref(candidates: &mut HashMap<String, Candidate>, items: Vec<crossref::CrossrefItem>, step: u8) {
    for item in items {
        let Some(doi) = item.doi.clone() else { continue };
        let key = format!("doi:{doi}");
        let record = NewReference {
            title: item.display_title(),
            authors: item.author_names(),
            year: item.year(),
            doi: Some(doi),
            entry_type: item.work_type.clone(),
            source: item.display_container(),
            ..Default::default()
        };
        candidates
            .entry(key)
            .and_modify(|c| c.earliest_step = c.earliest_step.min(step))
            .or_insert(Candidate { record, earliest_step: step });
    }
}
