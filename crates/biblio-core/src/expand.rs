//! C7 — Reference Expander: from a matched work, walk `referenced_works` and
//! `cited_by_api_url` and insert new candidates into the store through C3
//! (§4.7).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::edges::EdgeKind;
use crate::enrich::openalex::OpenAlexClient;
use crate::error::PipelineError;
use crate::model::NewReference;
use crate::normalize::normalize_openalex_id;
use crate::rate_limiter::RateLimiter;
use crate::store::{PromoteOutcome, Store};

#[derive(Debug, Clone, Copy)]
pub struct ExpandOptions {
    /// No recursion into stubs at depth 0; kept for API symmetry with a
    /// future multi-hop walk, but only depth 1 (the direct neighborhood) is
    /// ever driven by `expand`.
    pub related_depth: u32,
    pub max_related_per_reference: usize,
    pub follow_cited_by: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            related_depth: 1,
            max_related_per_reference: 40,
            follow_cited_by: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpandStats {
    pub references_seen: usize,
    pub references_inserted: usize,
    pub cited_by_seen: usize,
    pub cited_by_inserted: usize,
    pub edges_inserted: u64,
}

pub struct ReferenceExpander {
    openalex: OpenAlexClient,
    rate_limiter: Arc<RateLimiter>,
}

impl ReferenceExpander {
    #[must_use]
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self { openalex: OpenAlexClient::new(), rate_limiter }
    }

    #[must_use]
    pub fn with_client(openalex: OpenAlexClient, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { openalex, rate_limiter }
    }

    /// Expands a single enriched work identified by `openalex_id`. Checks
    /// `cancel` between pages and between sibling works so a long cited-by
    /// walk can be interrupted promptly.
    #[instrument(skip(self, store, cancel), fields(openalex_id))]
    pub async fn expand(
        &self,
        store: &Store,
        openalex_id: &str,
        options: ExpandOptions,
        cancel: &CancellationToken,
    ) -> Result<ExpandStats, PipelineError> {
        let mut stats = ExpandStats::default();
        if options.related_depth == 0 {
            return Ok(stats);
        }

        let permit = self.acquire().await?;
        let work = self.openalex.get_work(openalex_id).await?;
        drop(permit);
        let Some(work) = work else {
            return Ok(stats);
        };

        let referenced: Vec<String> = work
            .referenced_works
            .iter()
            .filter_map(|raw| normalize_openalex_id(raw))
            .take(options.max_related_per_reference)
            .collect();
        stats.references_seen = referenced.len();
        for target in &referenced {
            if cancel.is_cancelled() {
                return Ok(stats);
            }
            if self.insert_stub(store, target).await? {
                stats.references_inserted += 1;
            }
        }
        stats.edges_inserted += store.record_edges(openalex_id, &referenced, EdgeKind::References).await?;

        if options.follow_cited_by {
            if let Some(cited_by_url) = work.cited_by_api_url.as_deref() {
                let cited_by =
                    self.collect_cited_by(cited_by_url, options.max_related_per_reference, cancel).await?;
                stats.cited_by_seen = cited_by.len();
                for source in &cited_by {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if self.insert_stub(store, source).await? {
                        stats.cited_by_inserted += 1;
                    }
                }
                stats.edges_inserted += store.record_edges(openalex_id, &cited_by, EdgeKind::CitedBy).await?;
            }
        }

        Ok(stats)
    }

    /// `backfill-edges` (§4.9 maintenance): re-fetches `openalex_id`'s work
    /// and records any `references` edges missing from `citation_edges`
    /// without touching `enriched` stubs. In `dry_run` mode nothing is
    /// written; the counts describe what a real run would do.
    pub async fn backfill(
        &self,
        store: &Store,
        openalex_id: &str,
        dry_run: bool,
    ) -> Result<(u64, u64), PipelineError> {
        let permit = self.acquire().await?;
        let work = self.openalex.get_work(openalex_id).await?;
        drop(permit);
        let Some(work) = work else {
            return Ok((0, 0));
        };

        let existing = store.edges_from(openalex_id).await?;
        let existing_targets: std::collections::HashSet<&str> =
            existing.iter().map(|edge| edge.target_openalex_id.as_str()).collect();
        let referenced: Vec<String> =
            work.referenced_works.iter().filter_map(|raw| normalize_openalex_id(raw)).collect();
        let new: Vec<String> = referenced
            .iter()
            .filter(|target| !existing_targets.contains(target.as_str()))
            .cloned()
            .collect();
        let skipped = (referenced.len() - new.len()) as u64;

        if dry_run {
            return Ok((new.len() as u64, skipped));
        }
        let inserted = store.record_edges(openalex_id, &new, EdgeKind::References).await?;
        Ok((inserted, skipped))
    }

    async fn collect_cited_by(
        &self,
        cited_by_api_url: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let mut ids = Vec::new();
        let mut page = 1u32;
        while ids.len() < max {
            if cancel.is_cancelled() {
                break;
            }
            let permit = self.acquire().await?;
            let works = self.openalex.get_cited_by_page(cited_by_api_url, page).await?;
            drop(permit);
            if works.is_empty() {
                break;
            }
            for work in works {
                let Some(id) = work.normalized_id() else { continue };
                ids.push(id);
                if ids.len() >= max {
                    break;
                }
            }
            page += 1;
        }
        Ok(ids)
    }

    async fn insert_stub(&self, store: &Store, openalex_id: &str) -> Result<bool, PipelineError> {
        let stub = NewReference {
            openalex_id: Some(openalex_id.to_string()),
            ..Default::default()
        };
        match store.insert_stub(&stub).await? {
            PromoteOutcome::Promoted(id) => {
                debug!(stub_id = id, openalex_id, "inserted reference-expansion stub");
                Ok(true)
            }
            PromoteOutcome::Rejected(_) => Ok(false),
        }
    }

    async fn acquire(&self) -> Result<crate::rate_limiter::Permit, PipelineError> {
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::enrich::openalex::OpenAlexClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn expand_with_zero_depth_is_a_no_op() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let expander = ReferenceExpander::new(Arc::new(RateLimiter::new()));
        let cancel = CancellationToken::new();
        let options = ExpandOptions { related_depth: 0, ..Default::default() };

        let stats = expander.expand(&store, "W1", options, &cancel).await.unwrap();
        assert_eq!(stats.references_seen, 0);
        assert_eq!(stats.cited_by_seen, 0);
    }

    #[tokio::test]
    async fn backfill_skips_edges_already_recorded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/W1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "W1",
                "referenced_works": ["W2", "W3"],
            })))
            .mount(&mock_server)
            .await;

        let store = Store::new(Database::new_in_memory().await.unwrap());
        store.record_edges("W1", &["W2".to_string()], EdgeKind::References).await.unwrap();

        let openalex = OpenAlexClient::with_base_url(mock_server.uri());
        let expander = ReferenceExpander::with_client(openalex, Arc::new(RateLimiter::new()));

        let (inserted, skipped) = expander.backfill(&store, "W1", false).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(skipped, 1);

        let edges = store.edges_from("W1").await.unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[tokio::test]
    async fn backfill_dry_run_writes_nothing() {
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
        let openalex = OpenAlexClient::with_base_url(mock_server.uri());
        let expander = ReferenceExpander::with_client(openalex, Arc::new(RateLimiter::new()));

        let (inserted, skipped) = expander.backfill(&store, "W1", true).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(skipped, 0);
        assert!(store.edges_from("W1").await.unwrap().is_empty());
    }
}
