//! Typed OpenAlex API client (§4.6 search steps 1–7, §4.7 `referenced_works`
//! / `cited_by_api_url` traversal).
//!
//! Response shape mirrors the teacher's `resolver/crossref.rs` pattern: a
//! dedicated `reqwest::Client`, a `base_url` override hook so tests can point
//! at a `wiremock` server, and `serde`-typed structs for just the fields this
//! crate reads.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::PipelineError;

const DEFAULT_BASE_URL: &str = "https://api.openalex.org";
const ENDPOINT: &str = "openalex";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
pub struct OpenAlexListResponse {
    #[serde(default)]
    pub results: Vec<OpenAlexWork>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAlexWork {
    pub id: String,
    pub doi: Option<String>,
    pub display_name: Option<String>,
    pub publication_year: Option<i64>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    #[serde(default)]
    pub authorships: Vec<OpenAlexAuthorship>,
    pub primary_location: Option<OpenAlexLocation>,
    pub abstract_inverted_index: Option<BTreeMap<String, Vec<u32>>>,
    #[serde(default)]
    pub keywords: Vec<OpenAlexKeyword>,
    #[serde(default)]
    pub referenced_works: Vec<String>,
    pub cited_by_api_url: Option<String>,
}

impl OpenAlexWork {
    /// Reconstructs the plain-text abstract from the inverted index by
    /// ordering `(word, position)` pairs (§4.6 "Record construction").
    #[must_use]
    pub fn reconstructed_abstract(&self) -> Option<String> {
        let index = self.abstract_inverted_index.as_ref()?;
        let mut positions: Vec<(u32, &str)> = index
            .iter()
            .flat_map(|(word, positions)| positions.iter().map(move |&p| (p, word.as_str())))
            .collect();
        positions.sort_by_key(|(p, _)| *p);
        if positions.is_empty() {
            return None;
        }
        Some(positions.into_iter().map(|(_, w)| w).collect::<Vec<_>>().join(" "))
    }

    #[must_use]
    pub fn author_names(&self) -> Vec<String> {
        self.authorships
            .iter()
            .filter_map(|a| a.author.as_ref()?.display_name.clone())
            .collect()
    }

    #[must_use]
    pub fn container_name(&self) -> Option<String> {
        self.primary_location.as_ref()?.source.as_ref()?.display_name.clone()
    }

    /// Extracts the bare `W<digits>` token from `id` (§4.1) — callers must
    /// store this, not the raw URL form, in any `openalex_id` column so it
    /// compares equal to `NewReference::normalized_openalex_id()`.
    #[must_use]
    pub fn normalized_id(&self) -> Option<String> {
        crate::normalize::normalize_openalex_id(&self.id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAlexAuthorship {
    pub author: Option<OpenAlexAuthor>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAlexAuthor {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAlexLocation {
    pub source: Option<OpenAlexSource>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAlexSource {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAlexKeyword {
    pub display_name: Option<String>,
}

pub struct OpenAlexClient {
    client: Client,
    base_url: String,
}

impl OpenAlexClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }

    #[must_use]
    pub fn endpoint_key(&self) -> &'static str {
        ENDPOINT
    }

    async fn search(&self, query: &[(&str, String)]) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let url = format!("{}/works", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::TransientExternal {
                endpoint: ENDPOINT.to_string(),
                message: e.to_string(),
            })?;

        classify_status(response.status())?;

        let parsed: OpenAlexListResponse =
            response.json().await.map_err(|e| PipelineError::TerminalExternal {
                endpoint: ENDPOINT.to_string(),
                message: format!("malformed response body: {e}"),
            })?;

        Ok(parsed.results)
    }

    /// Step 1: exact `display_name` filter, optionally narrowed by container
    /// and year.
    pub async fn search_exact_title(
        &self,
        title: &str,
        container: Option<&str>,
        year: Option<i64>,
    ) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let filter = build_filter(Some(("display_name", title)), container, year);
        self.search(&[("filter", filter)]).await
    }

    /// Steps 2/3: `title.search` with a phrase or token query, optionally
    /// narrowed by container/year.
    pub async fn search_title_query(
        &self,
        title_query: &str,
        container: Option<&str>,
        year: Option<i64>,
    ) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let filter = build_filter(Some(("title.search", title_query)), container, year);
        self.search(&[("filter", filter)]).await
    }

    /// Step 7: free-text `search=` over the title.
    pub async fn search_free_text(&self, text: &str) -> Result<Vec<OpenAlexWork>, PipelineError> {
        self.search(&[("search", text.to_string())]).await
    }

    /// Step 9: last-resort free-text search over the container name.
    pub async fn search_free_text_container(&self, container: &str) -> Result<Vec<OpenAlexWork>, PipelineError> {
        self.search(&[("search", container.to_string())]).await
    }

    /// Fetches a single work by its OpenAlex id, used by the expander to walk
    /// `referenced_works`.
    pub async fn get_work(&self, openalex_id: &str) -> Result<Option<OpenAlexWork>, PipelineError> {
        let url = format!("{}/works/{}", self.base_url, openalex_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::TransientExternal {
                endpoint: ENDPOINT.to_string(),
                message: e.to_string(),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        classify_status(response.status())?;

        let work: OpenAlexWork = response.json().await.map_err(|e| PipelineError::TerminalExternal {
            endpoint: ENDPOINT.to_string(),
            message: format!("malformed response body: {e}"),
        })?;
        Ok(Some(work))
    }

    /// Fetches one page of the `cited_by_api_url` listing, 100 per page
    /// (§4.7).
    pub async fn get_cited_by_page(
        &self,
        cited_by_api_url: &str,
        page: u32,
    ) -> Result<Vec<OpenAlexWork>, PipelineError> {
        let response = self
            .client
            .get(cited_by_api_url)
            .query(&[("per-page", "100".to_string()), ("page", page.to_string())])
            .send()
            .await
            .map_err(|e| PipelineError::TransientExternal {
                endpoint: ENDPOINT.to_string(),
                message: e.to_string(),
            })?;

        classify_status(response.status())?;

        let parsed: OpenAlexListResponse =
            response.json().await.map_err(|e| PipelineError::TerminalExternal {
                endpoint: ENDPOINT.to_string(),
                message: format!("malformed response body: {e}"),
            })?;
        Ok(parsed.results)
    }
}

impl Default for OpenAlexClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_filter(title: Option<(&str, &str)>, container: Option<&str>, year: Option<i64>) -> String {
    let mut parts = Vec::new();
    if let Some((key, value)) = title {
        parts.push(format!("{key}:{value}"));
    }
    if let Some(container) = container {
        parts.push(format!("primary_location.source.display_name.search:{container}"));
    }
    if let Some(year) = year {
        parts.push(format!("publication_year:{year}"));
    }
    parts.join(",")
}

fn classify_status(status: StatusCode) -> Result<(), PipelineError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(PipelineError::TransientExternal {
            endpoint: ENDPOINT.to_string(),
            message: format!("HTTP {status}"),
        });
    }
    Err(PipelineError::TerminalExternal {
        endpoint: ENDPOINT.to_string(),
        message: format!("HTTP {status}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_abstract_from_inverted_index() {
        let mut index = BTreeMap::new();
        index.insert("The".to_string(), vec![0]);
        index.insert("firm".to_string(), vec![3]);
        index.insert("nature".to_string(), vec![1]);
        index.insert("of".to_string(), vec![2]);
        let work = OpenAlexWork {
            id: "https://openalex.org/W1".to_string(),
            doi: None,
            display_name: None,
            publication_year: None,
            work_type: None,
            authorships: vec![],
            primary_location: None,
            abstract_inverted_index: Some(index),
            keywords: vec![],
            referenced_works: vec![],
            cited_by_api_url: None,
        };
        assert_eq!(work.reconstructed_abstract().as_deref(), Some("The nature of firm"));
    }

    #[test]
    fn build_filter_joins_present_clauses() {
        let filter = build_filter(Some(("display_name", "The Firm")), Some("JPE"), Some(1937));
        assert_eq!(
            filter,
            "display_name:The Firm,primary_location.source.display_name.search:JPE,publication_year:1937"
        );
    }
}
