//! Typed Crossref API client (§4.6 search step 8). Response struct shapes
//! are adapted directly from the teacher's `resolver/crossref.rs`
//! `CrossrefResponse`/`CrossrefMessage`/`CrossrefAuthor`, generalized from a
//! single DOI lookup to a bibliographic search query.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::PipelineError;

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";
const ENDPOINT: &str = "crossref";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct CrossrefSearchResponse {
    message: CrossrefSearchMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefSearchMessage {
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct CrossrefItem {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    pub title: Option<Vec<String>>,
    pub container_title: Option<Vec<String>>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub published: Option<CrossrefDate>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

impl CrossrefAuthor {
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        match (&self.given, &self.family) {
            (Some(given), Some(family)) => Some(format!("{given} {family}")),
            (None, Some(family)) => Some(family.clone()),
            (Some(given), None) => Some(given.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts")]
    pub date_parts: Option<Vec<Vec<Option<i64>>>>,
}

impl CrossrefItem {
    #[must_use]
    pub fn display_title(&self) -> Option<String> {
        self.title.as_ref()?.first().cloned()
    }

    #[must_use]
    pub fn display_container(&self) -> Option<String> {
        self.container_title.as_ref()?.first().cloned()
    }

    #[must_use]
    pub fn year(&self) -> Option<i64> {
        self.published
            .as_ref()?
            .date_parts
            .as_ref()?
            .first()?
            .first()
            .copied()
            .flatten()
    }

    #[must_use]
    pub fn author_names(&self) -> Vec<String> {
        self.author.iter().filter_map(CrossrefAuthor::display_name).collect()
    }
}

pub struct CrossrefClient {
    client: Client,
    base_url: String,
}

impl CrossrefClient {
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

    /// Step 8: `title`+`container-title`+`published` bibliographic search.
    pub async fn search_works(
        &self,
        title: &str,
        container: Option<&str>,
        year: Option<i64>,
    ) -> Result<Vec<CrossrefItem>, PipelineError> {
        let mut query_text = title.to_string();
        if let Some(container) = container {
            query_text.push(' ');
            query_text.push_str(container);
        }
        if let Some(year) = year {
            query_text.push(' ');
            query_text.push_str(&year.to_string());
        }

        let url = format!("{}/works", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query.bibliographic", query_text), ("rows", "20".to_string())])
            .send()
            .await
            .map_err(|e| PipelineError::TransientExternal {
                endpoint: ENDPOINT.to_string(),
                message: e.to_string(),
            })?;

        classify_status(response.status())?;

        let parsed: CrossrefSearchResponse =
            response.json().await.map_err(|e| PipelineError::TerminalExternal {
                endpoint: ENDPOINT.to_string(),
                message: format!("malformed response body: {e}"),
            })?;

        Ok(parsed.message.items)
    }
}

impl Default for CrossrefClient {
    fn default() -> Self {
        Self::new()
    }
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
    fn author_display_name_prefers_given_and_family() {
        let author = CrossrefAuthor {
            given: Some("Ronald".to_string()),
            family: Some("Coase".to_string()),
        };
        assert_eq!(author.display_name().as_deref(), Some("Ronald Coase"));
    }

    #[test]
    fn item_year_reads_first_date_part() {
        let item = CrossrefItem {
            doi: None,
            title: None,
            container_title: None,
            author: vec![],
            work_type: None,
            published: Some(CrossrefDate { date_parts: Some(vec![vec![Some(1937), Some(11)]]) }),
        };
        assert_eq!(item.year(), Some(1937));
    }
}
