//! Common reference shape shared by every stage table (SPEC_FULL.md §3).

use serde::{Deserialize, Serialize};

use crate::normalize::{normalize_authors, normalize_doi, normalize_openalex_id, normalize_title};

/// A candidate reference on its way into the store. Carries the original
/// fields only — normalized keys are derived at insert time, never supplied
/// by the caller, so they can never drift from the canonicalization rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewReference {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub entry_type: Option<String>,
    pub source: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub url: Option<String>,
    pub isbn: Option<String>,
    pub issn: Option<String>,
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub language: Option<String>,
    pub ingest_source: Option<String>,
    pub corpus_id: Option<i64>,
    pub bibtex_entry_json: Option<String>,
}

/// The derived comparison keys the resolver matches on.
#[derive(Debug, Clone, Default)]
pub struct NormalizedKeys {
    pub normalized_doi: Option<String>,
    pub normalized_title: Option<String>,
    pub normalized_authors: Option<String>,
}

impl NewReference {
    #[must_use]
    pub fn normalized_keys(&self) -> NormalizedKeys {
        NormalizedKeys {
            normalized_doi: self.doi.as_deref().and_then(normalize_doi),
            normalized_title: self.title.as_deref().and_then(normalize_title),
            normalized_authors: normalize_authors(&self.authors),
        }
    }

    #[must_use]
    pub fn normalized_openalex_id(&self) -> Option<String> {
        self.openalex_id.as_deref().and_then(normalize_openalex_id)
    }

    #[must_use]
    pub fn authors_json(&self) -> String {
        serde_json::to_string(&self.authors).unwrap_or_else(|_| "[]".to_string())
    }

    #[must_use]
    pub fn keywords_json(&self) -> String {
        serde_json::to_string(&self.keywords).unwrap_or_else(|_| "[]".to_string())
    }

    /// A 4-digit publication year, required for the title/author/year
    /// resolver rule (§4.3 step 3).
    #[must_use]
    pub fn four_digit_year(&self) -> Option<i64> {
        self.year.filter(|y| (1000..=9999).contains(y))
    }
}

/// Stage a row currently lives in; used by the merge log and by callers that
/// need to refer to "wherever this reference currently is".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Raw,
    Enriched,
    Downloaded,
    FailedEnrichment,
    FailedDownload,
}

impl Stage {
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Enriched => "enriched",
            Self::Downloaded => "downloaded",
            Self::FailedEnrichment => "failed_enrichment",
            Self::FailedDownload => "failed_download",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    None,
    Queued,
    InProgress,
    Failed,
    Succeeded,
}

impl DownloadState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        }
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "failed" => Ok(Self::Failed),
            "succeeded" => Ok(Self::Succeeded),
            other => Err(format!("invalid download_state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    Doi,
    OpenalexId,
    TitleAuthorsYear,
    AliasTitleYear,
}

impl MatchedField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::OpenalexId => "openalex_id",
            Self::TitleAuthorsYear => "title_authors_year",
            Self::AliasTitleYear => "alias_title_year",
        }
    }
}

/// The result of a resolver lookup: a collision with an existing row.
#[derive(Debug, Clone)]
pub struct Collision {
    pub stage: Stage,
    pub id: i64,
    pub field: MatchedField,
}
