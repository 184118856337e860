//! Bibliographic Acquisition Pipeline — Core Library
//!
//! This library turns an unstructured pile of bibliographic candidates (from
//! PDF extraction, BibTeX files, or keyword search) into a deduplicated,
//! enriched, downloaded catalog, tracking every row through the stages
//! `raw → enriched → downloaded` (or a terminal failure bucket) with an
//! append-only merge log recording every dedup decision along the way.
//!
//! # Architecture
//!
//! - [`db`] — database connection, WAL mode, migrations
//! - [`bibtex`] — `.bib` file parsing into ingest candidates
//! - [`store`] — the only code path allowed to mutate stage tables
//! - [`dedup`] — resolver consulted by every insert/promote path
//! - [`alias`] — known-equivalent title/year index (translations, reprints)
//! - [`rate_limiter`] — per-endpoint request/token budget enforcement
//! - [`enrich`] — OpenAlex/Crossref search cascade and author-name matching
//! - [`expand`] — citation-neighborhood fan-out from a matched work
//! - [`queue`] — leased claim protocol over the download queue
//! - [`edges`] — append-only citation-edge table and graph-slice retrieval
//! - [`orchestrator`] — drives stage transitions, batches, cancellation
//! - [`pdf_resolver`] — external PDF-location collaborator boundary
//! - [`pdf_extractor`] — external PDF-text-extraction collaborator boundary
//! - [`normalize`] — DOI/title/author-name canonicalization
//! - [`model`] — the common reference shape shared by every stage table
//! - [`error`] — the seven pipeline error categories

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alias;
pub mod bibtex;
pub mod db;
pub mod dedup;
pub mod edges;
pub mod enrich;
pub mod error;
pub mod expand;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod pdf_extractor;
pub mod pdf_resolver;
pub mod queue;
pub mod rate_limiter;
pub mod store;

// Re-export commonly used types
pub use bibtex::{parse_bibtex, BibtexParseResult, SkippedEntry};
pub use db::Database;
pub use edges::{EdgeKind, EdgeRow, GraphSlice};
pub use enrich::EnrichmentMatcher;
pub use error::{PipelineError, Result};
pub use expand::{ExpandOptions, ExpandStats, ReferenceExpander};
pub use model::{Collision, DownloadState, MatchedField, NewReference, Stage};
pub use orchestrator::{BackfillStats, BatchCounters, FetchedPdf, Orchestrator, PdfFetcher};
pub use pdf_extractor::PdfExtractor;
pub use pdf_resolver::{DirectUrlResolver, PdfResolver, ResolvedPdf};
pub use queue::{ClaimOptions, FailOutcome};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use store::{
    Corpus, CorpusItem, DownloadedRow, EnrichedRow, FailedDownloadRow, FailedEnrichmentRow,
    IngestRun, InsertOutcome, MergeLogRow, PromoteOutcome, RawRow, SearchResultRow, Store,
};
