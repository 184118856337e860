//! Pipeline-wide error classification (see SPEC_FULL.md §7).
//!
//! Every fallible pipeline operation returns one of these seven categories so
//! callers (the orchestrator, the CLI) can decide what is fatal to a batch and
//! what is simply a per-row outcome to count and move past.

use thiserror::Error;

use crate::db::DbError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing required fields on ingest; the row was never inserted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Not fatal: the resolver found a collision and logged it to the merge log.
    #[error("duplicate of {stage}:{id} (matched on {field})")]
    Duplicate {
        stage: String,
        id: i64,
        field: String,
    },

    /// Timeout, 5xx, or 429 from an external API; treated as "no result" for
    /// the step that hit it, never fatal to the surrounding batch.
    #[error("transient external error calling {endpoint}: {message}")]
    TransientExternal { endpoint: String, message: String },

    /// 4xx (other than 429) or a malformed response; the step yields nothing.
    #[error("terminal external error calling {endpoint}: {message}")]
    TerminalExternal { endpoint: String, message: String },

    /// No acceptable enrichment candidate after every search strategy.
    #[error("no enrichment match found")]
    EnrichmentMiss,

    /// Download attempt failed; caller decides whether the retry budget allows another try.
    #[error("download failed: {0}")]
    DownloadFailure(String),

    /// Foreign-key or uniqueness violation the resolver should have prevented.
    /// Always a bug — never suppressed, transaction rolled back.
    #[error("store integrity violation: {0}")]
    StoreIntegrity(#[from] sqlx::Error),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
