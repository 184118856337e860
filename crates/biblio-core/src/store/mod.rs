//! C2 — Stage Store: the only code path allowed to mutate stage tables.
//!
//! Every method here is a single transaction. Inserts go through the dedup
//! resolver (`crate::dedup`) first; a collision is reported back to the
//! caller as [`crate::model::Collision`] rather than silently dropped, and is
//! always recorded in the merge log (§4.3).

mod corpus;
mod downloaded;
mod enriched;
mod failed;
mod merge_log;
mod raw;

pub use corpus::{Corpus, CorpusItem, IngestRun, SearchResultRow};
pub use downloaded::DownloadedRow;
pub use enriched::{EnrichedRow, PromoteOutcome};
pub use failed::{FailedDownloadRow, FailedEnrichmentRow};
pub use merge_log::MergeLogRow;
pub use raw::{InsertOutcome, RawRow};

use crate::db::Database;

/// Handle shared by every stage-table operation. Cheap to clone (wraps a
/// pooled connection), so callers pass it around by value the way the
/// teacher's `Queue`/`Database` types are passed around.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}
