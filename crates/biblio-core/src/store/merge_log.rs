//! Append-only record of every dedup decision (§3 "Merge log").

use sqlx::{Sqlite, Transaction};

use crate::model::{Collision, MatchedField, Stage};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MergeLogRow {
    pub id: i64,
    pub created_at: String,
    pub incoming_fingerprint: String,
    pub matched_stage: String,
    pub matched_id: i64,
    pub matched_field: String,
    pub action: String,
}

/// What happened to the incoming candidate. `Rejected` means the resolver
/// found a collision and the candidate was not inserted anywhere; `Promoted`
/// and `Merged` are recorded by the enrichment/expansion paths that move a
/// row between stages or fold alias information into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Rejected,
    Promoted,
    Merged,
}

impl MergeAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Promoted => "promoted",
            Self::Merged => "merged",
        }
    }
}

/// Records a dedup outcome inside the caller's transaction. `fingerprint` is
/// whatever the caller considers the best identifier for the incoming
/// candidate (normalized DOI, else normalized title, else a literal
/// `"unknown"`) — it is for audit purposes only, never matched on.
pub async fn record(
    tx: &mut Transaction<'_, Sqlite>,
    fingerprint: &str,
    collision: &Collision,
    action: MergeAction,
) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO merge_log (incoming_fingerprint, matched_stage, matched_id, matched_field, action)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(fingerprint)
    .bind(collision.stage.table_name())
    .bind(collision.id)
    .bind(collision.field.as_str())
    .bind(action.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.0)
}

pub async fn list(tx: &mut Transaction<'_, Sqlite>, limit: i64) -> sqlx::Result<Vec<MergeLogRow>> {
    sqlx::query_as("SELECT * FROM merge_log ORDER BY id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
}

fn parse_stage(name: &str) -> Option<Stage> {
    match name {
        "raw" => Some(Stage::Raw),
        "enriched" => Some(Stage::Enriched),
        "downloaded" => Some(Stage::Downloaded),
        "failed_enrichment" => Some(Stage::FailedEnrichment),
        "failed_download" => Some(Stage::FailedDownload),
        _ => None,
    }
}

fn parse_field(name: &str) -> Option<MatchedField> {
    match name {
        "doi" => Some(MatchedField::Doi),
        "openalex_id" => Some(MatchedField::OpenalexId),
        "title_authors_year" => Some(MatchedField::TitleAuthorsYear),
        "alias_title_year" => Some(MatchedField::AliasTitleYear),
        _ => None,
    }
}

impl MergeLogRow {
    /// Reconstructs the [`Collision`] this entry recorded, if its stage/field
    /// strings are still recognized values.
    #[must_use]
    pub fn collision(&self) -> Option<Collision> {
        Some(Collision {
            stage: parse_stage(&self.matched_stage)?,
            id: self.matched_id,
            field: parse_field(&self.matched_field)?,
        })
    }
}
