//! `enriched` stage: rows that matched an external catalog record (§4.1,
//! §4.2) and are now eligible for the download queue.

use sqlx::{Sqlite, Transaction};

use crate::dedup;
use crate::model::{Collision, DownloadState, NewReference, Stage};

use super::merge_log::{self, MergeAction};
use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrichedRow {
    pub id: i64,
    pub title: Option<String>,
    pub authors: String,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub corpus_id: Option<i64>,
    pub download_state: String,
    pub download_attempt_count: i64,
    pub download_claimed_by: Option<String>,
    pub download_lease_expires_at: Option<i64>,
    pub download_priority: i64,
    pub status_notes: Option<String>,
    pub file_path: Option<String>,
    pub checksum_pdf: Option<String>,
    pub download_source: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl EnrichedRow {
    #[must_use]
    pub fn download_state(&self) -> DownloadState {
        self.download_state.parse().unwrap_or(DownloadState::None)
    }
}

#[derive(Debug, Clone)]
pub enum PromoteOutcome {
    Promoted(i64),
    Rejected(Collision),
}

impl Store {
    /// Merges the matched external record into the `raw` candidate and moves
    /// the result into `enriched`. Collisions are checked only against
    /// `enriched`/`downloaded` — the source row being promoted would
    /// trivially collide with itself if `raw` were included.
    pub async fn promote_to_enriched(
        &self,
        raw_id: i64,
        matched: &NewReference,
        download_source: Option<&str>,
    ) -> crate::error::Result<PromoteOutcome> {
        let mut tx = self.database().pool().begin().await?;

        let keys = matched.normalized_keys();
        let openalex_id = matched.normalized_openalex_id();
        let year = matched.four_digit_year();

        let downstream_stages = [Stage::Enriched, Stage::Downloaded];
        if let Some(collision) =
            dedup::find_collision_in(&mut tx, &downstream_stages, &keys, openalex_id.as_deref(), year)
                .await?
        {
            let fingerprint = keys
                .normalized_doi
                .clone()
                .or_else(|| keys.normalized_title.clone())
                .unwrap_or_else(|| "unknown".to_string());
            merge_log::record(&mut tx, &fingerprint, &collision, MergeAction::Merged).await?;
            sqlx::query("DELETE FROM raw WHERE id = ?")
                .bind(raw_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(PromoteOutcome::Rejected(collision));
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO enriched (
                title, authors, year, doi, openalex_id, entry_type, source,
                volume, issue, pages, publisher, url, isbn, issn, abstract_text,
                keywords, language, normalized_doi, normalized_title, normalized_authors,
                ingest_source, corpus_id, bibtex_entry_json, download_source
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&matched.title)
        .bind(matched.authors_json())
        .bind(matched.year)
        .bind(&matched.doi)
        .bind(&matched.openalex_id)
        .bind(&matched.entry_type)
        .bind(&matched.source)
        .bind(&matched.volume)
        .bind(&matched.issue)
        .bind(&matched.pages)
        .bind(&matched.publisher)
        .bind(&matched.url)
        .bind(&matched.isbn)
        .bind(&matched.issn)
        .bind(&matched.abstract_text)
        .bind(matched.keywords_json())
        .bind(&matched.language)
        .bind(&keys.normalized_doi)
        .bind(&keys.normalized_title)
        .bind(&keys.normalized_authors)
        .bind(&matched.ingest_source)
        .bind(matched.corpus_id)
        .bind(&matched.bibtex_entry_json)
        .bind(download_source)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM raw WHERE id = ?")
            .bind(raw_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(PromoteOutcome::Promoted(row.0))
    }

    /// Inserts a reference-expansion stub (title + `openalex_id`, other
    /// fields null) directly into `enriched`, going through the same
    /// collision check `promote_to_enriched` uses. Unlike promotion there is
    /// no source `raw` row to delete — the stub either lands fresh or is
    /// recognized as already present (§4.7).
    pub async fn insert_stub(&self, stub: &NewReference) -> crate::error::Result<PromoteOutcome> {
        let mut tx = self.database().pool().begin().await?;

        let keys = stub.normalized_keys();
        let openalex_id = stub.normalized_openalex_id();
        let year = stub.four_digit_year();

        let downstream_stages = [Stage::Enriched, Stage::Downloaded];
        if let Some(collision) =
            dedup::find_collision_in(&mut tx, &downstream_stages, &keys, openalex_id.as_deref(), year)
                .await?
        {
            let fingerprint = keys
                .normalized_doi
                .clone()
                .or_else(|| keys.normalized_title.clone())
                .unwrap_or_else(|| "unknown".to_string());
            merge_log::record(&mut tx, &fingerprint, &collision, MergeAction::Rejected).await?;
            tx.commit().await?;
            return Ok(PromoteOutcome::Rejected(collision));
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO enriched (
                title, authors, year, doi, openalex_id, entry_type, source,
                normalized_doi, normalized_title, normalized_authors,
                ingest_source, corpus_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&stub.title)
        .bind(stub.authors_json())
        .bind(stub.year)
        .bind(&stub.doi)
        .bind(&stub.openalex_id)
        .bind(&stub.entry_type)
        .bind(&stub.source)
        .bind(&keys.normalized_doi)
        .bind(&keys.normalized_title)
        .bind(&keys.normalized_authors)
        .bind(&stub.ingest_source)
        .bind(stub.corpus_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PromoteOutcome::Promoted(row.0))
    }

    /// Marks an enriched row eligible for the download queue. A no-op
    /// precondition: only rows in `none` or `failed` may be (re-)queued.
    pub async fn enqueue_for_download(&self, id: i64, priority: i64) -> crate::error::Result<bool> {
        let result = sqlx::query(
            "UPDATE enriched SET download_state = 'queued', download_priority = ?,
                                  updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ? AND download_state IN ('none', 'failed')",
        )
        .bind(priority)
        .bind(id)
        .execute(self.database().pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_enriched(&self, id: i64) -> crate::error::Result<Option<EnrichedRow>> {
        let row = sqlx::query_as("SELECT * FROM enriched WHERE id = ?")
            .bind(id)
            .fetch_optional(self.database().pool())
            .await?;
        Ok(row)
    }

    pub async fn list_enriched_by_state(
        &self,
        state: DownloadState,
        limit: i64,
    ) -> crate::error::Result<Vec<EnrichedRow>> {
        let rows = sqlx::query_as(
            "SELECT * FROM enriched WHERE download_state = ? ORDER BY download_priority DESC, id LIMIT ?",
        )
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(self.database().pool())
        .await?;
        Ok(rows)
    }

    /// Candidates for `backfill-edges` (§4.9 maintenance op): enriched rows
    /// that carry an external id to re-query but may predate the citation
    /// edge table, or were enriched before C7 existed.
    pub async fn list_enriched_with_openalex_id(&self, limit: i64) -> crate::error::Result<Vec<EnrichedRow>> {
        let rows = sqlx::query_as(
            "SELECT * FROM enriched WHERE openalex_id IS NOT NULL ORDER BY id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.database().pool())
        .await?;
        Ok(rows)
    }
}

#[allow(dead_code)]
pub(crate) async fn touch(tx: &mut Transaction<'_, Sqlite>, id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE enriched SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::raw::InsertOutcome;

    async fn store() -> Store {
        Store::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn promote_then_enqueue() {
        let store = store().await;
        let candidate = NewReference {
            title: Some("A Theory of Justice".to_string()),
            ..Default::default()
        };
        let raw_id = match store.insert_raw(&candidate).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!("fresh candidate should not collide"),
        };

        let matched = NewReference {
            title: Some("A Theory of Justice".to_string()),
            openalex_id: Some("W123456789".to_string()),
            year: Some(1971),
            ..Default::default()
        };
        let enriched_id = match store.promote_to_enriched(raw_id, &matched, Some("openalex")).await.unwrap() {
            PromoteOutcome::Promoted(id) => id,
            PromoteOutcome::Rejected(_) => panic!("first promotion should not collide"),
        };

        assert!(store.get_raw(raw_id).await.unwrap().is_none());
        let row = store.get_enriched(enriched_id).await.unwrap().unwrap();
        assert_eq!(row.download_state(), DownloadState::None);

        assert!(store.enqueue_for_download(enriched_id, 5).await.unwrap());
        let requeued = store.get_enriched(enriched_id).await.unwrap().unwrap();
        assert_eq!(requeued.download_state(), DownloadState::Queued);
        assert_eq!(requeued.download_priority, 5);
    }

    #[tokio::test]
    async fn promote_rejects_when_openalex_id_already_enriched() {
        // Both candidates land in `raw` unmatched (distinct titles, no
        // openalex_id yet), so insert-time dedup sees no collision. Only
        // once enrichment independently resolves both to the same external
        // id does the promotion path need to catch the clash.
        let store = store().await;
        let first = NewReference {
            title: Some("First Edition Title".to_string()),
            ..Default::default()
        };
        let raw1 = match store.insert_raw(&first).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!(),
        };
        let second = NewReference {
            title: Some("Second Edition Title".to_string()),
            ..Default::default()
        };
        let raw2 = match store.insert_raw(&second).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!(),
        };

        let matched = NewReference {
            title: Some("Canonical Title".to_string()),
            openalex_id: Some("W1".to_string()),
            ..Default::default()
        };
        store.promote_to_enriched(raw1, &matched, None).await.unwrap();

        let outcome = store.promote_to_enriched(raw2, &matched, None).await.unwrap();
        assert!(matches!(outcome, PromoteOutcome::Rejected(_)));
        assert!(store.get_raw(raw2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_stub_then_reject_duplicate_stub() {
        let store = store().await;
        let stub = NewReference {
            title: Some("Referenced Work".to_string()),
            openalex_id: Some("W9".to_string()),
            ..Default::default()
        };
        let first = match store.insert_stub(&stub).await.unwrap() {
            PromoteOutcome::Promoted(id) => id,
            PromoteOutcome::Rejected(_) => panic!(),
        };
        assert!(store.get_enriched(first).await.unwrap().is_some());

        let outcome = store.insert_stub(&stub).await.unwrap();
        assert!(matches!(outcome, PromoteOutcome::Rejected(_)));
    }
}
