//! `raw` stage: the landing zone every ingest path writes to before
//! enrichment (§3, §4.1 step 0).

use sqlx::{Sqlite, Transaction};

use crate::dedup;
use crate::model::{Collision, NewReference};

use super::merge_log::{self, MergeAction};
use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawRow {
    pub id: i64,
    pub title: Option<String>,
    pub authors: String,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub entry_type: Option<String>,
    pub source: Option<String>,
    pub ingest_source: Option<String>,
    pub corpus_id: Option<i64>,
    pub bibtex_entry_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Outcome of an insert attempt: either the new row id, or the collision the
/// resolver found (already recorded to the merge log as `rejected`).
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(i64),
    Rejected(Collision),
}

impl Store {
    /// Runs the candidate through the dedup resolver and, absent a
    /// collision, inserts it into `raw` with derived normalized keys. Single
    /// transaction: a collision found after the candidate's own uniqueness
    /// check still commits cleanly, it just writes a merge-log entry instead
    /// of a row.
    pub async fn insert_raw(&self, candidate: &NewReference) -> crate::error::Result<InsertOutcome> {
        let mut tx = self.database().pool().begin().await?;

        let keys = candidate.normalized_keys();
        let openalex_id = candidate.normalized_openalex_id();
        let year = candidate.four_digit_year();

        if let Some(collision) =
            dedup::find_collision(&mut tx, &keys, openalex_id.as_deref(), year).await?
        {
            let fingerprint = keys
                .normalized_doi
                .clone()
                .or_else(|| keys.normalized_title.clone())
                .unwrap_or_else(|| "unknown".to_string());
            merge_log::record(&mut tx, &fingerprint, &collision, MergeAction::Rejected).await?;
            tx.commit().await?;
            return Ok(InsertOutcome::Rejected(collision));
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO raw (
                title, authors, year, doi, openalex_id, entry_type, source,
                volume, issue, pages, publisher, url, isbn, issn, abstract_text,
                keywords, language, normalized_doi, normalized_title, normalized_authors,
                ingest_source, corpus_id, bibtex_entry_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&candidate.title)
        .bind(candidate.authors_json())
        .bind(candidate.year)
        .bind(&candidate.doi)
        .bind(&candidate.openalex_id)
        .bind(&candidate.entry_type)
        .bind(&candidate.source)
        .bind(&candidate.volume)
        .bind(&candidate.issue)
        .bind(&candidate.pages)
        .bind(&candidate.publisher)
        .bind(&candidate.url)
        .bind(&candidate.isbn)
        .bind(&candidate.issn)
        .bind(&candidate.abstract_text)
        .bind(candidate.keywords_json())
        .bind(&candidate.language)
        .bind(&keys.normalized_doi)
        .bind(&keys.normalized_title)
        .bind(&keys.normalized_authors)
        .bind(&candidate.ingest_source)
        .bind(candidate.corpus_id)
        .bind(&candidate.bibtex_entry_json)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(row.0))
    }

    pub async fn get_raw(&self, id: i64) -> crate::error::Result<Option<RawRow>> {
        let row = sqlx::query_as("SELECT * FROM raw WHERE id = ?")
            .bind(id)
            .fetch_optional(self.database().pool())
            .await?;
        Ok(row)
    }

    pub async fn list_raw(&self, limit: i64, offset: i64) -> crate::error::Result<Vec<RawRow>> {
        let rows = sqlx::query_as("SELECT * FROM raw ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows)
    }

    pub async fn count_raw(&self) -> crate::error::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw")
            .fetch_one(self.database().pool())
            .await?;
        Ok(row.0)
    }

    /// Moves a `raw` row to `failed_enrichment` when no enrichment match is
    /// found after every search strategy (§4.1). Deletes the source row so
    /// each reference lives in exactly one stage table at a time.
    pub async fn fail_enrichment(&self, raw_id: i64, reason: &str) -> crate::error::Result<()> {
        let mut tx = self.database().pool().begin().await?;
        move_raw_to_failed(&mut tx, raw_id, reason).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn move_raw_to_failed(
    tx: &mut Transaction<'_, Sqlite>,
    raw_id: i64,
    reason: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO failed_enrichment (
            title, authors, year, doi, entry_type, source, ingest_source,
            corpus_id, bibtex_entry_json, failure_reason
         )
         SELECT title, authors, year, doi, entry_type, source, ingest_source,
                corpus_id, bibtex_entry_json, ?
         FROM raw WHERE id = ?",
    )
    .bind(reason)
    .bind(raw_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM raw WHERE id = ?")
        .bind(raw_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn store() -> Store {
        Store::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn insert_raw_then_reject_duplicate_by_doi() {
        let store = store().await;
        let candidate = NewReference {
            title: Some("The Nature of the Firm".to_string()),
            doi: Some("10.1111/j.1468-0335.1937.tb00002.x".to_string()),
            year: Some(1937),
            ..Default::default()
        };

        let first = store.insert_raw(&candidate).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store.insert_raw(&candidate).await.unwrap();
        match second {
            InsertOutcome::Rejected(collision) => assert_eq!(collision.id, match first {
                InsertOutcome::Inserted(id) => id,
                InsertOutcome::Rejected(_) => unreachable!(),
            }),
            InsertOutcome::Inserted(_) => panic!("expected duplicate to be rejected"),
        }

        assert_eq!(store.count_raw().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fail_enrichment_moves_row_out_of_raw() {
        let store = store().await;
        let candidate = NewReference {
            title: Some("Obscure Work".to_string()),
            ..Default::default()
        };
        let id = match store.insert_raw(&candidate).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!("fresh candidate should not collide"),
        };

        store.fail_enrichment(id, "no candidate above acceptance threshold").await.unwrap();

        assert!(store.get_raw(id).await.unwrap().is_none());
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM failed_enrichment")
            .fetch_one(store.database().pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
