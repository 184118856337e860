//! Terminal failure stages: `failed_enrichment` (see `raw.rs::fail_enrichment`)
//! and `failed_download`, reached once the download retry budget is
//! exhausted (§4.4, §6 "download retry policy").

use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FailedEnrichmentRow {
    pub id: i64,
    pub title: Option<String>,
    pub authors: String,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub corpus_id: Option<i64>,
    pub failure_reason: String,
    pub failed_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FailedDownloadRow {
    pub id: i64,
    pub title: Option<String>,
    pub authors: String,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub corpus_id: Option<i64>,
    pub download_attempt_count: i64,
    pub failure_reason: String,
    pub failed_at: String,
}

impl Store {
    /// Moves an `enriched` row into `failed_download` once its retry budget
    /// is exhausted. Deletes the source row.
    pub async fn fail_download_permanently(
        &self,
        enriched_id: i64,
        reason: &str,
    ) -> crate::error::Result<()> {
        let mut tx = self.database().pool().begin().await?;

        sqlx::query(
            "INSERT INTO failed_download (
                title, authors, year, doi, openalex_id, corpus_id,
                download_attempt_count, failure_reason
             )
             SELECT title, authors, year, doi, openalex_id, corpus_id,
                    download_attempt_count, ?
             FROM enriched WHERE id = ?",
        )
        .bind(reason)
        .bind(enriched_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM enriched WHERE id = ?")
            .bind(enriched_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_failed_enrichment(&self, limit: i64) -> crate::error::Result<Vec<FailedEnrichmentRow>> {
        let rows = sqlx::query_as("SELECT * FROM failed_enrichment ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows)
    }

    pub async fn list_failed_download(&self, limit: i64) -> crate::error::Result<Vec<FailedDownloadRow>> {
        let rows = sqlx::query_as("SELECT * FROM failed_download ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows)
    }
}
