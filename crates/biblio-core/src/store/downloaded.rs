//! `downloaded` stage: a reference with a local PDF on disk (§4.4 terminal
//! success state).

use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DownloadedRow {
    pub id: i64,
    pub title: Option<String>,
    pub authors: String,
    pub year: Option<i64>,
    pub doi: Option<String>,
    pub openalex_id: Option<String>,
    pub corpus_id: Option<i64>,
    pub download_attempt_count: i64,
    pub file_path: String,
    pub checksum_pdf: String,
    pub download_source: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Store {
    /// Moves an `enriched` row into `downloaded` once its PDF is on disk and
    /// checksummed (§4.4). Deletes the source row; a reference lives in
    /// exactly one stage table at a time.
    pub async fn complete_download(
        &self,
        enriched_id: i64,
        file_path: &str,
        checksum_pdf: &str,
    ) -> crate::error::Result<i64> {
        let mut tx = self.database().pool().begin().await?;

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO downloaded (
                title, authors, year, doi, openalex_id, entry_type, source,
                volume, issue, pages, publisher, url, isbn, issn, abstract_text,
                keywords, language, normalized_doi, normalized_title, normalized_authors,
                ingest_source, corpus_id, bibtex_entry_json, download_state,
                download_attempt_count, file_path, checksum_pdf, download_source
             )
             SELECT
                title, authors, year, doi, openalex_id, entry_type, source,
                volume, issue, pages, publisher, url, isbn, issn, abstract_text,
                keywords, language, normalized_doi, normalized_title, normalized_authors,
                ingest_source, corpus_id, bibtex_entry_json, 'succeeded',
                download_attempt_count, ?, ?, download_source
             FROM enriched WHERE id = ?
             RETURNING id",
        )
        .bind(file_path)
        .bind(checksum_pdf)
        .bind(enriched_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM enriched WHERE id = ?")
            .bind(enriched_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.0)
    }

    pub async fn get_downloaded(&self, id: i64) -> crate::error::Result<Option<DownloadedRow>> {
        let row = sqlx::query_as("SELECT * FROM downloaded WHERE id = ?")
            .bind(id)
            .fetch_optional(self.database().pool())
            .await?;
        Ok(row)
    }

    pub async fn list_downloaded(&self, limit: i64, offset: i64) -> crate::error::Result<Vec<DownloadedRow>> {
        let rows = sqlx::query_as("SELECT * FROM downloaded ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows)
    }
}
