//! Corpora (named groupings of references, §3 "corpus") and search-run
//! bookkeeping (§4.1 "keyword search" persists its run and raw results
//! before any enrichment attempt).

use super::Store;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Corpus {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CorpusItem {
    pub corpus_id: i64,
    pub table_name: String,
    pub row_id: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IngestRun {
    pub id: i64,
    pub query: Option<String>,
    pub source_pdf: Option<String>,
    pub filters_json: Option<String>,
    pub started_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SearchResultRow {
    pub id: i64,
    pub run_id: i64,
    pub openalex_id: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub raw_json: Option<String>,
}

impl Store {
    pub async fn get_or_create_corpus(&self, name: &str) -> crate::error::Result<Corpus> {
        if let Some(existing) = self.get_corpus_by_name(name).await? {
            return Ok(existing);
        }

        let row: (i64,) = sqlx::query_as("INSERT INTO corpus (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(self.database().pool())
            .await?;

        Ok(self
            .get_corpus_by_name(name)
            .await?
            .unwrap_or(Corpus { id: row.0, name: name.to_string(), created_at: String::new() }))
    }

    pub async fn get_corpus_by_name(&self, name: &str) -> crate::error::Result<Option<Corpus>> {
        let row = sqlx::query_as("SELECT * FROM corpus WHERE name = ?")
            .bind(name)
            .fetch_optional(self.database().pool())
            .await?;
        Ok(row)
    }

    /// Associates a stage-table row with a corpus. Idempotent: re-adding the
    /// same `(corpus, table, row)` triple is a no-op thanks to the unique
    /// index.
    pub async fn add_to_corpus(
        &self,
        corpus_id: i64,
        table_name: &str,
        row_id: i64,
    ) -> crate::error::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO corpus_items (corpus_id, table_name, row_id) VALUES (?, ?, ?)")
            .bind(corpus_id)
            .bind(table_name)
            .bind(row_id)
            .execute(self.database().pool())
            .await?;
        Ok(())
    }

    pub async fn list_corpus_items(&self, corpus_id: i64) -> crate::error::Result<Vec<CorpusItem>> {
        let rows = sqlx::query_as("SELECT * FROM corpus_items WHERE corpus_id = ? ORDER BY table_name, row_id")
            .bind(corpus_id)
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows)
    }

    /// Records a keyword-search run before the API call is made, so a crash
    /// mid-search still leaves an audit trail of what was attempted.
    pub async fn start_ingest_run(
        &self,
        query: Option<&str>,
        source_pdf: Option<&str>,
        filters_json: Option<&str>,
    ) -> crate::error::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO ingest_run (query, source_pdf, filters_json) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(query)
        .bind(source_pdf)
        .bind(filters_json)
        .fetch_one(self.database().pool())
        .await?;
        Ok(row.0)
    }

    /// Persists a raw search hit against its run without enqueuing it for
    /// enrichment — used when a keyword search is run in preview mode.
    pub async fn record_search_result(
        &self,
        run_id: i64,
        openalex_id: Option<&str>,
        doi: Option<&str>,
        title: Option<&str>,
        year: Option<i64>,
        raw_json: Option<&str>,
    ) -> crate::error::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO search_results (run_id, openalex_id, doi, title, year, raw_json)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(run_id)
        .bind(openalex_id)
        .bind(doi)
        .bind(title)
        .bind(year)
        .bind(raw_json)
        .fetch_one(self.database().pool())
        .await?;
        Ok(row.0)
    }

    pub async fn list_search_results(&self, run_id: i64) -> crate::error::Result<Vec<SearchResultRow>> {
        let rows = sqlx::query_as("SELECT * FROM search_results WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn get_or_create_corpus_is_idempotent() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let a = store.get_or_create_corpus("economics-canon").await.unwrap();
        let b = store.get_or_create_corpus("economics-canon").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn search_run_and_results_round_trip() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let run_id = store
            .start_ingest_run(Some("transaction cost economics"), None, None)
            .await
            .unwrap();
        store
            .record_search_result(run_id, Some("W1"), None, Some("The Nature of the Firm"), Some(1937), None)
            .await
            .unwrap();

        let results = store.list_search_results(run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title.as_deref(), Some("The Nature of the Firm"));
    }
}
