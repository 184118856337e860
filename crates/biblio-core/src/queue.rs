//! C8 — Download Queue: leased claim protocol over `enriched` rows whose
//! `download_state = 'queued'` (§4.8).
//!
//! `claim_batch` reclaims rows with an expired lease directly, in the same
//! `UPDATE ... RETURNING` as fresh `queued` rows, rather than relying solely
//! on a separate sweep — a crashed worker's rows become claimable the moment
//! another worker asks for work, not only after the next `release_expired_leases`
//! tick.

use sqlx::Row;

use crate::store::{EnrichedRow, Store};

#[derive(Debug, Clone, Copy)]
pub struct ClaimOptions {
    pub corpus_id: Option<i64>,
    pub limit: i64,
    pub lease_seconds: i64,
}

impl Store {
    /// Atomically claims up to `options.limit` rows for `worker_id`: rows
    /// already `queued`, or `in_progress` with an expired lease, ordered by
    /// `(download_priority, id)` ascending.
    pub async fn claim_batch(
        &self,
        worker_id: &str,
        options: ClaimOptions,
        now: i64,
    ) -> crate::error::Result<Vec<EnrichedRow>> {
        let lease_expires_at = now + options.lease_seconds;

        let mut tx = self.database().pool().begin().await?;

        let mut selector = sqlx::query_builder::QueryBuilder::new(
            "SELECT id FROM enriched WHERE (download_state = 'queued' OR (download_state = 'in_progress' AND download_lease_expires_at < ",
        );
        selector.push_bind(now);
        selector.push(")) ");
        if let Some(corpus_id) = options.corpus_id {
            selector.push("AND corpus_id = ");
            selector.push_bind(corpus_id);
            selector.push(" ");
        }
        selector.push("ORDER BY download_priority ASC, id ASC LIMIT ");
        selector.push_bind(options.limit);

        let candidate_ids: Vec<i64> = selector
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.get::<i64, _>("id"))
            .collect();

        if candidate_ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let mut claimed = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let row: Option<EnrichedRow> = sqlx::query_as(
                "UPDATE enriched SET
                    download_state = 'in_progress',
                    download_claimed_by = ?,
                    download_lease_expires_at = ?,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ? AND (download_state = 'queued' OR (download_state = 'in_progress' AND download_lease_expires_at < ?))
                 RETURNING *",
            )
            .bind(worker_id)
            .bind(lease_expires_at)
            .bind(id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                claimed.push(row);
            }
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// Sets every row whose lease has expired back to `queued` and clears
    /// its claim fields. Invoked periodically by the orchestrator; `claim_batch`
    /// already reclaims these rows on read, so this is a backstop for rows
    /// nobody is currently claiming against.
    pub async fn release_expired_leases(&self, now: i64) -> crate::error::Result<u64> {
        let result = sqlx::query(
            "UPDATE enriched SET
                download_state = 'queued',
                download_claimed_by = NULL,
                download_lease_expires_at = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE download_state = 'in_progress' AND download_lease_expires_at < ?",
        )
        .bind(now)
        .execute(self.database().pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// A claimed download attempt failed (§4.2): increments
    /// `download_attempt_count`, clears the claim, and sets `download_state
    /// = 'failed'`. Once the incremented count reaches `max_attempts` the row
    /// is moved permanently to `failed_download` instead.
    pub async fn fail_download(
        &self,
        enriched_id: i64,
        reason: &str,
        max_attempts: i64,
    ) -> crate::error::Result<FailOutcome> {
        let row = self.get_enriched(enriched_id).await?;
        let Some(row) = row else {
            return Ok(FailOutcome::NotFound);
        };

        let attempt_count = row.download_attempt_count + 1;
        if attempt_count >= max_attempts {
            self.fail_download_permanently(enriched_id, reason).await?;
            return Ok(FailOutcome::ExhaustedBudget);
        }

        sqlx::query(
            "UPDATE enriched SET
                download_state = 'failed',
                download_attempt_count = ?,
                download_claimed_by = NULL,
                download_lease_expires_at = NULL,
                status_notes = ?,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?",
        )
        .bind(attempt_count)
        .bind(reason)
        .bind(enriched_id)
        .execute(self.database().pool())
        .await?;

        Ok(FailOutcome::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Failed,
    ExhaustedBudget,
    NotFound,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::NewReference;
    use crate::store::{InsertOutcome, PromoteOutcome};

    async fn enqueued_row(store: &Store, title: &str, openalex_id: &str) -> i64 {
        let candidate = NewReference {
            title: Some(title.to_string()),
            openalex_id: Some(openalex_id.to_string()),
            ..Default::default()
        };
        let raw_id = match store.insert_raw(&candidate).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!(),
        };
        let enriched_id = match store.promote_to_enriched(raw_id, &candidate, None).await.unwrap() {
            PromoteOutcome::Promoted(id) => id,
            PromoteOutcome::Rejected(_) => panic!(),
        };
        store.enqueue_for_download(enriched_id, 0).await.unwrap();
        enriched_id
    }

    #[tokio::test]
    async fn claim_batch_claims_queued_rows_in_priority_order() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let low = enqueued_row(&store, "Low Priority", "W1").await;
        let _high = enqueued_row(&store, "High Priority", "W2").await;
        store.enqueue_for_download(low, 0).await.unwrap();

        let claimed = store
            .claim_batch("worker-1", ClaimOptions { corpus_id: None, limit: 1, lease_seconds: 60 }, 1_000)
            .await
            .unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, low);
        assert_eq!(claimed[0].download_claimed_by.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn claim_batch_reclaims_expired_lease() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let id = enqueued_row(&store, "Expiring Work", "W3").await;

        let first = store
            .claim_batch("worker-1", ClaimOptions { corpus_id: None, limit: 10, lease_seconds: 10 }, 1_000)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, id);

        // Lease expires at 1010; a claim attempt at 1011 should reclaim it
        // for a different worker without a separate sweep call.
        let second = store
            .claim_batch("worker-2", ClaimOptions { corpus_id: None, limit: 10, lease_seconds: 10 }, 1_011)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id);
        assert_eq!(second[0].download_claimed_by.as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn fail_download_requeues_until_budget_exhausted() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let id = enqueued_row(&store, "Flaky Download", "W4").await;
        let opts = ClaimOptions { corpus_id: None, limit: 10, lease_seconds: 60 };

        store.claim_batch("worker-1", opts, 0).await.unwrap();
        let outcome = store.fail_download(id, "timeout", 3).await.unwrap();
        assert_eq!(outcome, FailOutcome::Failed);
        let row = store.get_enriched(id).await.unwrap().unwrap();
        assert_eq!(row.download_state(), crate::model::DownloadState::Failed);
        assert_eq!(row.download_attempt_count, 1);

        assert!(store.enqueue_for_download(id, 0).await.unwrap());
        store.claim_batch("worker-1", opts, 0).await.unwrap();
        let outcome = store.fail_download(id, "timeout again", 3).await.unwrap();
        assert_eq!(outcome, FailOutcome::Failed);

        assert!(store.enqueue_for_download(id, 0).await.unwrap());
        store.claim_batch("worker-1", opts, 0).await.unwrap();
        let final_outcome = store.fail_download(id, "still failing", 3).await.unwrap();
        assert_eq!(final_outcome, FailOutcome::ExhaustedBudget);
        assert!(store.get_enriched(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_expired_leases_requeues_rows() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let id = enqueued_row(&store, "Stuck Work", "W5").await;
        store.claim_batch("worker-1", ClaimOptions { corpus_id: None, limit: 10, lease_seconds: 5 }, 0).await.unwrap();

        let released = store.release_expired_leases(100).await.unwrap();
        assert_eq!(released, 1);

        let row = store.get_enriched(id).await.unwrap().unwrap();
        assert_eq!(row.download_state(), crate::model::DownloadState::Queued);
        assert!(row.download_claimed_by.is_none());
    }
}
