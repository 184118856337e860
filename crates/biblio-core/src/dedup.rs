//! C3 — Dedup Resolver: decides whether a candidate collides with an existing
//! row in any of the three identity-bearing stages (§4.3).
//!
//! Resolution order (first hit wins): normalized DOI, OpenAlex id, the
//! `(title, authors, year)` triple, then the alias index with ±1 year
//! tolerance. Every check and the eventual insert happen inside the same
//! transaction the caller already opened, so the lookup-then-insert is
//! atomic per candidate (§5 "Ordering guarantees").

use sqlx::{Sqlite, Transaction};

use crate::model::{Collision, MatchedField, NormalizedKeys, Stage};

pub const IDENTITY_STAGES: [Stage; 3] = [Stage::Raw, Stage::Enriched, Stage::Downloaded];

/// Looks for a collision against `raw`, `enriched`, and `downloaded` using
/// the rules of §4.3. Does not touch the merge log — callers decide whether
/// and how to record the outcome (insert paths always do; pure lookups may
/// not need to).
pub async fn find_collision(
    tx: &mut Transaction<'_, Sqlite>,
    keys: &NormalizedKeys,
    openalex_id: Option<&str>,
    year: Option<i64>,
) -> sqlx::Result<Option<Collision>> {
    find_collision_in(tx, &IDENTITY_STAGES, keys, openalex_id, year).await
}

/// Same as [`find_collision`] but restricted to `stages` — used by the
/// promotion path, which must not match the `raw` row it is itself
/// promoting away.
pub async fn find_collision_in(
    tx: &mut Transaction<'_, Sqlite>,
    stages: &[Stage],
    keys: &NormalizedKeys,
    openalex_id: Option<&str>,
    year: Option<i64>,
) -> sqlx::Result<Option<Collision>> {
    // §4.3 is an `else if` ladder keyed on field presence, not a sequence of
    // independent checks: a candidate that has a DOI is resolved by rule 1
    // alone, whether or not that DOI matches anything — it must never fall
    // through to the triple/alias rules just because those fields also
    // happen to be populated (§9 "DOI present on one side, absent on the
    // other" is explicitly not a divergence to reconcile).
    if let Some(doi) = keys.normalized_doi.as_deref() {
        let hit = find_by_column(tx, stages, "normalized_doi", doi).await?;
        return Ok(hit.map(|(stage, id)| Collision { stage, id, field: MatchedField::Doi }));
    }

    if let Some(oa_id) = openalex_id {
        let hit = find_by_column(tx, stages, "openalex_id", oa_id).await?;
        return Ok(hit.map(|(stage, id)| Collision { stage, id, field: MatchedField::OpenalexId }));
    }

    if let (Some(title), Some(authors), Some(y)) =
        (keys.normalized_title.as_deref(), keys.normalized_authors.as_deref(), year)
    {
        if (1000..=9999).contains(&y) {
            let hit = find_by_triple(tx, stages, title, authors, y).await?;
            return Ok(hit.map(|(stage, id)| Collision { stage, id, field: MatchedField::TitleAuthorsYear }));
        }
    }

    if let (Some(title), Some(y)) = (keys.normalized_title.as_deref(), year) {
        let hit = find_by_alias(tx, stages, title, y).await?;
        return Ok(hit.map(|(stage, id)| Collision { stage, id, field: MatchedField::AliasTitleYear }));
    }

    Ok(None)
}

async fn find_by_column(
    tx: &mut Transaction<'_, Sqlite>,
    stages: &[Stage],
    column: &str,
    value: &str,
) -> sqlx::Result<Option<(Stage, i64)>> {
    for &stage in stages {
        let sql = format!("SELECT id FROM {} WHERE {column} = ? LIMIT 1", stage.table_name());
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&mut **tx)
            .await?;
        if let Some((id,)) = row {
            return Ok(Some((stage, id)));
        }
    }
    Ok(None)
}

async fn find_by_triple(
    tx: &mut Transaction<'_, Sqlite>,
    stages: &[Stage],
    normalized_title: &str,
    normalized_authors: &str,
    year: i64,
) -> sqlx::Result<Option<(Stage, i64)>> {
    for &stage in stages {
        let sql = format!(
            "SELECT id FROM {} WHERE normalized_title = ? AND normalized_authors = ? AND year = ? LIMIT 1",
            stage.table_name()
        );
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(normalized_title)
            .bind(normalized_authors)
            .bind(year)
            .fetch_optional(&mut **tx)
            .await?;
        if let Some((id,)) = row {
            return Ok(Some((stage, id)));
        }
    }
    Ok(None)
}

async fn find_by_alias(
    tx: &mut Transaction<'_, Sqlite>,
    stages: &[Stage],
    normalized_title: &str,
    year: i64,
) -> sqlx::Result<Option<(Stage, i64)>> {
    let row: Option<(String, i64)> = sqlx::query_as(
        "SELECT work_table, work_id FROM alias_index
         WHERE alias_title_normalized = ?
           AND (alias_year IS NULL OR ABS(alias_year - ?) <= 1)
         LIMIT 1",
    )
    .bind(normalized_title)
    .bind(year)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row
        .and_then(|(table, id)| table_to_stage(&table).map(|stage| (stage, id)))
        .filter(|(stage, _)| stages.contains(stage)))
}

fn table_to_stage(table: &str) -> Option<Stage> {
    match table {
        "raw" => Some(Stage::Raw),
        "enriched" => Some(Stage::Enriched),
        "downloaded" => Some(Stage::Downloaded),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::NewReference;

    async fn begin(db: &Database) -> Transaction<'_, Sqlite> {
        db.pool().begin().await.unwrap()
    }

    #[tokio::test]
    async fn no_collision_on_empty_store() {
        let db = Database::new_in_memory().await.unwrap();
        let mut tx = begin(&db).await;
        let candidate = NewReference {
            doi: Some("10.1234/x".to_string()),
            ..Default::default()
        };
        let keys = candidate.normalized_keys();
        let hit = find_collision(&mut tx, &keys, None, None).await.unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn alias_lookup_tolerates_one_year_drift() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO enriched (id, title) VALUES (1, 'Canonical Work')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO alias_index (work_table, work_id, alias_title_normalized, alias_year, relationship_type)
             VALUES ('enriched', 1, 'translatedtitle', 1950, 'translation')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let mut tx = begin(&db).await;
        let candidate = NewReference {
            title: Some("Translated Title".to_string()),
            year: Some(1951),
            ..Default::default()
        };
        let keys = candidate.normalized_keys();
        let hit = find_collision(&mut tx, &keys, None, candidate.year).await.unwrap();
        let hit = hit.expect("alias within +-1 year should match");
        assert_eq!(hit.id, 1);
        assert_eq!(hit.field, MatchedField::AliasTitleYear);
        drop(tx);

        let mut tx2 = begin(&db).await;
        let too_far = NewReference {
            title: Some("Translated Title".to_string()),
            year: Some(1953),
            ..Default::default()
        };
        let keys2 = too_far.normalized_keys();
        let miss = find_collision(&mut tx2, &keys2, None, too_far.year).await.unwrap();
        assert!(miss.is_none());
    }

    /// §9: a candidate carrying a DOI is resolved by rule 1 alone — a title/
    /// authors/year match against a DOI-less existing row must not reject it.
    #[tokio::test]
    async fn doi_present_candidate_is_not_rejected_by_triple_match() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO enriched (id, title, normalized_title, normalized_authors, year)
             VALUES (1, 'Economics', 'economics', 'smith', 2000)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let mut tx = begin(&db).await;
        let candidate = NewReference {
            title: Some("Economics".to_string()),
            authors: vec!["Smith".to_string()],
            year: Some(2000),
            doi: Some("10.5/new".to_string()),
            ..Default::default()
        };
        let keys = candidate.normalized_keys();
        let hit = find_collision(&mut tx, &keys, None, candidate.year).await.unwrap();
        assert!(hit.is_none(), "DOI rule applies exclusively once a DOI is present, even on a miss");
    }
}
