//! C4 — Alias Index: known-equivalent titles (translations, reprints,
//! preprints, errata) keyed to a canonical row, consulted by the dedup
//! resolver as its last-resort rule (§4.3 step 4).

use crate::model::Stage;
use crate::normalize::normalize_title;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipType {
    Translation,
    Reprint,
    PreprintOf,
    ErrataOf,
    Other,
}

impl RelationshipType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Reprint => "reprint",
            Self::PreprintOf => "preprint_of",
            Self::ErrataOf => "errata_of",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AliasRow {
    pub id: i64,
    pub work_table: String,
    pub work_id: i64,
    pub alias_title_normalized: String,
    pub alias_year: Option<i64>,
    pub alias_language: Option<String>,
    pub relationship_type: String,
}

impl Store {
    /// Registers `alias_title` as equivalent to the canonical row
    /// `(stage, work_id)`. Titles are normalized the same way stage tables
    /// are, so alias lookups use the same comparison the resolver's other
    /// rules use.
    pub async fn add_alias(
        &self,
        stage: Stage,
        work_id: i64,
        alias_title: &str,
        alias_year: Option<i64>,
        alias_language: Option<&str>,
        relationship_type: RelationshipType,
    ) -> crate::error::Result<i64> {
        let normalized = normalize_title(alias_title)
            .ok_or_else(|| crate::error::PipelineError::Validation("alias title is empty".to_string()))?;

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO alias_index (work_table, work_id, alias_title_normalized, alias_year, alias_language, relationship_type)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(stage.table_name())
        .bind(work_id)
        .bind(&normalized)
        .bind(alias_year)
        .bind(alias_language)
        .bind(relationship_type.as_str())
        .fetch_one(self.database().pool())
        .await?;

        Ok(row.0)
    }

    pub async fn list_aliases_for(&self, stage: Stage, work_id: i64) -> crate::error::Result<Vec<AliasRow>> {
        let rows = sqlx::query_as(
            "SELECT * FROM alias_index WHERE work_table = ? AND work_id = ? ORDER BY id",
        )
        .bind(stage.table_name())
        .bind(work_id)
        .fetch_all(self.database().pool())
        .await?;
        Ok(rows)
    }
}
