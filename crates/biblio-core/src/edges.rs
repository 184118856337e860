//! C9 — Citation-Edge Recorder: append-only `citation_edges` triples and the
//! bounded-BFS slice used for graph export (§4.9).

use std::collections::{HashSet, VecDeque};

use sqlx::FromRow;

use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    References,
    CitedBy,
}

impl EdgeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::References => "references",
            EdgeKind::CitedBy => "cited_by",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EdgeRow {
    pub id: i64,
    pub source_openalex_id: String,
    pub target_openalex_id: String,
    pub relationship_type: String,
}

#[derive(Debug, Clone)]
pub struct GraphSlice {
    pub nodes: Vec<String>,
    pub edges: Vec<EdgeRow>,
}

impl Store {
    /// Inserts one edge per `(source, target)` pair, ignoring rows that
    /// already exist under the table's unique constraint (§4.9 "idempotent
    /// backfill").
    pub async fn record_edges(
        &self,
        source_openalex_id: &str,
        targets: &[String],
        kind: EdgeKind,
    ) -> crate::error::Result<u64> {
        let mut inserted = 0u64;
        let mut tx = self.database().pool().begin().await?;
        for target in targets {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO citation_edges (source_openalex_id, target_openalex_id, relationship_type)
                 VALUES (?, ?, ?)",
            )
            .bind(source_openalex_id)
            .bind(target)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn edges_from(&self, source_openalex_id: &str) -> crate::error::Result<Vec<EdgeRow>> {
        let rows = sqlx::query_as(
            "SELECT id, source_openalex_id, target_openalex_id, relationship_type
             FROM citation_edges WHERE source_openalex_id = ?",
        )
        .bind(source_openalex_id)
        .fetch_all(self.database().pool())
        .await?;
        Ok(rows)
    }

    /// Breadth-first slice of the citation graph, seeded from the corpus's
    /// enriched rows with the highest in-degree so a bounded export still
    /// surfaces the most connected part of the graph first.
    pub async fn graph_slice(
        &self,
        corpus_id: Option<i64>,
        relationship_filter: Option<EdgeKind>,
        year_filter: Option<i64>,
        node_limit: i64,
    ) -> crate::error::Result<GraphSlice> {
        let seeds = self.seed_nodes(corpus_id, year_filter, node_limit).await?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = seeds.into_iter().collect();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut seen_edge_ids = HashSet::new();

        while let Some(node) = queue.pop_front() {
            if visited.contains(&node) || nodes.len() as i64 >= node_limit {
                continue;
            }
            visited.insert(node.clone());
            nodes.push(node.clone());

            let mut candidates: Vec<EdgeRow> = self.edges_from(&node).await?;
            if let Some(filter) = relationship_filter {
                candidates.retain(|e| e.relationship_type == filter.as_str());
            }

            for edge in candidates {
                if seen_edge_ids.insert(edge.id) {
                    if !visited.contains(&edge.target_openalex_id) {
                        queue.push_back(edge.target_openalex_id.clone());
                    }
                    edges.push(edge);
                }
            }
        }

        Ok(GraphSlice { nodes, edges })
    }

    async fn seed_nodes(
        &self,
        corpus_id: Option<i64>,
        year_filter: Option<i64>,
        limit: i64,
    ) -> crate::error::Result<Vec<String>> {
        let mut builder = sqlx::query_builder::QueryBuilder::new(
            "SELECT e.openalex_id AS id, COUNT(c.id) AS degree
             FROM enriched e
             LEFT JOIN citation_edges c ON c.source_openalex_id = e.openalex_id OR c.target_openalex_id = e.openalex_id
             WHERE e.openalex_id IS NOT NULL ",
        );
        if let Some(corpus_id) = corpus_id {
            builder.push("AND e.corpus_id = ");
            builder.push_bind(corpus_id);
            builder.push(" ");
        }
        if let Some(year) = year_filter {
            builder.push("AND e.year = ");
            builder.push_bind(year);
            builder.push(" ");
        }
        builder.push("GROUP BY e.openalex_id ORDER BY degree DESC LIMIT ");
        builder.push_bind(limit);

        let rows: Vec<(String, i64)> = builder
            .build_query_as()
            .fetch_all(self.database().pool())
            .await?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::NewReference;
    use crate::store::{InsertOutcome, PromoteOutcome};

    async fn enriched_with_openalex_id(store: &Store, title: &str, id: &str) {
        let candidate = NewReference {
            title: Some(title.to_string()),
            openalex_id: Some(id.to_string()),
            ..Default::default()
        };
        let raw_id = match store.insert_raw(&candidate).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Rejected(_) => panic!(),
        };
        match store.promote_to_enriched(raw_id, &candidate, None).await.unwrap() {
            PromoteOutcome::Promoted(_) => {}
            PromoteOutcome::Rejected(_) => panic!(),
        }
    }

    #[tokio::test]
    async fn record_edges_is_idempotent() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let targets = vec!["W2".to_string(), "W3".to_string()];
        let first = store.record_edges("W1", &targets, EdgeKind::References).await.unwrap();
        assert_eq!(first, 2);
        let second = store.record_edges("W1", &targets, EdgeKind::References).await.unwrap();
        assert_eq!(second, 0);

        let edges = store.edges_from("W1").await.unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[tokio::test]
    async fn graph_slice_walks_outward_from_seeds() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        enriched_with_openalex_id(&store, "Root Work", "W1").await;
        enriched_with_openalex_id(&store, "Leaf Work", "W2").await;
        store
            .record_edges("W1", &["W2".to_string()], EdgeKind::References)
            .await
            .unwrap();

        let slice = store.graph_slice(None, None, None, 10).await.unwrap();
        assert!(slice.nodes.contains(&"W1".to_string()));
        assert!(slice.nodes.contains(&"W2".to_string()));
        assert_eq!(slice.edges.len(), 1);
    }
}
