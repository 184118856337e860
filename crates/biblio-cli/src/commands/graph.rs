//! `graph-export` (§6): a read-only citation-graph slice written as JSON.

use anyhow::{Context, Result};
use biblio_core::{EdgeKind, Orchestrator};
use serde::Serialize;

use crate::cli::GraphExportArgs;

#[derive(Serialize)]
struct GraphExportBody {
    nodes: Vec<String>,
    edges: Vec<GraphExportEdge>,
}

#[derive(Serialize)]
struct GraphExportEdge {
    source: String,
    target: String,
    relationship: String,
}

pub(crate) async fn run_graph_export(orchestrator: &Orchestrator, args: &GraphExportArgs) -> Result<()> {
    let corpus_id = match &args.corpus {
        Some(name) => orchestrator.store().get_corpus_by_name(name).await?.map(|c| c.id),
        None => None,
    };
    let relationship_filter = match args.relationship.as_deref() {
        Some("references") => Some(EdgeKind::References),
        Some("cited_by") => Some(EdgeKind::CitedBy),
        Some(other) => anyhow::bail!("unknown relationship filter: {other}"),
        None => None,
    };

    let slice = orchestrator
        .store()
        .graph_slice(corpus_id, relationship_filter, args.year, args.node_limit)
        .await?;

    let body = GraphExportBody {
        nodes: slice.nodes,
        edges: slice
            .edges
            .into_iter()
            .map(|edge| GraphExportEdge {
                source: edge.source_openalex_id,
                target: edge.target_openalex_id,
                relationship: edge.relationship_type,
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&body)?;
    std::fs::write(&args.output, json).with_context(|| format!("writing {}", args.output.display()))?;
    Ok(())
}
