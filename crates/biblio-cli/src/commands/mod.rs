//! Command handlers: one module per §6 verb. Each returns the
//! [`crate::app::exit_handler::ProcessExit`] its batch counters imply.

mod backfill;
mod download;
mod enrich;
mod export;
mod graph;
mod ingest;
mod search;

use anyhow::Result;
use biblio_core::Orchestrator;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::exit_handler::{determine_exit_outcome, ProcessExit};
use crate::cli::{Cli, Command};

pub(crate) async fn dispatch(
    orchestrator: &Orchestrator,
    cli: &Cli,
    cancel: &CancellationToken,
) -> Result<ProcessExit> {
    match &cli.command {
        Command::IngestPdf(args) => {
            let counters = ingest::run_ingest_pdf(orchestrator, args).await?;
            info!(?counters, "ingest-pdf complete");
            Ok(determine_exit_outcome(counters.promoted, counters.failed))
        }
        Command::IngestBibtex(args) => {
            let counters = ingest::run_ingest_bibtex(orchestrator, args).await?;
            info!(?counters, "ingest-bibtex complete");
            Ok(determine_exit_outcome(counters.promoted, counters.failed))
        }
        Command::KeywordSearch(args) => {
            let (run_id, counters) = search::run_keyword_search(orchestrator, args).await?;
            info!(run_id, ?counters, "keyword-search complete");
            Ok(determine_exit_outcome(counters.processed, counters.failed))
        }
        Command::EnrichBatch(args) => {
            let counters = enrich::run_enrich_batch(orchestrator, args, cancel).await?;
            info!(?counters, "enrich-batch complete");
            Ok(determine_exit_outcome(counters.promoted, counters.failed))
        }
        Command::DownloadBatch(args) => {
            let counters = download::run_download_batch(orchestrator, &cli.pdf_library, args, cancel).await?;
            info!(?counters, "download-batch complete");
            Ok(determine_exit_outcome(counters.promoted, counters.failed))
        }
        Command::Export(args) => {
            export::run_export(orchestrator, args).await?;
            Ok(ProcessExit::Success)
        }
        Command::GraphExport(args) => {
            graph::run_graph_export(orchestrator, args).await?;
            Ok(ProcessExit::Success)
        }
        Command::BackfillEdges(args) => {
            let stats = backfill::run_backfill_edges(orchestrator, args, cancel).await?;
            info!(?stats, "backfill-edges complete");
            Ok(ProcessExit::Success)
        }
    }
}
