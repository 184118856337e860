use anyhow::Result;
use biblio_core::{BackfillStats, Orchestrator};
use tokio_util::sync::CancellationToken;

use crate::cli::BackfillEdgesArgs;

pub(crate) async fn run_backfill_edges(
    orchestrator: &Orchestrator,
    args: &BackfillEdgesArgs,
    cancel: &CancellationToken,
) -> Result<BackfillStats> {
    let stats = orchestrator.backfill_edges(args.limit, args.dry_run, cancel).await?;
    Ok(stats)
}
