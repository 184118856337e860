use anyhow::Result;
use biblio_core::{BatchCounters, ExpandOptions, Orchestrator};
use tokio_util::sync::CancellationToken;

use crate::cli::EnrichBatchArgs;

pub(crate) async fn run_enrich_batch(
    orchestrator: &Orchestrator,
    args: &EnrichBatchArgs,
    cancel: &CancellationToken,
) -> Result<BatchCounters> {
    let expand_options = if args.expand_depth > 0 {
        Some(ExpandOptions { related_depth: args.expand_depth, ..Default::default() })
    } else {
        None
    };
    let counters = orchestrator.enrich_batch(args.limit, expand_options, cancel).await?;
    Ok(counters)
}
