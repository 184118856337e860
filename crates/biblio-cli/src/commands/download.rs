use std::path::Path;

use anyhow::Result;
use biblio_core::{BatchCounters, DirectUrlResolver, Orchestrator};
use tokio_util::sync::CancellationToken;

use crate::cli::DownloadBatchArgs;
use crate::pdf::HttpPdfFetcher;

pub(crate) async fn run_download_batch(
    orchestrator: &Orchestrator,
    pdf_library: &Path,
    args: &DownloadBatchArgs,
    cancel: &CancellationToken,
) -> Result<BatchCounters> {
    let resolver = DirectUrlResolver;
    let fetcher = HttpPdfFetcher::new(pdf_library.to_path_buf());
    let now = current_unix_time();

    let counters = orchestrator
        .download_batch(
            &args.worker_id,
            args.limit,
            args.lease_seconds,
            args.retry_budget,
            &resolver,
            &fetcher,
            now,
            cancel,
        )
        .await?;
    Ok(counters)
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
