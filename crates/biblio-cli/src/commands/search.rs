use anyhow::Result;
use biblio_core::{BatchCounters, Orchestrator};

use crate::cli::KeywordSearchArgs;

pub(crate) async fn run_keyword_search(
    orchestrator: &Orchestrator,
    args: &KeywordSearchArgs,
) -> Result<(i64, BatchCounters)> {
    let corpus_id = match &args.corpus {
        Some(name) => Some(orchestrator.store().get_or_create_corpus(name).await?.id),
        None => None,
    };
    let result = orchestrator.keyword_search(&args.query, corpus_id, args.enqueue).await?;
    Ok(result)
}
