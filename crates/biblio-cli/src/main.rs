//! Thin CLI over `biblio-core` (SPEC_FULL.md §6 command surface). Owns the
//! database file, the PDF-library directory, and wiring the external
//! collaborator traits to concrete implementations; every actual pipeline
//! decision lives in the orchestrator.

mod app;
mod cli;
mod commands;
mod pdf;

use std::sync::Arc;

use anyhow::Result;
use biblio_core::{Database, EnrichmentMatcher, Orchestrator, RateLimiter, ReferenceExpander, Store};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use app::terminal;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let no_color = terminal::should_disable_color(
        cli.no_color,
        terminal::no_color_env_requested(),
        terminal::is_dumb_terminal(),
    );
    terminal::init_tracing(&cli.log_level, no_color);

    let db = Database::new(&cli.db).await?;
    let store = Store::new(db);
    let rate_limiter = Arc::new(RateLimiter::new());
    let orchestrator = Orchestrator::new(
        store,
        EnrichmentMatcher::new(rate_limiter.clone()),
        ReferenceExpander::new(rate_limiter.clone()),
        rate_limiter,
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let exit = commands::dispatch(&orchestrator, &cli, &cancel).await?;
    std::process::exit(exit.code());
}
