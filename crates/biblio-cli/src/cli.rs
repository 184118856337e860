//! Command-line surface (SPEC_FULL.md §6 "Command surface"): one `clap`
//! subcommand per orchestrator operation, plus the read-only reporting
//! verbs (`export`, `graph-export`) the CLI owns directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "biblio", version, about = "Bibliographic acquisition pipeline CLI")]
pub struct Cli {
    /// Path to the SQLite catalog file.
    #[arg(long, global = true, default_value = "catalog.db")]
    pub db: PathBuf,

    /// Directory downloaded PDFs are written under.
    #[arg(long, global = true, default_value = "pdf_library")]
    pub pdf_library: PathBuf,

    /// Disable ANSI colors in log output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Default tracing level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract candidates from a PDF (via a manifest sidecar) and ingest them.
    IngestPdf(IngestPdfArgs),
    /// Parse a `.bib` file and ingest its entries.
    IngestBibtex(IngestBibtexArgs),
    /// Search OpenAlex by free text and either preview or ingest the hits.
    KeywordSearch(KeywordSearchArgs),
    /// Drain `raw` rows through the enrichment matcher.
    EnrichBatch(EnrichBatchArgs),
    /// Claim queued rows and resolve + fetch their PDFs.
    DownloadBatch(DownloadBatchArgs),
    /// Write a read-only snapshot of the catalog to disk.
    Export(ExportArgs),
    /// Write a bounded citation-graph slice to disk.
    GraphExport(GraphExportArgs),
    /// Re-fetch already-enriched works and record any missing citation edges.
    BackfillEdges(BackfillEdgesArgs),
}

#[derive(Debug, clap::Args)]
pub struct IngestPdfArgs {
    /// Path to the PDF file being ingested.
    pub path: PathBuf,
    /// JSON manifest of pre-extracted references (see [`crate::pdf::ManifestExtractor`]).
    #[arg(long)]
    pub manifest: PathBuf,
    /// Corpus name to tag every ingested candidate with.
    #[arg(long)]
    pub corpus: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct IngestBibtexArgs {
    pub path: PathBuf,
    #[arg(long)]
    pub corpus: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct KeywordSearchArgs {
    pub query: String,
    #[arg(long)]
    pub corpus: Option<String>,
    /// Ingest hits straight into `raw` instead of only recording them.
    #[arg(long)]
    pub enqueue: bool,
}

#[derive(Debug, clap::Args)]
pub struct EnrichBatchArgs {
    #[arg(long, default_value_t = biblio_core::orchestrator::DEFAULT_ENRICH_BATCH_SIZE)]
    pub limit: i64,
    /// Citation-neighborhood depth to walk after a successful match (0 disables expansion).
    #[arg(long, default_value_t = 0)]
    pub expand_depth: u32,
}

#[derive(Debug, clap::Args)]
pub struct DownloadBatchArgs {
    #[arg(long)]
    pub worker_id: String,
    #[arg(long, default_value_t = biblio_core::orchestrator::DEFAULT_DOWNLOAD_BATCH_SIZE)]
    pub limit: i64,
    #[arg(long, default_value_t = biblio_core::orchestrator::DEFAULT_LEASE_SECONDS)]
    pub lease_seconds: i64,
    #[arg(long, default_value_t = biblio_core::orchestrator::DEFAULT_DOWNLOAD_RETRY_BUDGET)]
    pub retry_budget: i64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Json,
    Bibtex,
    PdfsZip,
    BundleZip,
}

#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,
    #[arg(long)]
    pub corpus: Option<String>,
    #[arg(long, default_value = "export.out")]
    pub output: PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct GraphExportArgs {
    #[arg(long)]
    pub corpus: Option<String>,
    #[arg(long)]
    pub relationship: Option<String>,
    #[arg(long)]
    pub year: Option<i64>,
    #[arg(long, default_value_t = 500)]
    pub node_limit: i64,
    #[arg(long, default_value = "graph.json")]
    pub output: PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct BackfillEdgesArgs {
    #[arg(long, default_value_t = 100)]
    pub limit: i64,
    #[arg(long)]
    pub dry_run: bool,
}
