//! `export` (§6): a read-only snapshot of `downloaded` (+ `enriched`, for
//! rows still mid-pipeline) as JSON, a `.bib` file, or a zip of the PDFs
//! themselves / the PDFs plus a JSON manifest.

use std::io::Write;

use anyhow::{Context, Result};
use biblio_core::{DownloadedRow, EnrichedRow, Orchestrator};
use serde::Serialize;

use crate::cli::{ExportArgs, ExportFormat};

const EXPORT_PAGE_SIZE: i64 = 1000;

#[derive(Serialize)]
struct ExportRecord {
    id: i64,
    title: Option<String>,
    authors: String,
    year: Option<i64>,
    doi: Option<String>,
    openalex_id: Option<String>,
    file_path: Option<String>,
}

impl From<&DownloadedRow> for ExportRecord {
    fn from(row: &DownloadedRow) -> Self {
        Self {
            id: row.id,
            title: row.title.clone(),
            authors: row.authors.clone(),
            year: row.year,
            doi: row.doi.clone(),
            openalex_id: row.openalex_id.clone(),
            file_path: Some(row.file_path.clone()),
        }
    }
}

impl From<&EnrichedRow> for ExportRecord {
    fn from(row: &EnrichedRow) -> Self {
        Self {
            id: row.id,
            title: row.title.clone(),
            authors: row.authors.clone(),
            year: row.year,
            doi: row.doi.clone(),
            openalex_id: row.openalex_id.clone(),
            file_path: row.file_path.clone(),
        }
    }
}

pub(crate) async fn run_export(orchestrator: &Orchestrator, args: &ExportArgs) -> Result<()> {
    let corpus_id = match &args.corpus {
        Some(name) => orchestrator.store().get_corpus_by_name(name).await?.map(|c| c.id),
        None => None,
    };

    let downloaded = list_all_downloaded(orchestrator).await?;
    let downloaded: Vec<&DownloadedRow> = downloaded
        .iter()
        .filter(|row| corpus_id.is_none_or(|id| row.corpus_id == Some(id)))
        .collect();

    match args.format {
        ExportFormat::Json => {
            let records: Vec<ExportRecord> = downloaded.iter().map(|row| ExportRecord::from(*row)).collect();
            let body = serde_json::to_string_pretty(&records)?;
            std::fs::write(&args.output, body)
                .with_context(|| format!("writing {}", args.output.display()))?;
        }
        ExportFormat::Bibtex => {
            let mut body = String::new();
            for row in &downloaded {
                body.push_str(&to_bibtex_entry(row));
                body.push('\n');
            }
            std::fs::write(&args.output, body)
                .with_context(|| format!("writing {}", args.output.display()))?;
        }
        ExportFormat::PdfsZip => {
            write_zip(&args.output, &downloaded, false)?;
        }
        ExportFormat::BundleZip => {
            write_zip(&args.output, &downloaded, true)?;
        }
    }

    Ok(())
}

async fn list_all_downloaded(orchestrator: &Orchestrator) -> Result<Vec<DownloadedRow>> {
    let mut all = Vec::new();
    let mut offset = 0i64;
    loop {
        let page = orchestrator.store().list_downloaded(EXPORT_PAGE_SIZE, offset).await?;
        let fetched = page.len() as i64;
        all.extend(page);
        if fetched < EXPORT_PAGE_SIZE {
            break;
        }
        offset += EXPORT_PAGE_SIZE;
    }
    Ok(all)
}

fn to_bibtex_entry(row: &DownloadedRow) -> String {
    let key = row.doi.clone().unwrap_or_else(|| format!("ref{}", row.id));
    let authors: Vec<String> = serde_json::from_str(&row.authors).unwrap_or_default();
    format!(
        "@article{{{key},\n  title = {{{}}},\n  author = {{{}}},\n  year = {{{}}},\n  doi = {{{}}}\n}}\n",
        row.title.clone().unwrap_or_default(),
        authors.join(" and "),
        row.year.map(|y| y.to_string()).unwrap_or_default(),
        row.doi.clone().unwrap_or_default(),
    )
}

fn write_zip(output: &std::path::Path, rows: &[&DownloadedRow], with_manifest: bool) -> Result<()> {
    let file = std::fs::File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for row in rows {
        let bytes = std::fs::read(&row.file_path)
            .with_context(|| format!("reading {}", row.file_path))?;
        let name = std::path::Path::new(&row.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.pdf");
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }

    if with_manifest {
        let records: Vec<ExportRecord> = rows.iter().map(|row| ExportRecord::from(*row)).collect();
        let manifest = serde_json::to_string_pretty(&records)?;
        writer.start_file("manifest.json", options)?;
        writer.write_all(manifest.as_bytes())?;
    }

    writer.finish()?;
    Ok(())
}
