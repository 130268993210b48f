//! Label merge CLI
//!
//! Splits label sheets into quadrants and composites each one with its
//! fiscal document into a single printable PDF.

use anyhow::{bail, Context, Result};
use clap::Parser;
use labelmerge_core::{
    run_request, BatchConfig, BatchOrchestrator, BatchRequest, GhostscriptNormalizer, LabelJob,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "labelmerge")]
#[command(
    version,
    about = "Merge shipping label sheets with fiscal documents onto single pages"
)]
struct Args {
    /// JSON batch request with base64 artifacts; the response is printed as JSON
    #[arg(long, conflicts_with_all = ["label", "documents"])]
    request: Option<PathBuf>,

    /// Label sheet PDF
    #[arg(short, long)]
    label: Option<PathBuf>,

    /// Fiscal document PDFs, one per label in order
    #[arg(short, long = "document", num_args = 1..)]
    documents: Vec<PathBuf>,

    /// Reuse the single document for every label
    #[arg(long)]
    shared: bool,

    /// Output PDF path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with batch configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ghostscript executable used to normalize unreadable label sheets
    #[arg(long)]
    gs: Option<PathBuf>,

    /// Ghostscript timeout in milliseconds
    #[arg(long, default_value = "60000")]
    gs_timeout_ms: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the JSON response, logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting labelmerge v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            BatchConfig::from_json(&json)?
        }
        None => BatchConfig::default(),
    };

    let mut orchestrator = BatchOrchestrator::new(config);
    if let Some(gs) = &args.gs {
        orchestrator = orchestrator.with_normalizer(
            GhostscriptNormalizer::new(gs).with_timeout(Duration::from_millis(args.gs_timeout_ms)),
        );
    }

    if let Some(path) = &args.request {
        return run_json(&orchestrator, path);
    }

    let label_path = match &args.label {
        Some(path) => path,
        None => bail!("either --request or --label is required"),
    };
    let output_path = match &args.output {
        Some(path) => path,
        None => bail!("--output is required with --label"),
    };

    let label = std::fs::read(label_path)
        .with_context(|| format!("reading label {}", label_path.display()))?;
    let mut documents = Vec::with_capacity(args.documents.len());
    for path in &args.documents {
        documents.push(
            std::fs::read(path).with_context(|| format!("reading document {}", path.display()))?,
        );
    }

    let job = if args.shared {
        if documents.len() != 1 {
            bail!("--shared needs exactly one --document");
        }
        LabelJob::shared(label, documents.remove(0))
    } else {
        LabelJob::new(label, documents)
    };

    let pdf = orchestrator.process(vec![job])?;
    std::fs::write(output_path, &pdf)
        .with_context(|| format!("writing {}", output_path.display()))?;
    tracing::info!(
        "Wrote {} ({} bytes, {} pages)",
        output_path.display(),
        pdf.len(),
        labelmerge_core::get_page_count(&pdf)?
    );
    Ok(())
}

fn run_json(orchestrator: &BatchOrchestrator, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    let request: BatchRequest = serde_json::from_str(&json).context("parsing batch request")?;
    let result = run_request(orchestrator, &request);
    println!("{}", serde_json::to_string(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
