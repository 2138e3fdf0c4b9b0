use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use medchron_lib::config;
use medchron_lib::pipeline::processor::{DocumentInput, DocumentMetadata, Reconciler};
use medchron_lib::pipeline_config::ReconcileConfig;

#[derive(Parser, Debug)]
#[command(
    name = "medchron",
    version,
    about = "Reconcile one OCR'd medical record into a dated, clustered event chronology."
)]
struct Args {
    /// Document JSON (`{ text, blocks?, pageCount?, metadata? }`). Reads stdin when omitted or `-`.
    input: Option<PathBuf>,

    /// Reconciliation config JSON. Defaults to the file named by MEDCHRON_CONFIG.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pretty-print the output JSON.
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRequest {
    #[serde(flatten)]
    input: DocumentInput,
    #[serde(default)]
    metadata: DocumentMetadata,
}

fn read_request(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read document {}", p.display())),
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read document from stdin")?;
            Ok(raw)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let reconcile_config = match &args.config {
        Some(path) => ReconcileConfig::from_file(path)
            .with_context(|| format!("Invalid config {}", path.display()))?,
        None => ReconcileConfig::from_env().context("Invalid config from MEDCHRON_CONFIG")?,
    };

    let raw = read_request(args.input.as_ref())?;
    let request: DocumentRequest =
        serde_json::from_str(&raw).context("Document JSON does not match the expected shape")?;

    let reconciler = Reconciler::new(reconcile_config)?;
    let output = reconciler.process(&request.input, &request.metadata).await?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{json}");
    Ok(())
}
