// Snippy - code snippet knowledge service
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use snippy::config::{load_config, Settings};
use snippy::logging;
use snippy::server::{self, AppState};

/// How long `ingest-once` waits for each started orchestration
const INGEST_WAIT: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "snippy")]
#[command(version, about = "Code snippet knowledge service")]
struct Cli {
    /// Config file (defaults to $SNIPPY_CONFIG or ~/.snippy/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP host (default)
    Serve {
        /// Override server.bind_address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Scan the ingestion directory once and wait for the results
    IngestOnce,

    /// Print the effective configuration with secrets removed
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to read .env: {}", e);
        }
    }

    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let mut settings = load_config(cli.config)?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                settings.server.bind_address = bind;
                settings.validate()?;
            }
            server::serve(settings).await
        }
        Command::IngestOnce => ingest_once(settings).await,
        Command::Config => {
            let rendered = serde_json::to_string_pretty(&settings)
                .context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

async fn ingest_once(settings: Settings) -> Result<()> {
    let shutdown = CancellationToken::new();
    let state = AppState::build(settings, shutdown.clone())?;

    let report = state.ingestor().scan_once().await?;

    let mut instances = Vec::new();
    for id in report.started_instances() {
        let record = state.runtime.wait_for_completion(id, INGEST_WAIT).await?;
        instances.push(json!({
            "instanceId": record.id,
            "runtimeStatus": record.status,
            "output": record.output,
        }));
    }

    let rendered = serde_json::to_string_pretty(&json!({
        "files": report.files,
        "orchestrations": instances,
    }))?;
    println!("{}", rendered);

    shutdown.cancel();
    Ok(())
}
