use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use control_unit::config::ControlConfig;
use control_unit::controller::Controller;
use control_unit::server::run_server;
use control_unit::types::UploadedFile;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the control unit HTTP API
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one request through the pipeline and print the envelope
    Invoke {
        /// Natural-language request
        #[arg(short, long)]
        input: String,
        /// Files to attach (repeatable)
        #[arg(short, long = "file")]
        files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = ControlConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let controller = Arc::new(Controller::from_config(&config)?);
            info!(
                registry = %config.discovery.registry_url,
                catalog = %config.discovery.catalog_url,
                llm = %config.llm.base_url,
                "Starting control unit."
            );
            if let Err(e) = run_server(&config, controller).await {
                error!(error = %e, "Server failed.");
                return Err(e);
            }
        }
        Commands::Invoke { input, files } => {
            let controller = Controller::from_config(&config)?;
            let mut uploads = Vec::with_capacity(files.len());
            for file in &files {
                uploads.push(read_upload(Path::new(file)).await?);
            }

            let outcome = controller.control(&input, uploads).await;
            println!("{}", serde_json::to_string_pretty(&outcome.envelope)?);
            for artifact in &outcome.artifacts {
                tokio::fs::write(&artifact.filename, &artifact.bytes)
                    .await
                    .with_context(|| format!("Failed to write artifact '{}'", artifact.filename))?;
                info!(filename = %artifact.filename, task_name = %artifact.task_name, "Artifact written.");
            }
        }
    }

    Ok(())
}

async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("'{}' has no usable file name", path.display()))?
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    Ok(UploadedFile {
        filename,
        bytes: Bytes::from(bytes),
    })
}
