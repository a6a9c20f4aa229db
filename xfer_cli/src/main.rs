use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use xfer_core::config::AppConfig;
use xfer_core::transfer::utils::format_transfer_speed;
use xfer_core::transfer::{Client, ServerConfig, run_server};
use xfer_core::{TransferError, TransferEvent};

#[derive(Debug, Parser)]
#[command(name = "xfer", version, about = "Checksum-verified file transfer over TCP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store and serve files from a directory
    Server {
        /// Port to listen on
        #[arg(short, long, env = "XFER_PORT")]
        port: Option<u16>,
        /// Storage directory (created if missing)
        dir: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        /// Server address, host:port
        host: String,
        file: PathBuf,
    },
    /// Download a file
    Get {
        /// Server address, host:port
        host: String,
        file_name: String,
        /// Download directory
        dir: Option<PathBuf>,
    },
    /// Show or update the saved defaults
    Config {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        storage_dir: Option<PathBuf>,
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // .env may set RUST_LOG / XFER_PORT
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load();

    match cli.command {
        Command::Server { port, dir } => {
            let port = port.unwrap_or(config.listen_port);
            let dir = dir.unwrap_or(config.storage_dir);
            serve(port, dir).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Put { host, file } => put(&host, file).await,
        Command::Get {
            host,
            file_name,
            dir,
        } => get(&host, &file_name, dir.unwrap_or(config.download_dir)).await,
        Command::Config {
            port,
            storage_dir,
            download_dir,
        } => {
            update_config(config, port, storage_dir, download_dir)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn update_config(
    mut config: AppConfig,
    port: Option<u16>,
    storage_dir: Option<PathBuf>,
    download_dir: Option<PathBuf>,
) -> Result<()> {
    let changed = port.is_some() || storage_dir.is_some() || download_dir.is_some();
    if let Some(port) = port {
        config.listen_port = port;
    }
    if let Some(dir) = storage_dir {
        config.storage_dir = dir;
    }
    if let Some(dir) = download_dir {
        config.download_dir = dir;
    }

    if changed {
        config.save().context("Failed to save config")?;
        if let Some(path) = AppConfig::config_path() {
            println!("Saved {}", path.display());
        }
    }
    println!("Port: {}", config.listen_port);
    println!("Storage directory: {}", config.storage_dir.display());
    println!("Download directory: {}", config.download_dir.display());
    Ok(())
}

async fn serve(port: u16, dir: PathBuf) -> Result<()> {
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to listen on port {}", port))?;

    println!("Listening on port: {}", port);
    println!("Storage directory: {}", dir.display());

    let (event_tx, mut event_rx) = mpsc::channel::<TransferEvent>(1000);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(?event, "transfer event");
        }
    });

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    run_server(listener, ServerConfig::new(dir), event_tx, shutdown).await?;
    Ok(())
}

async fn put(host: &str, file: PathBuf) -> Result<ExitCode> {
    println!("PUT {}", file.display());
    let mut client = Client::connect(host)
        .await
        .with_context(|| format!("Failed to connect to {}", host))?;

    match client.put(&file).await {
        Ok(outcome) => {
            println!("Storage complete!");
            println!(
                "Transfer took {:?} ({})",
                outcome.elapsed,
                format_transfer_speed(outcome.size, outcome.elapsed.as_secs_f64())
            );
            client.close().await?;
            Ok(ExitCode::SUCCESS)
        }
        Err(TransferError::Rejected(reason)) => {
            eprintln!("Server refused upload: {}", reason);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("Upload failed"),
    }
}

async fn get(host: &str, file_name: &str, dir: PathBuf) -> Result<ExitCode> {
    println!("GET {}", file_name);
    let is_dir = tokio::fs::metadata(&dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        bail!("Download directory {} does not exist", dir.display());
    }

    let mut client = Client::connect(host)
        .await
        .with_context(|| format!("Failed to connect to {}", host))?;

    match client.get(file_name, &dir).await {
        Ok(outcome) => {
            println!(
                "Transfer took {:?} ({})",
                outcome.elapsed,
                format_transfer_speed(outcome.size, outcome.elapsed.as_secs_f64())
            );
            client.close().await?;
            if outcome.verified {
                println!("Successfully retrieved file.");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!(
                    "FAILED to retrieve file. Invalid checksum; kept at {}",
                    outcome.path.display()
                );
                Ok(ExitCode::from(2))
            }
        }
        Err(TransferError::Rejected(reason)) => {
            eprintln!("Server refused download: {}", reason);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("Download failed"),
    }
}
