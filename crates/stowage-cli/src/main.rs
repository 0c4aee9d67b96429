//! Stowage CLI
//!
//! Chunked upload and download of named blobs to a directory-backed store.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use stowage_storage::{DirectoryStore, StorageService};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferBar, format_bytes};

/// Stowage - chunked blob transfers to remote storage
#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage root, overrides the configuration file
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        /// File to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Remote name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Download a remote blob
    Get {
        /// Remote name
        #[arg(required = true)]
        name: String,

        /// Output file (defaults to the remote name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List remote blobs
    Ls,

    /// Delete a remote blob
    Rm {
        /// Remote name
        #[arg(required = true)]
        name: String,
    },

    /// Copy a remote blob under a new name
    Cp {
        /// Source name
        #[arg(required = true)]
        source: String,

        /// Destination name
        #[arg(required = true)]
        destination: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(root) = cli.root {
        config.storage.root = root;
    }

    // Validate configuration
    config.validate()?;

    // Initialize logging, RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let root = config.storage_root();
    tracing::debug!("Using storage root {}", root.display());
    let store = Arc::new(DirectoryStore::open(&root)?);
    let service = StorageService::new(store, config.service_config())?;

    match cli.command {
        Commands::Put { file, name } => put(&service, file, name).await?,
        Commands::Get { name, output } => get(&service, name, output).await?,
        Commands::Ls => list(&service).await?,
        Commands::Rm { name } => {
            service.delete_file(&name).await?;
            println!("{} Deleted {}", style("✓").green(), name);
        }
        Commands::Cp {
            source,
            destination,
        } => {
            service.duplicate_file(&source, &destination).await?;
            println!("{} Copied {} -> {}", style("✓").green(), source, destination);
        }
        Commands::Config => {}
    }

    Ok(())
}

/// Upload a local file
async fn put(service: &StorageService, file: PathBuf, name: Option<String>) -> anyhow::Result<()> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Cannot derive a remote name from {:?}", file))?,
    };

    let data = tokio::fs::read(&file).await?;
    let size = data.len() as u64;
    let digest = blake3::hash(&data);
    tracing::info!("Uploading {:?} as {} ({} bytes)", file, name, size);

    let bar = TransferBar::new(size, &format!("Uploading: {name}"));
    match service.upload_with_progress(&name, data, bar.callback()).await {
        Ok(()) => bar.finish_with_message(format!("Uploaded {name}")),
        Err(err) => {
            bar.abandon();
            return Err(err.into());
        }
    }

    println!("Name:   {name}");
    println!("Size:   {}", format_bytes(size));
    println!("BLAKE3: {}", hex::encode(digest.as_bytes()));
    Ok(())
}

/// Download a remote blob to a local file
async fn get(service: &StorageService, name: String, output: Option<PathBuf>) -> anyhow::Result<()> {
    // The size is only needed for the bar; the download itself learns it from the store
    let size = service
        .query_file_list()
        .await?
        .into_iter()
        .find(|f| f.name == name)
        .map_or(0, |f| f.size);

    let bar = TransferBar::new(size, &format!("Downloading: {name}"));
    let data = match service.download_with_progress(&name, bar.callback()).await {
        Ok(data) => {
            bar.finish_with_message(format!("Downloaded {name}"));
            data
        }
        Err(err) => {
            bar.abandon();
            return Err(err.into());
        }
    };

    let output = output.unwrap_or_else(|| PathBuf::from(&name));
    tokio::fs::write(&output, &data).await?;

    println!("Output: {}", output.display());
    println!("Size:   {}", format_bytes(data.len() as u64));
    if let Some(cached) = service.cache().get(&name) {
        println!("BLAKE3: {}", cached.digest_hex());
    }
    Ok(())
}

/// List remote blobs
async fn list(service: &StorageService) -> anyhow::Result<()> {
    let files = service.query_file_list().await?;
    if files.is_empty() {
        println!("{}", style("No files stored").dim());
        return Ok(());
    }

    let width = files.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for file in &files {
        println!("{:<width$}  {:>12}", file.name, format_bytes(file.size));
    }
    println!(
        "{}",
        style(format!(
            "{} files, {}",
            files.len(),
            format_bytes(files.iter().map(|f| f.size).sum())
        ))
        .dim()
    );
    Ok(())
}
