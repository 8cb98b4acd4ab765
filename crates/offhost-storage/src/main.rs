//! offhost - store, fetch and manage content-addressed objects from the shell

use clap::{Parser, Subcommand};
use offhost_storage::{
    CacheStore, ContentHash, HashedFileStorage, ObjectStorage, Result, StorageConfig,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "offhost")]
#[command(about = "Content-addressed object storage with a local disk cache")]
#[command(version)]
struct Cli {
    /// TOML config file with an [offhost] table (defaults to OFFHOST_* env vars)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and seed the cache
    Put {
        file: PathBuf,
        /// Content hash to store under; computed from the file when omitted
        #[arg(long)]
        hash: Option<String>,
    },
    /// Print the local path for an object, downloading it if needed
    Get {
        hash: String,
        /// Only look in the local cache
        #[arg(long)]
        no_remote: bool,
    },
    /// Check whether an object exists locally or remotely
    Exists { hash: String },
    /// Delete an object remotely and locally
    Delete { hash: String },
    /// Local cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Print the bytes currently on disk
    Size,
    /// Remove every cached object
    Clear,
    /// Run one eviction pass against the configured budget
    Evict,
    /// Print cache statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::from_default_env().add_directive("offhost_storage=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StorageConfig::from_file(path)?,
        None => StorageConfig::from_env()?,
    };

    match cli.command {
        Commands::Put { file, hash } => {
            let hash = match hash {
                Some(raw) => raw.parse::<ContentHash>()?,
                None => ContentHash::of_file(&file).await?,
            };
            let storage = ObjectStorage::new(config).await?;
            storage.store_file(&hash, &file).await?;
            println!("{}", hash);
        }
        Commands::Get { hash, no_remote } => {
            let hash = hash.parse::<ContentHash>()?;
            let storage = ObjectStorage::new(config).await?;
            match storage.fetch(&hash, !no_remote).await {
                Some(path) => println!("{}", path.display()),
                None => {
                    eprintln!("{} not found", hash);
                    std::process::exit(1);
                }
            }
        }
        Commands::Exists { hash } => {
            let hash = hash.parse::<ContentHash>()?;
            let storage = ObjectStorage::new(config).await?;
            let exists = storage.exists(&hash).await;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        Commands::Delete { hash } => {
            let hash = hash.parse::<ContentHash>()?;
            let storage = ObjectStorage::new(config).await?;
            storage.delete(&hash).await?;
            info!(hash = %hash, "Deleted");
        }
        Commands::Cache { command } => run_cache_command(command, &config).await?,
    }

    Ok(())
}

/// Cache maintenance only touches local disk, so credentials are not required
async fn run_cache_command(command: CacheCommands, config: &StorageConfig) -> Result<()> {
    config.validate_cache_policy()?;

    let cache = CacheStore::new(config.cache_dir.clone(), config.max_cache_size)
        .with_headroom(config.eviction_headroom);
    cache.init().await?;

    match command {
        CacheCommands::Size => println!("{}", cache.size().await),
        CacheCommands::Clear => {
            let removed = cache.clear().await;
            info!(removed, "Cleared cache");
        }
        CacheCommands::Evict => {
            let report = cache.evict_if_needed().await;
            info!(
                removed = report.removed_files,
                freed_bytes = report.freed_bytes,
                size_after = report.size_after,
                "Eviction pass finished"
            );
        }
        CacheCommands::Stats => {
            let stats = cache.stats().await;
            let json = serde_json::to_string_pretty(&stats).map_err(std::io::Error::from)?;
            println!("{}", json);
        }
    }

    Ok(())
}
