//! Stowage -- command-line access to an object storage bucket.
//!
//! Every command builds the store from configuration, makes sure the bucket
//! exists, runs once, and exits.  `watch` keeps running until interrupted,
//! printing the changes under a prefix as they are observed.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stowage::config::{Config, LoggingConfig, StorageConfig};
use stowage::storage::memory::MemoryStore;
use stowage::storage::s3::S3Store;
use stowage::{ObjectStorage, RemoteStore, SnapshotDiff, StorageAdapter};

/// Command-line arguments for stowage.
#[derive(Parser, Debug)]
#[command(
    name = "stowage",
    version,
    about = "Object storage snapshots and diffs over S3-compatible stores"
)]
struct Cli {
    /// Path to the YAML configuration file.  Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bucket name from the configuration.
    #[arg(short, long)]
    bucket: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every key in the bucket.
    Ls {
        /// Also print size and last-modified time.
        #[arg(short, long)]
        long: bool,
    },
    /// Print whether a key exists.
    Exists { key: String },
    /// Upload a local file under a key.
    Put { key: String, file: PathBuf },
    /// Download a key to stdout or a file.
    Get {
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a key.
    Rm { key: String },
    /// Delete every key matching a shell-style wildcard.
    RmPattern { pattern: String },
    /// Print a debounced snapshot of the bucket as JSON.
    Snapshot,
    /// Poll a prefix and print changes until interrupted.
    Watch {
        /// Prefix to watch.  Defaults to `adapter.prefix` from the config.
        #[arg(short, long)]
        prefix: Option<String>,
        /// Seconds between refreshes.
        #[arg(short, long, default_value_t = 5)]
        every: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => stowage::config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(bucket) = cli.bucket.clone() {
        config.storage.bucket = bucket;
    }

    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    if config.observability.metrics {
        match &config.observability.metrics_listen {
            Some(addr) => {
                stowage::metrics::serve_metrics(addr.parse()?)?;
                info!("Prometheus metrics served on {}", addr);
            }
            None => {
                stowage::metrics::init_metrics();
            }
        }
        stowage::metrics::describe_metrics();
    }

    let store = open_store(&config.storage).await?;
    let storage = ObjectStorage::new(
        Arc::clone(&store),
        config.storage.bucket.clone(),
        config.facade.clone(),
    )
    .await?;

    match cli.command {
        Command::Ls { long } => {
            for meta in storage.list_all_objects().await? {
                if long {
                    println!(
                        "{:>12}  {}  {}",
                        meta.size,
                        meta.last_modified.to_rfc3339(),
                        meta.key
                    );
                } else {
                    println!("{}", meta.key);
                }
            }
        }
        Command::Exists { key } => {
            println!("{}", storage.exists(&key).await?);
        }
        Command::Put { key, file } => {
            let data = tokio::fs::read(&file).await?;
            let len = data.len();
            storage.write_file(&key, data).await?;
            info!("Uploaded {} ({} bytes) to {}", file.display(), len, key);
        }
        Command::Get { key, output } => {
            let data = storage
                .read_file(&key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("object {key} does not exist"))?;
            match output {
                Some(path) => tokio::fs::write(&path, &data).await?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Rm { key } => {
            storage.remove_file(&key).await?;
        }
        Command::RmPattern { pattern } => {
            let deleted = storage.remove_files_by_pattern(&pattern).await?;
            println!("{deleted}");
        }
        Command::Snapshot => {
            let snapshot = storage.get_snapshot().await?;
            let ordered: BTreeMap<&str, &String> = snapshot.iter().collect();
            println!("{}", serde_json::to_string_pretty(&ordered)?);
        }
        Command::Watch { prefix, every } => {
            let prefix = prefix.unwrap_or_else(|| config.adapter.prefix.clone());
            watch(store, config, prefix, Duration::from_secs(every.max(1))).await?;
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber from the logging config.  `RUST_LOG`
/// overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the configured remote store.
async fn open_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    match config.backend.as_str() {
        "s3" => {
            let settings = config.s3.clone();
            // Connecting blocks on SDK configuration loading.
            let store = tokio::task::spawn_blocking(move || S3Store::connect(&settings)).await??;
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("Using in-memory store; contents are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected 's3' or 'memory')"),
    }
}

/// Refresh an adapter over `prefix` every `every` and print non-empty diffs
/// as JSON lines.
async fn watch(
    store: Arc<dyn RemoteStore>,
    config: Config,
    prefix: String,
    every: Duration,
) -> anyhow::Result<()> {
    let bucket = config.storage.bucket.clone();
    let max_pages = config.facade.max_list_pages;
    let watched = prefix.clone();
    let mut adapter = tokio::task::spawn_blocking(move || {
        StorageAdapter::new(store, bucket, watched, max_pages)
    })
    .await??;
    info!(
        "Watching '{}' ({} keys), refreshing every {:?}",
        prefix,
        adapter.state().len(),
        every
    );

    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, stopping watch");
                return Ok(());
            }
        }

        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = adapter.refresh();
            (adapter, result)
        })
        .await?;
        adapter = returned;

        let changes = result?;
        if !changes.is_empty() {
            println!("{}", serde_json::to_string(&diff_report(&changes))?);
        }
    }
}

fn diff_report(changes: &SnapshotDiff) -> serde_json::Value {
    fn sorted(keys: &HashSet<String>) -> Vec<&str> {
        let mut out: Vec<&str> = keys.iter().map(String::as_str).collect();
        out.sort_unstable();
        out
    }
    serde_json::json!({
        "new": sorted(&changes.new),
        "removed": sorted(&changes.removed),
        "modified": sorted(&changes.modified),
    })
}
