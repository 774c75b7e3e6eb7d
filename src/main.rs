//! BitStore - content-addressable block storage
//!
//! Usage:
//!   bitstore init                   - Initialize a new store
//!   bitstore upload <paths...>      - Upload files
//!   bitstore list                   - List stored files
//!   bitstore info <id>              - Show one file's record
//!   bitstore download <id> <dest>   - Rebuild a file
//!   bitstore status                 - Show store status

use bitstore::{
    config::{Config, IndexBackend, StorageBackend},
    pipeline::ProgressObserver,
    upload::UploadQueue,
    BitStore, Error, Result,
};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "bitstore")]
#[command(author = "BitStore Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Content-addressable block storage with deduplication")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/bitstore/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store
    Init {
        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Block size in bytes
        #[arg(long)]
        block_size: Option<usize>,

        /// Block storage backend (directory, sled, memory)
        #[arg(long)]
        backend: Option<StorageBackend>,

        /// File index backend (sled, memory)
        #[arg(long)]
        index: Option<IndexBackend>,

        /// Compress blocks at rest
        #[arg(long)]
        compress: bool,
    },

    /// Upload one or more files as a batch
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List stored files
    List,

    /// Show a stored file's record
    Info {
        /// File id
        id: u64,
    },

    /// Rebuild a stored file
    Download {
        /// File id
        id: u64,

        /// Destination path
        dest: PathBuf,
    },

    /// Show store status
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    // Run the command
    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init {
            data_dir,
            block_size,
            backend,
            index,
            compress,
        } => cmd_init(config_path, data_dir, block_size, backend, index, compress),

        Commands::Upload { paths } => cmd_upload(config_path, &paths),

        Commands::List => cmd_list(config_path),

        Commands::Info { id } => cmd_info(config_path, id),

        Commands::Download { id, dest } => cmd_download(config_path, id, &dest),

        Commands::Status => cmd_status(config_path),
    }
}

fn cmd_init(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    block_size: Option<usize>,
    backend: Option<StorageBackend>,
    index: Option<IndexBackend>,
    compress: bool,
) -> Result<()> {
    info!("Initializing BitStore...");

    let mut config = Config::default();
    if let Some(dir) = data_dir {
        config.data_dir = expand_tilde(&dir);
    }
    if let Some(size) = block_size {
        config.block.block_size = size;
    }
    if let Some(backend) = backend {
        config.storage.backend = backend;
    }
    if let Some(index) = index {
        config.storage.index = index;
    }
    config.block.compression_enabled = compress;
    config.validate()?;

    // Ensure config directory exists
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    config.save(config_path)?;
    config.ensure_directories()?;

    info!("Configuration saved to {:?}", config_path);
    info!("Data directory: {:?}", config.data_dir);
    info!("");
    info!("Next steps:");
    info!("  Run 'bitstore upload <files...>' to store files");

    Ok(())
}

fn open_store(config_path: &Path) -> Result<(Config, BitStore)> {
    let config = Config::load(config_path)?;
    let bitstore = BitStore::open(&config)?;
    Ok((config, bitstore))
}

fn cmd_upload(config_path: &Path, paths: &[PathBuf]) -> Result<()> {
    let (_, store) = open_store(config_path)?;

    let queue = UploadQueue::new();
    for path in paths {
        queue.enqueue_path(path)?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let progress = PercentBar::default();
        let result = store.upload_batch(&queue, &progress).await;
        eprintln!();
        let report = result?;
        store.flush().await?;
        Ok::<_, Error>(report)
    })?;

    println!("Uploaded {} file(s):", report.records.len());
    for record in &report.records {
        println!(
            "  {:>6}  {}  ({}, {} blocks)",
            record.id,
            record.file_name,
            format_bytes(record.size),
            record.block_count()
        );
    }
    println!("Library now holds {} file(s)", report.library.len());

    Ok(())
}

fn cmd_list(config_path: &Path) -> Result<()> {
    let (_, store) = open_store(config_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let files = runtime.block_on(store.list_files())?;

    if files.is_empty() {
        println!("No files stored.");
        return Ok(());
    }

    println!("{:>6}  {:>12}  {:>6}  {:<20}  Name", "ID", "Size", "Blocks", "Created");
    println!("{}", "-".repeat(70));
    for record in &files {
        println!(
            "{:>6}  {:>12}  {:>6}  {:<20}  {}",
            record.id,
            format_bytes(record.size),
            record.block_count(),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.file_name
        );
    }

    Ok(())
}

fn cmd_info(config_path: &Path, id: u64) -> Result<()> {
    let (_, store) = open_store(config_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let record = runtime.block_on(store.get_file(id))?;

    println!("File {}", record.id);
    println!("=================");
    println!("Name: {}", record.file_name);
    println!("Size: {} ({} bytes)", format_bytes(record.size), record.size);
    println!("Created: {}", record.created_at.to_rfc3339());
    println!("Blocks: {}", record.block_count());
    for (i, fingerprint) in record.block_hashes.iter().enumerate() {
        println!("  {:>4}  {}", i, fingerprint);
    }

    Ok(())
}

fn cmd_download(config_path: &Path, id: u64, dest: &Path) -> Result<()> {
    let (_, store) = open_store(config_path)?;

    let dest = if dest.is_dir() {
        let runtime = tokio::runtime::Runtime::new()?;
        let record = runtime.block_on(store.get_file(id))?;
        dest.join(&record.file_name)
    } else {
        dest.to_path_buf()
    };

    info!("Downloading file {} to {:?}...", id, dest);

    let runtime = tokio::runtime::Runtime::new()?;
    let written = runtime.block_on(store.download_to_path(id, &dest))?;

    println!("Wrote {} to {:?}", format_bytes(written), dest);
    Ok(())
}

fn cmd_status(config_path: &Path) -> Result<()> {
    let (config, store) = open_store(config_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let status = runtime.block_on(store.stats())?;

    println!("BitStore Status");
    println!("===============");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Data directory: {:?}", config.data_dir);
    println!("Block size: {}", format_bytes(config.block.block_size as u64));
    println!("Block backend: {:?}", config.storage.backend);
    println!("Index backend: {:?}", config.storage.index);
    println!("Compression: {}", if config.block.compression_enabled { "enabled" } else { "disabled" });
    println!();
    println!("Files: {}", status.files);
    println!("Blocks: {}", status.blocks);
    println!("Logical size: {}", format_bytes(status.logical_bytes));
    println!("Stored size: {}", format_bytes(status.stored_bytes));
    println!("Dedup ratio: {:.2}x", status.dedup_ratio());

    Ok(())
}

/// Prints whole-percent progress on one terminal line
#[derive(Default)]
struct PercentBar {
    last: AtomicU8,
}

impl ProgressObserver for PercentBar {
    fn on_progress(&self, fraction: f64) {
        let percent = (fraction * 100.0).round().clamp(0.0, 100.0) as u8;
        if percent == 0 || self.last.fetch_max(percent, Ordering::Relaxed) >= percent {
            return;
        }
        eprint!("\rUploading... {:>3}%", percent);
        let _ = std::io::stderr().flush();
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
