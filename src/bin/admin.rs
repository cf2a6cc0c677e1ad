//! tierstream Admin Binary
//!
//! Offline inspection and maintenance of a data directory.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tierstream::cold::FileColdStore;
use tierstream::wal::WalRecovery;
use tierstream::{Config, StreamDb};
use tracing_subscriber::{fmt, EnvFilter};

/// tierstream admin tool
#[derive(Parser, Debug)]
#[command(name = "tierstream-admin")]
#[command(about = "Inspect and maintain a tierstream data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tierstream_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print per-stream lengths, tier occupancy and queue depth.
    ///
    /// Opens the store the way the service does, so a torn WAL tail is cut
    /// off and abandoned cold temp files are removed.
    Stats,

    /// Check WAL frames and every cold batch checksum. Read only.
    Verify,

    /// Promote every pending batch on this thread, then checkpoint
    Drain {
        /// Batch size the directory was written with
        #[arg(short, long, default_value = "250")]
        batch_size: u64,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tierstream=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("tierstream admin v{}", tierstream::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    let outcome = match args.command {
        Commands::Stats => stats(&args.data_dir),
        Commands::Verify => verify(&args.data_dir),
        Commands::Drain { batch_size } => drain(&args.data_dir, batch_size),
    };

    if let Err(e) = outcome {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn stats(data_dir: &Path) -> tierstream::Result<()> {
    let db = StreamDb::open_path(data_dir)?;

    println!("{:<40} {:>10} {:>10} {:>10} {:>12}", "STREAM", "LENGTH", "HOT", "FLOOR", "BYTES");
    for key in db.streams() {
        println!(
            "{:<40} {:>10} {:>10} {:>10} {:>12}",
            key.to_string(),
            db.length_of(&key)?,
            db.hot().hot_len(&key),
            db.hot().hot_floor(&key),
            db.stream_size(&key)
        );
    }

    let queue = db.hot().queue();
    println!();
    println!("cold batches:     {}", db.cold().batch_count());
    println!("{:<17} {}", format!("{}:", queue.pending_name()), queue.pending_len());
    println!("{:<17} {}", format!("{}:", queue.processing_name()), queue.processing_len());
    println!("wal bytes:        {}", db.hot().wal_size());
    Ok(())
}

fn verify(data_dir: &Path) -> tierstream::Result<()> {
    let wal_path = data_dir.join("hot.wal");
    if wal_path.exists() {
        let result = WalRecovery::verify(&wal_path)?;
        println!(
            "wal: {} valid entries, {} corrupted, last lsn {}, torn tail: {}",
            result.entries_recovered, result.entries_corrupted, result.last_lsn, result.was_truncated
        );
    } else {
        println!("wal: not present");
    }

    let report = FileColdStore::verify(&data_dir.join("cold"))?;
    for (path, error) in &report.unreadable {
        println!("bad batch {}: {}", path.display(), error);
    }
    println!(
        "cold: {} batches checked, {} unreadable, {} abandoned temp files",
        report.checked,
        report.unreadable.len(),
        report.abandoned_tmp
    );
    Ok(())
}

fn drain(data_dir: &Path, batch_size: u64) -> tierstream::Result<()> {
    let config = Config::builder()
        .data_dir(data_dir)
        .batch_size(batch_size)
        .build();
    let db = StreamDb::open(config)?;

    let processed = db.promoter().drain()?;
    println!("promoted {} batches", processed);
    db.close()
}
