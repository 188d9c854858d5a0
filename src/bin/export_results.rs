//! export_results - dump a detection database to the tabular results format

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use fieldscan::export;
use fieldscan::store::{DetectionStore, SqliteDetectionStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Sqlite detections database written by a scan.
    #[arg(long)]
    db: String,
    /// Output CSV path.
    #[arg(long, default_value = "results.csv")]
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = SqliteDetectionStore::open(&args.db)?;
    let detections = store.snapshot()?;
    export::write_csv(&args.out, &detections)?;

    log::info!(
        "exported {} detections from {} to {}",
        detections.len(),
        args.db,
        args.out.display()
    );
    Ok(())
}
