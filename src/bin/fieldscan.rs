//! fieldscan - scan drone footage against its SRT telemetry track
//!
//! This tool:
//! 1. Loads the scan configuration (FIELDSCAN_CONFIG + env + CLI overrides)
//! 2. Opens the durable detection store under the output root
//! 3. Runs the pipeline on a background thread
//! 4. Streams progress and findings to the log
//! 5. Writes annotated frames and results.csv under the output root
//!
//! Ctrl-C requests cooperative cancellation; frames already persisted remain
//! valid partial output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use fieldscan::store::SqliteDetectionStore;
use fieldscan::{BackendSelection, Pipeline, ScanConfig, ScanEvent};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Flight video: a local file path, or stub://... for a synthetic source.
    #[arg(long)]
    video: Option<String>,
    /// SRT telemetry file.
    #[arg(long)]
    srt: Option<PathBuf>,
    /// Comma-separated categories to look for: bare_spot, animal, weed.
    #[arg(long)]
    look_for: Option<String>,
    /// Sampling interval in seconds.
    #[arg(long)]
    interval: Option<f64>,
    /// Output root for annotated frames and results.csv.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Detector backend: stub, hosted or local.
    #[arg(long)]
    backend: Option<String>,
    /// Detector endpoint override.
    #[arg(long)]
    endpoint: Option<String>,
    /// Detection confidence acceptance threshold.
    #[arg(long)]
    min_confidence: Option<f32>,
    /// Sqlite database path (defaults to <out>/detections.db).
    #[arg(long)]
    db: Option<String>,
    /// Persist every sampled frame, not only detection-bearing ones.
    #[arg(long)]
    persist_all: bool,
    /// Clear stored detections and previous output before scanning.
    #[arg(long)]
    reset: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ScanConfig::load_partial()?;
    apply_args(&mut config, &args)?;
    config.validate()?;

    std::fs::create_dir_all(&config.output_root)?;
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| config.output_root.join("detections.db").display().to_string());
    let store = SqliteDetectionStore::open(&db_path)?;

    let pipeline = Arc::new(Pipeline::new(config.clone(), Box::new(store))?);
    if args.reset {
        pipeline.reset()?;
    }

    {
        let pipeline = pipeline.clone();
        ctrlc::set_handler(move || {
            log::warn!("cancellation requested, finishing the current frame...");
            pipeline.cancel();
        })
        .expect("error setting Ctrl-C handler");
    }

    let handle = pipeline.start()?;
    log::info!(
        "scanning {} with telemetry {} -> {}",
        config.video,
        config.telemetry.display(),
        config.output_root.display()
    );

    for event in handle.events.iter() {
        match event {
            ScanEvent::Progress { processed, total } => {
                log::info!("processed frame {}/{}", processed, total);
            }
            ScanEvent::Finding(detection) => {
                let coords = detection
                    .location
                    .map(|fix| format!("{:.6}, {:.6}", fix.latitude, fix.longitude))
                    .unwrap_or_else(|| "no fix".to_string());
                log::info!(
                    "finding: {} (confidence {:.2}) at frame {} [{}]",
                    detection.category,
                    detection.confidence,
                    detection.source_frame_index,
                    coords
                );
            }
            ScanEvent::Completed(_) | ScanEvent::Aborted { .. } => break,
        }
    }

    let summary = handle.wait()?;
    println!(
        "scan complete: {} of {} frames, {} detections",
        summary.processed_frames, summary.total_frames, summary.detections
    );
    println!(
        "skipped: {} decode gaps, {} undetermined frames, {} uncovered frames, \
         {} unrecognized, {} below threshold, {} boxes unparsed",
        summary.diagnostics.decode_gaps,
        summary.diagnostics.undetermined_frames,
        summary.diagnostics.uncovered_frames,
        summary.diagnostics.unrecognized_categories,
        summary.diagnostics.below_threshold,
        summary.diagnostics.bbox_unparsed
    );
    if let Some(path) = summary.results_path {
        println!("results written to {}", path.display());
    }
    Ok(())
}

fn apply_args(config: &mut ScanConfig, args: &Args) -> Result<()> {
    if let Some(video) = &args.video {
        config.video = video.clone();
    }
    if let Some(srt) = &args.srt {
        config.telemetry = srt.clone();
    }
    if let Some(look_for) = &args.look_for {
        config.categories = fieldscan::CategorySet::from_labels(look_for)?;
    }
    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }
    if let Some(out) = &args.out {
        config.output_root = out.clone();
    }
    if let Some(backend) = &args.backend {
        config.backend = BackendSelection::parse(backend)?;
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(min_confidence) = args.min_confidence {
        config.min_confidence = min_confidence;
    }
    if let Some(db) = &args.db {
        config.db_path = Some(db.clone());
    }
    if args.persist_all {
        config.persist_all_frames = true;
    }
    Ok(())
}
