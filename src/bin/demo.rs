//! demo - synthetic end-to-end run of the field scan pipeline
//!
//! Generates an SRT telemetry track, scans a synthetic stub video against it
//! with a scripted detector backend, and writes annotated frames plus
//! results.csv to the output directory. No network or video files required.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::json;

use fieldscan::store::InMemoryDetectionStore;
use fieldscan::{
    CategorySet, Pipeline, RawFinding, ScanConfig, ScanEvent, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Synthetic flight length in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Sampling interval in seconds.
    #[arg(long, default_value_t = 1.0)]
    interval: f64,
    /// Output directory for telemetry, frames and results.
    #[arg(long, default_value = "demo_out")]
    out: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;

    // One fix per second along a slow north-east drift over a field.
    let srt_path = out_dir.join("flight.srt");
    fs::write(&srt_path, synthetic_srt(args.seconds))?;

    let mut config = ScanConfig::new(
        &format!("stub://flight?duration={}", args.seconds),
        &srt_path,
    );
    config.interval_secs = args.interval;
    config.categories = CategorySet::all();
    config.min_confidence = 0.5;
    config.output_root = out_dir.join("frames");

    // Scripted backend: a clean structured finding, a free-text response the
    // normalizer has to salvage, and a low-confidence finding that is dropped.
    let backend = StubBackend::new()
        .respond_at(
            2,
            vec![RawFinding {
                category: Some("animal".to_string()),
                confidence: Some(json!(0.93)),
                bbox: Some(json!([220, 140, 330, 260])),
                detail: Some("deer standing in the crop rows".to_string()),
                raw_text: None,
            }],
        )
        .respond_at(
            5,
            vec![RawFinding::from_text(
                "There is a bare spot in this frame, confidence 0.9, box [40, 60, 180, 200].",
            )],
        )
        .respond_at(
            7,
            vec![RawFinding {
                category: Some("weeds".to_string()),
                confidence: Some(json!(0.4)),
                ..RawFinding::default()
            }],
        );

    let pipeline = Pipeline::new(config, Box::new(InMemoryDetectionStore::new()))?;
    let handle = pipeline.start_with_backend(Box::new(backend))?;

    for event in handle.events.iter() {
        match event {
            ScanEvent::Progress { processed, total } => {
                log::info!("frame {}/{}", processed, total);
            }
            ScanEvent::Finding(detection) => {
                log::info!(
                    "finding: {} (confidence {:.2}) at frame {}",
                    detection.category,
                    detection.confidence,
                    detection.source_frame_index
                );
            }
            ScanEvent::Completed(_) | ScanEvent::Aborted { .. } => break,
        }
    }

    let summary = handle.wait()?;
    println!(
        "demo scan: {} frames, {} detections ({} below threshold dropped)",
        summary.processed_frames, summary.detections, summary.diagnostics.below_threshold
    );
    if let Some(path) = summary.results_path {
        println!("results written to {}", path.display());
    }
    Ok(())
}

fn srt_timestamp(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02},000",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60
    )
}

fn synthetic_srt(seconds: u64) -> String {
    let mut srt = String::new();
    for i in 0..seconds {
        srt.push_str(&format!(
            "{}\n{} --> {}\n[latitude: {:.6}] [longitude: {:.6}] [altitude: {:.1}]\n\n",
            i + 1,
            srt_timestamp(i),
            srt_timestamp(i + 1),
            48.856600 + i as f64 * 0.000120,
            2.352200 + i as f64 * 0.000080,
            80.0 + i as f64 * 0.5,
        ));
    }
    srt
}
