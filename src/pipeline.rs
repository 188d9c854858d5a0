//! Scan orchestration.
//!
//! Drives sampling -> correlation -> detection -> normalization across a
//! whole video on a single dedicated background thread:
//! - State machine `Idle -> Running -> {Completed | Aborted}`; at most one
//!   run may be `Running`, a second start is rejected, not queued
//! - Progress and completion flow to the foreground over an unbounded
//!   channel; notifications are advisory and never block scanning
//! - Cancellation is cooperative, checked between frames
//! - Each annotated frame is persisted before its detections are appended to
//!   the store, so a crash mid-run leaves a consistent prefix of results

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::fmt;

use anyhow::{anyhow, Result};

use crate::annotate::{encode_jpeg, FrameSink};
use crate::config::{build_backend, ScanConfig};
use crate::correlate::match_fix;
use crate::detect::{DetectOutcome, DetectorBackend, DetectorGateway};
use crate::export;
use crate::normalize::{FrameContext, NormalizeOutcome, Normalizer};
use crate::sample::{FrameSampler, SamplerConfig};
use crate::store::DetectionStore;
use crate::telemetry::TelemetryTrack;
use crate::{BoundingBox, Detection, ScanDiagnostics};

// -------------------- States and events --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// An operation was requested in a state that does not permit it.
#[derive(Clone, Debug)]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: RunState,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} while the pipeline is {}", self.operation, self.state)
    }
}

impl std::error::Error for InvalidStateError {}

/// Events delivered to the foreground consumer.
#[derive(Clone, Debug)]
pub enum ScanEvent {
    /// Monotonically increasing progress (frames processed / total).
    Progress { processed: u32, total: u32 },
    /// A detection was accepted and appended to the store.
    Finding(Detection),
    Completed(ScanSummary),
    Aborted { reason: String },
}

#[derive(Clone, Debug)]
pub struct ScanSummary {
    pub total_frames: u32,
    pub processed_frames: u32,
    /// Detection count in the store at completion.
    pub detections: usize,
    pub diagnostics: ScanDiagnostics,
    pub results_path: Option<PathBuf>,
}

// -------------------- Handle --------------------

/// Handle on one running scan.
#[derive(Debug)]
pub struct ScanHandle {
    /// Progress/completion events. Reading is optional; the channel is
    /// unbounded and the pipeline never blocks on it.
    pub events: Receiver<ScanEvent>,
    join: JoinHandle<Result<ScanSummary, String>>,
}

impl ScanHandle {
    /// Block until the run finishes; Err carries the abort reason.
    pub fn wait(self) -> Result<ScanSummary> {
        drop(self.events);
        let outcome = self
            .join
            .join()
            .map_err(|_| anyhow!("scan thread panicked"))?;
        outcome.map_err(|reason| anyhow!(reason))
    }
}

// -------------------- Pipeline --------------------

type SharedStore = Arc<Mutex<Box<dyn DetectionStore>>>;

pub struct Pipeline {
    config: ScanConfig,
    store: SharedStore,
    state: Arc<Mutex<RunState>>,
    cancel: Arc<AtomicBool>,
}

fn recover<'a, T>(
    guard: std::result::Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl Pipeline {
    pub fn new(config: ScanConfig, store: Box<dyn DetectionStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: Arc::new(Mutex::new(store)),
            state: Arc::new(Mutex::new(RunState::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> RunState {
        *recover(self.state.lock())
    }

    /// Request cooperative cancellation; honored between frames.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the store for read-only consumers (presentation, export).
    pub fn snapshot(&self) -> Result<Vec<Detection>> {
        recover(self.store.lock()).snapshot()
    }

    /// Start a scan with the backend named in the configuration.
    pub fn start(&self) -> Result<ScanHandle> {
        let backend = build_backend(&self.config)?;
        self.start_with_backend(backend)
    }

    /// Start a scan with an explicitly constructed backend.
    pub fn start_with_backend(&self, backend: Box<dyn DetectorBackend>) -> Result<ScanHandle> {
        {
            let mut state = recover(self.state.lock());
            if *state == RunState::Running {
                return Err(InvalidStateError {
                    operation: "start a scan",
                    state: *state,
                }
                .into());
            }
            *state = RunState::Running;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let config = self.config.clone();
        let gateway = DetectorGateway::new(backend, config.retry);
        let store = self.store.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let (tx, rx) = mpsc::channel();

        let join = std::thread::Builder::new()
            .name("fieldscan-pipeline".to_string())
            .spawn(move || {
                let outcome = run_scan(config, gateway, store, cancel, &tx);
                let mut state = recover(state.lock());
                match &outcome {
                    Ok(summary) => {
                        *state = RunState::Completed;
                        let _ = tx.send(ScanEvent::Completed(summary.clone()));
                    }
                    Err(reason) => {
                        *state = RunState::Aborted;
                        let _ = tx.send(ScanEvent::Aborted {
                            reason: reason.clone(),
                        });
                    }
                }
                outcome
            })
            .map_err(|e| anyhow!("failed to spawn pipeline thread: {}", e))?;

        Ok(ScanHandle { events: rx, join })
    }

    /// Clear the store and remove the persisted output root contents.
    ///
    /// Valid while idle, completed, or aborted; rejected while running.
    pub fn reset(&self) -> Result<()> {
        {
            let state = recover(self.state.lock());
            if *state == RunState::Running {
                return Err(InvalidStateError {
                    operation: "reset",
                    state: *state,
                }
                .into());
            }
        }

        recover(self.store.lock()).clear()?;
        if self.config.output_root.exists() {
            FrameSink::new(&self.config.output_root)?.clear()?;
        }
        *recover(self.state.lock()) = RunState::Idle;
        log::info!(
            "pipeline reset: store cleared, output root {} emptied",
            self.config.output_root.display()
        );
        Ok(())
    }
}

// -------------------- Run loop --------------------

fn run_scan(
    config: ScanConfig,
    mut gateway: DetectorGateway,
    store: SharedStore,
    cancel: Arc<AtomicBool>,
    tx: &Sender<ScanEvent>,
) -> Result<ScanSummary, String> {
    let mut diagnostics = ScanDiagnostics::default();

    let track = TelemetryTrack::from_srt_file(&config.telemetry)
        .map_err(|e| format!("telemetry parsing failed: {}", e))?;
    diagnostics.telemetry_cues_skipped = track.skipped_cues();
    if track.is_empty() {
        log::warn!("telemetry track is empty; detections will carry no location");
    }

    let mut sampler = FrameSampler::open(SamplerConfig {
        source: config.video.clone(),
        interval_secs: config.interval_secs,
    })
    .map_err(|e| format!("failed to open video: {}", e))?;
    let total = sampler.total_frames();

    let sink =
        FrameSink::new(&config.output_root).map_err(|e| format!("output root: {}", e))?;
    let normalizer = Normalizer::new(config.min_confidence);

    log::info!(
        "scan started: {} frames at {}s interval, {} fixes, backend '{}'",
        total,
        config.interval_secs,
        track.len(),
        gateway.backend_name()
    );

    let mut processed = 0u32;
    loop {
        if cancel.load(Ordering::SeqCst) {
            log::info!("scan cancelled after {} of {} frames", processed, total);
            return Err("scan cancelled".to_string());
        }

        let frame = match sampler.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => return Err(e.to_string()),
        };
        let frame_index = frame.index;

        let location = match_fix(frame.timestamp, &track, config.max_skew);
        if location.is_none() {
            diagnostics.uncovered_frames += 1;
        }

        let image_path = sink.image_path(frame_index);
        let jpeg = encode_jpeg(&frame).map_err(|e| format!("frame encoding failed: {}", e))?;

        let mut frame_detections: Vec<Detection> = Vec::new();
        match gateway.detect(&jpeg, &config.categories) {
            DetectOutcome::Findings(findings) => {
                let ctx = FrameContext {
                    frame_index,
                    location,
                    image_path: image_path.to_string_lossy().into_owned(),
                };
                for finding in &findings {
                    match normalizer.normalize(finding, &ctx) {
                        NormalizeOutcome::Accepted {
                            detection,
                            bbox_unparsed,
                        } => {
                            if bbox_unparsed {
                                diagnostics.bbox_unparsed += 1;
                            }
                            frame_detections.push(detection);
                        }
                        NormalizeOutcome::BelowThreshold => {
                            diagnostics.below_threshold += 1;
                        }
                        NormalizeOutcome::UnrecognizedCategory => {
                            diagnostics.unrecognized_categories += 1;
                            log::debug!(
                                "frame {}: unrecognized category in {:?}",
                                frame_index,
                                finding.category
                            );
                        }
                    }
                }
            }
            DetectOutcome::Undetermined { attempts, reason } => {
                diagnostics.undetermined_frames += 1;
                log::warn!(
                    "frame {} undetermined after {} attempts: {}",
                    frame_index,
                    attempts,
                    reason
                );
            }
        }

        // Persist the annotated frame before the store append, so results on
        // disk never reference a missing image.
        if !frame_detections.is_empty() || config.persist_all_frames {
            let boxes: Vec<BoundingBox> =
                frame_detections.iter().filter_map(|d| d.bbox).collect();
            sink.persist(frame, &boxes)
                .map_err(|e| format!("failed to persist frame {}: {}", frame_index, e))?;
        }

        {
            let mut store = store
                .lock()
                .map_err(|_| "detection store lock poisoned".to_string())?;
            for detection in frame_detections {
                match store.append(&detection) {
                    Ok(true) => {
                        let _ = tx.send(ScanEvent::Finding(detection));
                    }
                    Ok(false) => {
                        log::debug!(
                            "frame {}: duplicate {} detection ignored",
                            frame_index,
                            detection.category
                        );
                    }
                    Err(e) => return Err(format!("failed to record detection: {}", e)),
                }
            }
        }

        processed += 1;
        diagnostics.decode_gaps = sampler.decode_gaps();
        let _ = tx.send(ScanEvent::Progress { processed, total });
    }

    diagnostics.decode_gaps = sampler.decode_gaps();

    let rows = {
        let store = store
            .lock()
            .map_err(|_| "detection store lock poisoned".to_string())?;
        store.snapshot().map_err(|e| e.to_string())?
    };
    let results_path = config.results_path();
    export::write_csv(&results_path, &rows).map_err(|e| e.to_string())?;

    log::info!(
        "scan completed: {} frames, {} detections, {} skipped items",
        processed,
        rows.len(),
        diagnostics.total_skipped()
    );

    Ok(ScanSummary {
        total_frames: total,
        processed_frames: processed,
        detections: rows.len(),
        diagnostics,
        results_path: Some(results_path),
    })
}
