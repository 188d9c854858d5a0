//! Field Scan Kernel
//!
//! This crate implements the core pipeline for analyzing drone field footage:
//! it samples frames from a flight video at a fixed cadence, binds each frame
//! to the temporally-nearest GPS fix from the companion SRT telemetry track,
//! submits frames to a pluggable visual-detection backend, normalizes the
//! backend's free-form findings into canonical detection records, and
//! assembles a deduplicated, exportable result set.
//!
//! # Architecture
//!
//! - `telemetry`: SRT subtitle parsing into an ordered GPS fix track
//! - `sample`: frame extraction at `index * interval` timestamps
//! - `correlate`: nearest-fix matching with a bounded time skew
//! - `detect`: detector backend capability, HTTP/stub backends, retrying gateway
//! - `normalize`: untrusted finding -> canonical `Detection` validation
//! - `annotate`: bounding-box burn-in and deterministic frame persistence
//! - `store`: insertion-ordered, deduplicated detection stores (memory/sqlite)
//! - `export`: stable-column CSV export and reparse
//! - `pipeline`: background scan orchestration, progress events, cancellation
//!
//! The pipeline runs on a single dedicated thread per scan; the foreground
//! consumer receives progress and completion events over a channel and never
//! blocks on detection latency. Detector calls are sequential to bound
//! backend load.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod annotate;
pub mod config;
pub mod correlate;
pub mod detect;
pub mod export;
pub mod normalize;
pub mod pipeline;
pub mod sample;
pub mod store;
pub mod telemetry;

pub use config::{BackendSelection, RetryPolicy, ScanConfig};
pub use detect::{
    DetectOutcome, DetectorBackend, DetectorError, DetectorGateway, RawFinding, StubBackend,
};
pub use normalize::{FrameContext, NormalizeOutcome, Normalizer};
pub use pipeline::{InvalidStateError, Pipeline, RunState, ScanEvent, ScanHandle, ScanSummary};
pub use sample::{FrameSampler, SampledFrame, SamplerConfig, VideoDecodeError};
pub use store::{DetectionStore, InMemoryDetectionStore, SqliteDetectionStore};
pub use telemetry::{TelemetryFix, TelemetryFormatError, TelemetryOrderError, TelemetryTrack};

// -------------------- Categories --------------------

/// Agronomic conditions the detector is asked to classify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BareSpot,
    Animal,
    Weed,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::BareSpot, Category::Animal, Category::Weed];

    /// Stable token used in exports, storage, and request directives.
    pub fn label(&self) -> &'static str {
        match self {
            Category::BareSpot => "bare_spot",
            Category::Animal => "animal",
            Category::Weed => "weed",
        }
    }

    /// Parse the stable token form (the reverse of `label`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "bare_spot" | "bare spot" | "bare-spot" => Some(Category::BareSpot),
            "animal" => Some(Category::Animal),
            "weed" | "weeds" => Some(Category::Weed),
            _ => None,
        }
    }

    /// Short directive sent to the detection backend describing what to look
    /// for under this category.
    pub fn directive(&self) -> &'static str {
        match self {
            Category::BareSpot => {
                "bare spots: clearly visible patches of exposed soil with no crop growth"
            }
            Category::Animal => "animals: clearly visible animals such as deer, birds or rabbits",
            Category::Weed => {
                "weeds: green vegetation that visually contrasts with the surrounding crop"
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered, deduplicated, non-empty set of requested categories.
///
/// Order is preserved so request directives and exports are stable across
/// runs with the same configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorySet {
    members: Vec<Category>,
}

impl CategorySet {
    pub fn new(categories: &[Category]) -> anyhow::Result<Self> {
        let mut members = Vec::new();
        for cat in categories {
            if !members.contains(cat) {
                members.push(*cat);
            }
        }
        if members.is_empty() {
            return Err(anyhow::anyhow!("category set must not be empty"));
        }
        Ok(Self { members })
    }

    pub fn all() -> Self {
        Self {
            members: Category::ALL.to_vec(),
        }
    }

    pub fn single(category: Category) -> Self {
        Self {
            members: vec![category],
        }
    }

    /// Parse a comma-separated list of category tokens.
    pub fn from_labels(value: &str) -> anyhow::Result<Self> {
        let mut members = Vec::new();
        for entry in value.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let cat = Category::from_label(entry)
                .ok_or_else(|| anyhow::anyhow!("unknown category '{}'", entry))?;
            if !members.contains(&cat) {
                members.push(cat);
            }
        }
        if members.is_empty() {
            return Err(anyhow::anyhow!("category list '{}' is empty", value));
        }
        Ok(Self { members })
    }

    pub fn contains(&self, cat: Category) -> bool {
        self.members.contains(&cat)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Comma-joined stable tokens, e.g. `bare_spot,weed` (query-string form).
    pub fn query_value(&self) -> String {
        let labels: Vec<&str> = self.members.iter().map(|c| c.label()).collect();
        labels.join(",")
    }

    /// Newline-joined detection directives for the request payload.
    pub fn directive_text(&self) -> String {
        let lines: Vec<&str> = self.members.iter().map(|c| c.directive()).collect();
        lines.join("\n")
    }
}

// -------------------- Bounding boxes --------------------

/// Axis-aligned rectangle in frame-pixel coordinates, `x1 <= x2`, `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Build from possibly-unordered corner coordinates.
    pub fn from_corners(ax: i64, ay: i64, bx: i64, by: i64) -> Option<Self> {
        let (x1, x2) = if ax <= bx { (ax, bx) } else { (bx, ax) };
        let (y1, y2) = if ay <= by { (ay, by) } else { (by, ay) };
        if x1 < 0 || y1 < 0 || x2 > u32::MAX as i64 || y2 > u32::MAX as i64 {
            return None;
        }
        Some(Self {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        })
    }

    /// Clamp to frame dimensions; returns None when the box lies entirely
    /// outside the frame or has zero area after clamping.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 || self.x1 >= width || self.y1 >= height {
            return None;
        }
        let clamped = Self {
            x1: self.x1,
            y1: self.y1,
            x2: self.x2.min(width - 1),
            y2: self.y2.min(height - 1),
        };
        if clamped.x1 >= clamped.x2 || clamped.y1 >= clamped.y2 {
            return None;
        }
        Some(clamped)
    }

    /// Stable single-field encoding used in CSV exports and dedup keys.
    pub fn to_field(&self) -> String {
        format!("{} {} {} {}", self.x1, self.y1, self.x2, self.y2)
    }

    pub fn from_field(field: &str) -> Option<Self> {
        let mut parts = field.split_whitespace();
        let x1 = parts.next()?.parse().ok()?;
        let y1 = parts.next()?.parse().ok()?;
        let x2 = parts.next()?.parse().ok()?;
        let y2 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { x1, y1, x2, y2 })
    }
}

// -------------------- Detections --------------------

/// A validated, canonical record of one classified, geotagged finding.
///
/// Created by the normalizer after validating a raw backend finding;
/// immutable after creation; owned by the result store.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub category: Category,
    /// Always within [0, 1] after normalization.
    pub confidence: f32,
    /// Pixel-coordinate box, when the backend supplied a parseable one.
    pub bbox: Option<BoundingBox>,
    /// Nearest telemetry fix, when the frame fell within coverage and skew.
    pub location: Option<TelemetryFix>,
    pub source_frame_index: u32,
    /// Path of the persisted (annotated) frame image.
    pub image_path: String,
    /// Free-form description carried through from the backend, if any.
    pub detail: Option<String>,
}

impl Detection {
    /// Dedup key: at most one detection per (frame, category, bbox).
    pub fn dedup_key(&self) -> (u32, Category, String) {
        let bbox = self.bbox.map(|b| b.to_field()).unwrap_or_default();
        (self.source_frame_index, self.category, bbox)
    }
}

// -------------------- Scan diagnostics --------------------

/// Counters for everything the pipeline skipped or degraded without aborting.
///
/// No error is swallowed without incrementing one of these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanDiagnostics {
    /// Individual frame decode failures below the consecutive-failure bound.
    pub decode_gaps: u32,
    /// Frames whose detector call exhausted its retries.
    pub undetermined_frames: u32,
    /// Frames with no telemetry fix within the allowed skew.
    pub uncovered_frames: u32,
    /// Telemetry cues with no recognizable coordinate pair.
    pub telemetry_cues_skipped: u32,
    /// Findings whose category could not be mapped to the closed enum.
    pub unrecognized_categories: u32,
    /// Findings dropped below the confidence threshold (silent-by-design).
    pub below_threshold: u32,
    /// Accepted findings whose bounding box text could not be parsed.
    pub bbox_unparsed: u32,
}

impl ScanDiagnostics {
    pub fn total_skipped(&self) -> u32 {
        self.decode_gaps
            + self.undetermined_frames
            + self.unrecognized_categories
            + self.below_threshold
    }
}

// -------------------- Duration helpers --------------------

/// Fractional seconds -> Duration, rejecting non-finite and negative input.
pub(crate) fn duration_from_secs_f64(secs: f64) -> anyhow::Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow::anyhow!("invalid duration: {}", secs));
    }
    Ok(Duration::from_secs_f64(secs))
}
