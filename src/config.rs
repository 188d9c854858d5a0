//! Scan configuration.
//!
//! A `ScanConfig` is the immutable run configuration: it is loaded once
//! (JSON file pointed at by `FIELDSCAN_CONFIG`, then `FIELDSCAN_*`
//! environment overrides, then validation) and handed to the pipeline by
//! value for the duration of one scan. There is no process-wide mutable
//! output directory; the output root travels inside the config.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorBackend;
use crate::{CategorySet, Category};

const DEFAULT_INTERVAL_SECS: f64 = 1.0;
const DEFAULT_MAX_SKEW_SECS: f64 = 2.0;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.85;
const DEFAULT_OUTPUT_ROOT: &str = "field_output";
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;
const DEFAULT_HOSTED_ENDPOINT: &str = "https://api.fieldscan.example/v1/detect";
const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:11434/api/detect";

#[cfg(feature = "detect-http")]
const HOSTED_TIMEOUT: Duration = Duration::from_secs(30);
#[cfg(feature = "detect-http")]
const LOCAL_TIMEOUT: Duration = Duration::from_secs(120);

// -------------------- File shapes --------------------

#[derive(Debug, Deserialize, Default)]
struct ScanConfigFile {
    video: Option<String>,
    telemetry: Option<String>,
    interval_secs: Option<f64>,
    categories: Option<Vec<String>>,
    max_skew_secs: Option<f64>,
    min_confidence: Option<f32>,
    output_root: Option<String>,
    persist_all_frames: Option<bool>,
    db_path: Option<String>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    endpoint: Option<String>,
    retry_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

// -------------------- Run configuration --------------------

/// Which detector backend a scan talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendSelection {
    /// Scripted stub (tests, demo, dry runs).
    Stub,
    /// Remotely hosted model, bearer-token authenticated.
    Hosted,
    /// Self-hosted model server.
    Local,
}

impl BackendSelection {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "hosted" | "remote" => Ok(Self::Hosted),
            "local" => Ok(Self::Local),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub, hosted or local",
                other
            )),
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Stub => "",
            Self::Hosted => DEFAULT_HOSTED_ENDPOINT,
            Self::Local => DEFAULT_LOCAL_ENDPOINT,
        }
    }
}

/// Bounded-retry settings for detector calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Fast policy for tests: two attempts, millisecond backoff.
    pub fn for_tests() -> Self {
        Self {
            attempts: 2,
            base_delay_ms: 1,
        }
    }
}

/// Immutable configuration of one pipeline run.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Video source: local file path or `stub://...`.
    pub video: String,
    /// SRT telemetry file path.
    pub telemetry: PathBuf,
    /// Sampling interval in seconds (> 0).
    pub interval_secs: f64,
    pub categories: CategorySet,
    /// Maximum allowed frame/fix time skew.
    pub max_skew: Duration,
    /// Acceptance threshold for detection confidence.
    pub min_confidence: f32,
    /// Root directory for persisted frames and the results CSV.
    pub output_root: PathBuf,
    /// Persist every sampled frame, not only detection-bearing ones.
    pub persist_all_frames: bool,
    /// Sqlite path for the durable store; None keeps results in memory.
    pub db_path: Option<String>,
    pub backend: BackendSelection,
    pub endpoint: String,
    pub retry: RetryPolicy,
}

impl ScanConfig {
    /// A runnable default configuration for the given inputs.
    pub fn new(video: &str, telemetry: &Path) -> Self {
        Self {
            video: video.to_string(),
            telemetry: telemetry.to_path_buf(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            categories: CategorySet::single(Category::BareSpot),
            max_skew: Duration::from_secs_f64(DEFAULT_MAX_SKEW_SECS),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            persist_all_frames: false,
            db_path: None,
            backend: BackendSelection::Stub,
            endpoint: String::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Load from the `FIELDSCAN_CONFIG` file (when set) plus environment
    /// overrides, then validate.
    pub fn load() -> Result<Self> {
        let cfg = Self::load_partial()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load without validating, for callers that layer their own overrides
    /// (the CLI) before validation.
    pub fn load_partial() -> Result<Self> {
        let config_path = std::env::var("FIELDSCAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => ScanConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Result<Self> {
        let detector = file.detector.unwrap_or_default();
        let backend = match detector.backend.as_deref() {
            Some(value) => BackendSelection::parse(value)?,
            None => BackendSelection::Stub,
        };
        let categories = match file.categories {
            Some(labels) => CategorySet::from_labels(&labels.join(","))?,
            None => CategorySet::single(Category::BareSpot),
        };
        Ok(Self {
            video: file.video.unwrap_or_default(),
            telemetry: PathBuf::from(file.telemetry.unwrap_or_default()),
            interval_secs: file.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            categories,
            max_skew: crate::duration_from_secs_f64(
                file.max_skew_secs.unwrap_or(DEFAULT_MAX_SKEW_SECS),
            )?,
            min_confidence: file.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            output_root: PathBuf::from(
                file.output_root
                    .unwrap_or_else(|| DEFAULT_OUTPUT_ROOT.to_string()),
            ),
            persist_all_frames: file.persist_all_frames.unwrap_or(false),
            db_path: file.db_path,
            endpoint: detector
                .endpoint
                .unwrap_or_else(|| backend.default_endpoint().to_string()),
            backend,
            retry: RetryPolicy {
                attempts: detector.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
                base_delay_ms: detector
                    .retry_base_delay_ms
                    .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(video) = std::env::var("FIELDSCAN_VIDEO") {
            if !video.trim().is_empty() {
                self.video = video;
            }
        }
        if let Ok(telemetry) = std::env::var("FIELDSCAN_TELEMETRY") {
            if !telemetry.trim().is_empty() {
                self.telemetry = PathBuf::from(telemetry);
            }
        }
        if let Ok(interval) = std::env::var("FIELDSCAN_INTERVAL_SECS") {
            self.interval_secs = interval
                .parse()
                .map_err(|_| anyhow!("FIELDSCAN_INTERVAL_SECS must be a number of seconds"))?;
        }
        if let Ok(categories) = std::env::var("FIELDSCAN_CATEGORIES") {
            if !categories.trim().is_empty() {
                self.categories = CategorySet::from_labels(&categories)?;
            }
        }
        if let Ok(skew) = std::env::var("FIELDSCAN_MAX_SKEW_SECS") {
            let secs: f64 = skew
                .parse()
                .map_err(|_| anyhow!("FIELDSCAN_MAX_SKEW_SECS must be a number of seconds"))?;
            self.max_skew = crate::duration_from_secs_f64(secs)?;
        }
        if let Ok(confidence) = std::env::var("FIELDSCAN_MIN_CONFIDENCE") {
            self.min_confidence = confidence
                .parse()
                .map_err(|_| anyhow!("FIELDSCAN_MIN_CONFIDENCE must be a number"))?;
        }
        if let Ok(root) = std::env::var("FIELDSCAN_OUTPUT_ROOT") {
            if !root.trim().is_empty() {
                self.output_root = PathBuf::from(root);
            }
        }
        if let Ok(db_path) = std::env::var("FIELDSCAN_DB_PATH") {
            if !db_path.trim().is_empty() {
                self.db_path = Some(db_path);
            }
        }
        if let Ok(backend) = std::env::var("FIELDSCAN_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = BackendSelection::parse(&backend)?;
                if self.endpoint.is_empty() {
                    self.endpoint = self.backend.default_endpoint().to_string();
                }
            }
        }
        if let Ok(endpoint) = std::env::var("FIELDSCAN_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.endpoint = endpoint;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.video.trim().is_empty() {
            return Err(anyhow!("video source is required"));
        }
        if self.telemetry.as_os_str().is_empty() {
            return Err(anyhow!("telemetry file is required"));
        }
        if !(self.interval_secs.is_finite() && self.interval_secs > 0.0) {
            return Err(anyhow!(
                "sampling interval must be > 0 seconds, got {}",
                self.interval_secs
            ));
        }
        if self.categories.is_empty() {
            return Err(anyhow!("at least one category must be requested"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            ));
        }
        if self.backend != BackendSelection::Stub && self.endpoint.trim().is_empty() {
            return Err(anyhow!("detector endpoint is required for {:?}", self.backend));
        }
        Ok(())
    }

    /// Path of the results CSV inside the output root.
    pub fn results_path(&self) -> PathBuf {
        self.output_root.join("results.csv")
    }
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

// -------------------- Backend construction --------------------

/// Build the configured detector backend.
///
/// The hosted backend reads its bearer token from `FIELDSCAN_API_TOKEN`.
pub fn build_backend(config: &ScanConfig) -> Result<Box<dyn DetectorBackend>> {
    match config.backend {
        BackendSelection::Stub => Ok(Box::new(crate::detect::StubBackend::new())),
        BackendSelection::Hosted => {
            #[cfg(feature = "detect-http")]
            {
                let token = std::env::var("FIELDSCAN_API_TOKEN")
                    .map_err(|_| anyhow!("FIELDSCAN_API_TOKEN must be set for the hosted backend"))?;
                Ok(Box::new(crate::detect::HostedBackend::new(
                    &config.endpoint,
                    &token,
                    HOSTED_TIMEOUT,
                )?))
            }
            #[cfg(not(feature = "detect-http"))]
            {
                Err(anyhow!("the hosted backend requires the detect-http feature"))
            }
        }
        BackendSelection::Local => {
            #[cfg(feature = "detect-http")]
            {
                Ok(Box::new(crate::detect::LocalBackend::new(
                    &config.endpoint,
                    LOCAL_TIMEOUT,
                )?))
            }
            #[cfg(not(feature = "detect-http"))]
            {
                Err(anyhow!("the local backend requires the detect-http feature"))
            }
        }
    }
}
