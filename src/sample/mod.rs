//! Frame sampling.
//!
//! This module walks a flight video at a fixed temporal cadence and yields
//! one owned RGB frame per sampling interval:
//! - `stub://` sources generate deterministic synthetic frames (tests/demo)
//! - Real video files decode through FFmpeg (feature: video-ffmpeg)
//!
//! The sequence is lazy, finite, and non-restartable. The frame emitted for
//! target timestamp `index * interval` is the last decodable frame at or
//! before the target (rounding down); isolated decode failures are logged
//! gaps, while three consecutive failures are treated as a corrupt or
//! unsupported file and abort the scan.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;

#[cfg(feature = "video-ffmpeg")]
use self::ffmpeg::FfmpegSampler;

/// Consecutive decode failures tolerated before the file is declared bad.
pub const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 3;

/// One sampled frame with exclusive ownership of its pixel buffer.
///
/// Ownership passes from the sampler to the orchestrator on return and is
/// never shared concurrently.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    pub index: u32,
    /// Presentation timestamp, duration since video start.
    pub timestamp: Duration,
    /// RGB24 pixel data, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The video could not be decoded (corrupt or unsupported file).
///
/// Fatal: raised after `MAX_CONSECUTIVE_DECODE_FAILURES` back-to-back
/// failures, or when the container cannot be opened at all.
#[derive(Clone, Debug)]
pub struct VideoDecodeError {
    pub message: String,
}

impl fmt::Display for VideoDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video decode failed: {}", self.message)
    }
}

impl std::error::Error for VideoDecodeError {}

/// Configuration for a frame sampler.
#[derive(Clone, Debug)]
pub struct SamplerConfig {
    /// Video source: a local file path, or `stub://<name>?duration=N` for a
    /// synthetic source.
    pub source: String,
    /// Sampling interval in seconds (> 0).
    pub interval_secs: f64,
}

/// Frame sampler over a local video source.
pub struct FrameSampler {
    backend: SamplerBackend,
}

enum SamplerBackend {
    Synthetic(SyntheticSampler),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegSampler),
}

impl FrameSampler {
    pub fn open(config: SamplerConfig) -> Result<Self> {
        if !(config.interval_secs.is_finite() && config.interval_secs > 0.0) {
            return Err(anyhow!(
                "sampling interval must be a positive number of seconds, got {}",
                config.interval_secs
            ));
        }
        if !is_local_source(&config.source) {
            return Err(anyhow!(
                "video sampling only supports local paths (no URL schemes)"
            ));
        }
        if config.source.starts_with("stub://") {
            Ok(Self {
                backend: SamplerBackend::Synthetic(SyntheticSampler::open(config)?),
            })
        } else {
            #[cfg(feature = "video-ffmpeg")]
            {
                Ok(Self {
                    backend: SamplerBackend::Ffmpeg(FfmpegSampler::open(config)?),
                })
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                Err(anyhow!("video decoding requires the video-ffmpeg feature"))
            }
        }
    }

    /// Total frames the sampler will yield: `floor(duration / interval)`.
    pub fn total_frames(&self) -> u32 {
        match &self.backend {
            SamplerBackend::Synthetic(sampler) => sampler.total_frames(),
            #[cfg(feature = "video-ffmpeg")]
            SamplerBackend::Ffmpeg(sampler) => sampler.total_frames(),
        }
    }

    /// Yield the next sampled frame, or None once the sequence is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<SampledFrame>> {
        match &mut self.backend {
            SamplerBackend::Synthetic(sampler) => sampler.next_frame(),
            #[cfg(feature = "video-ffmpeg")]
            SamplerBackend::Ffmpeg(sampler) => sampler.next_frame(),
        }
    }

    /// Isolated decode failures skipped so far (logged gaps).
    pub fn decode_gaps(&self) -> u32 {
        match &self.backend {
            SamplerBackend::Synthetic(_) => 0,
            #[cfg(feature = "video-ffmpeg")]
            SamplerBackend::Ffmpeg(sampler) => sampler.decode_gaps(),
        }
    }
}

fn is_local_source(source: &str) -> bool {
    if source.trim().is_empty() {
        return false;
    }
    if source.starts_with("stub://") {
        return true;
    }
    !source.contains("://")
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and the demo
// ----------------------------------------------------------------------------

const DEFAULT_STUB_DURATION_SECS: f64 = 10.0;
const DEFAULT_STUB_WIDTH: u32 = 640;
const DEFAULT_STUB_HEIGHT: u32 = 480;

struct SyntheticSampler {
    interval_secs: f64,
    width: u32,
    height: u32,
    total: u32,
    next_index: u32,
}

impl SyntheticSampler {
    fn open(config: SamplerConfig) -> Result<Self> {
        let mut duration = DEFAULT_STUB_DURATION_SECS;
        let mut width = DEFAULT_STUB_WIDTH;
        let mut height = DEFAULT_STUB_HEIGHT;

        if let Some((_, query)) = config.source.split_once('?') {
            for pair in query.split('&') {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                match key {
                    "duration" => {
                        duration = value
                            .parse()
                            .map_err(|_| anyhow!("invalid stub duration '{}'", value))?;
                    }
                    "width" => {
                        width = value
                            .parse()
                            .map_err(|_| anyhow!("invalid stub width '{}'", value))?;
                    }
                    "height" => {
                        height = value
                            .parse()
                            .map_err(|_| anyhow!("invalid stub height '{}'", value))?;
                    }
                    other => {
                        return Err(anyhow!("unknown stub source parameter '{}'", other));
                    }
                }
            }
        }
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(anyhow!("stub duration must be non-negative"));
        }

        let total = (duration / config.interval_secs).floor() as u32;
        log::info!(
            "FrameSampler: synthetic source {} ({} frames at {}s interval)",
            config.source,
            total,
            config.interval_secs
        );
        Ok(Self {
            interval_secs: config.interval_secs,
            width,
            height,
            total,
            next_index: 0,
        })
    }

    fn total_frames(&self) -> u32 {
        self.total
    }

    fn next_frame(&mut self) -> Result<Option<SampledFrame>> {
        if self.next_index >= self.total {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(SampledFrame {
            index,
            timestamp: Duration::from_secs_f64(index as f64 * self.interval_secs),
            pixels: self.generate_pixels(index),
            width: self.width,
            height: self.height,
        }))
    }

    /// Deterministic gradient with a bright horizontal band that moves one
    /// row-block per frame, so consecutive frames differ predictably.
    fn generate_pixels(&self, index: u32) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let band_top = (index as usize * 16) % height.max(1);
        let mut pixels = vec![0u8; width * height * 3];
        for y in 0..height {
            let in_band = y >= band_top && y < (band_top + 8).min(height);
            for x in 0..width {
                let base = (y * width + x) * 3;
                pixels[base] = ((x * 255) / width.max(1)) as u8;
                pixels[base + 1] = if in_band { 255 } else { ((y * 255) / height.max(1)) as u8 };
                pixels[base + 2] = (index % 256) as u8;
            }
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_sampler_yields_floor_duration_over_interval() {
        let mut sampler = FrameSampler::open(SamplerConfig {
            source: "stub://flight?duration=10".to_string(),
            interval_secs: 1.0,
        })
        .unwrap();
        assert_eq!(sampler.total_frames(), 10);

        let mut frames = Vec::new();
        while let Some(frame) = sampler.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 10);
        assert_eq!(frames[5].index, 5);
        assert_eq!(frames[5].timestamp, Duration::from_secs(5));
        assert_eq!(
            frames[5].pixels.len(),
            (frames[5].width * frames[5].height * 3) as usize
        );
    }

    #[test]
    fn synthetic_sampler_respects_fractional_intervals() {
        let sampler = FrameSampler::open(SamplerConfig {
            source: "stub://flight?duration=5&width=64&height=48".to_string(),
            interval_secs: 0.5,
        })
        .unwrap();
        assert_eq!(sampler.total_frames(), 10);
    }

    #[test]
    fn sampler_is_not_restartable() {
        let mut sampler = FrameSampler::open(SamplerConfig {
            source: "stub://flight?duration=2".to_string(),
            interval_secs: 1.0,
        })
        .unwrap();
        while sampler.next_frame().unwrap().is_some() {}
        assert!(sampler.next_frame().unwrap().is_none());
        assert!(sampler.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_bad_intervals_and_remote_sources() {
        assert!(FrameSampler::open(SamplerConfig {
            source: "stub://x".into(),
            interval_secs: 0.0,
        })
        .is_err());
        assert!(FrameSampler::open(SamplerConfig {
            source: "rtsp://camera/stream".into(),
            interval_secs: 1.0,
        })
        .is_err());
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut sampler = FrameSampler::open(SamplerConfig {
            source: "stub://flight?duration=2&width=64&height=64".to_string(),
            interval_secs: 1.0,
        })
        .unwrap();
        let a = sampler.next_frame().unwrap().unwrap();
        let b = sampler.next_frame().unwrap().unwrap();
        assert_ne!(a.pixels, b.pixels);
    }
}
