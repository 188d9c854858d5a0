//! SRT telemetry track parsing.
//!
//! Drone recorders burn per-second GPS telemetry into the subtitle track of
//! the flight video. This module parses that `.srt` text into an ordered
//! sequence of timestamped fixes:
//! - Cue start offsets (video-relative, not wall-clock) become fix timestamps
//! - Cue bodies are scanned with a tolerant, rule-ordered coordinate match,
//!   since field labels and ordering vary across recorder firmwares
//! - A cue with no recognizable coordinate pair is skipped and counted; the
//!   scan proceeds in degraded mode because partial coverage is common
//! - Non-monotonic cue timestamps invalidate nearest-fix correlation and are
//!   fatal

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

/// A single timestamped GPS coordinate reading.
///
/// `offset` is the duration since video start, taken from the cue start time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryFix {
    pub offset: Duration,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

// -------------------- Errors --------------------

/// A subtitle cue carried no recognizable coordinate pair.
///
/// Recoverable: the track parser counts the cue and continues.
#[derive(Clone, Debug)]
pub struct TelemetryFormatError {
    pub cue_index: usize,
}

impl fmt::Display for TelemetryFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "telemetry cue #{} carries no recognizable coordinate pair",
            self.cue_index
        )
    }
}

impl std::error::Error for TelemetryFormatError {}

/// Cue timestamps went backwards.
///
/// Fatal: the correlator's binary search assumes a monotonic track.
#[derive(Clone, Debug)]
pub struct TelemetryOrderError {
    pub cue_index: usize,
    pub previous_ms: u64,
    pub current_ms: u64,
}

impl fmt::Display for TelemetryOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "telemetry cue #{} starts at {}ms, before the preceding cue at {}ms",
            self.cue_index, self.current_ms, self.previous_ms
        )
    }
}

impl std::error::Error for TelemetryOrderError {}

// -------------------- Track --------------------

/// Ordered sequence of telemetry fixes parsed from one SRT file.
#[derive(Clone, Debug, Default)]
pub struct TelemetryTrack {
    fixes: Vec<TelemetryFix>,
    skipped_cues: u32,
}

impl TelemetryTrack {
    pub fn from_srt_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read telemetry file {}", path.display()))?;
        Self::from_srt_str(&text)
    }

    /// Parse SRT text into a track.
    ///
    /// Cues without coordinates are counted in `skipped_cues` and logged;
    /// a timestamp decrease fails the whole parse with `TelemetryOrderError`.
    pub fn from_srt_str(text: &str) -> Result<Self> {
        let mut fixes: Vec<TelemetryFix> = Vec::new();
        let mut skipped_cues = 0u32;
        let mut cue_index = 0usize;

        for block in split_cue_blocks(text) {
            let Some((start_ms, body)) = parse_cue_block(&block) else {
                continue;
            };
            cue_index += 1;

            if let Some(last) = fixes.last() {
                let previous_ms = last.offset.as_millis() as u64;
                if start_ms < previous_ms {
                    return Err(TelemetryOrderError {
                        cue_index,
                        previous_ms,
                        current_ms: start_ms,
                    }
                    .into());
                }
            }

            match parse_cue_coordinates(&body, cue_index) {
                Ok((latitude, longitude, altitude)) => {
                    fixes.push(TelemetryFix {
                        offset: Duration::from_millis(start_ms),
                        latitude,
                        longitude,
                        altitude,
                    });
                }
                Err(err) => {
                    log::warn!("{}; continuing in degraded mode", err);
                    skipped_cues += 1;
                }
            }
        }

        Ok(Self {
            fixes,
            skipped_cues,
        })
    }

    pub fn fixes(&self) -> &[TelemetryFix] {
        &self.fixes
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Cues that carried no coordinates and were skipped during parsing.
    pub fn skipped_cues(&self) -> u32 {
        self.skipped_cues
    }

    /// Chronological (latitude, longitude) pairs for flight-path rendering.
    pub fn path_points(&self) -> Vec<(f64, f64)> {
        self.fixes
            .iter()
            .map(|fix| (fix.latitude, fix.longitude))
            .collect()
    }
}

// -------------------- Cue parsing --------------------

fn timing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->").unwrap()
    })
}

/// Split SRT text into cue blocks on blank lines, tolerating CRLF endings.
fn split_cue_blocks(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

/// Extract the cue start offset (ms) and the joined body text of one block.
/// Blocks without a timing line are not cues and yield None.
fn parse_cue_block(block: &str) -> Option<(u64, String)> {
    let mut lines = block.lines();
    let mut start_ms = None;
    for line in lines.by_ref() {
        if let Some(caps) = timing_re().captures(line) {
            let hours: u64 = caps[1].parse().ok()?;
            let minutes: u64 = caps[2].parse().ok()?;
            let seconds: u64 = caps[3].parse().ok()?;
            let millis: u64 = caps[4].parse().ok()?;
            start_ms = Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis);
            break;
        }
    }
    let start_ms = start_ms?;
    let body = lines.collect::<Vec<_>>().join(" ");
    Some((start_ms, body))
}

fn labeled_lat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:latitude|lat)\b\s*[:=]?\s*(-?\d+(?:\.\d+)?)").unwrap()
    })
}

fn labeled_lon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:longitude|long|lon|lng)\b\s*[:=]?\s*(-?\d+(?:\.\d+)?)").unwrap()
    })
}

fn labeled_alt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:altitude|abs_alt|rel_alt|alt)\b\s*[:=]?\s*(-?\d+(?:\.\d+)?)")
            .unwrap()
    })
}

fn gps_tuple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\bGPS\s*\(\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)(?:\s*,\s*(-?\d+(?:\.\d+)?))?\s*\)",
        )
        .unwrap()
    })
}

fn bare_decimal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+\.\d+").unwrap())
}

/// Scan one cue body for a coordinate pair.
///
/// Rules are ordered most-specific first:
/// 1. labeled fields (`latitude: ..` / `lon: ..` in any order)
/// 2. a `GPS(lat, lon[, alt])` tuple
/// 3. fallback: the first two signed decimals in the body
pub fn parse_cue_coordinates(
    body: &str,
    cue_index: usize,
) -> std::result::Result<(f64, f64, Option<f64>), TelemetryFormatError> {
    let altitude = labeled_alt_re()
        .captures(body)
        .and_then(|caps| caps[1].parse::<f64>().ok());

    if let (Some(lat), Some(lon)) = (
        labeled_lat_re().captures(body),
        labeled_lon_re().captures(body),
    ) {
        if let (Ok(lat), Ok(lon)) = (lat[1].parse::<f64>(), lon[1].parse::<f64>()) {
            return Ok((lat, lon, altitude));
        }
    }

    if let Some(caps) = gps_tuple_re().captures(body) {
        if let (Ok(lat), Ok(lon)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) {
            let tuple_alt = caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok());
            return Ok((lat, lon, altitude.or(tuple_alt)));
        }
    }

    let decimals: Vec<f64> = bare_decimal_re()
        .find_iter(body)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();
    if decimals.len() >= 2 {
        return Ok((decimals[0], decimals[1], altitude));
    }

    Err(TelemetryFormatError { cue_index })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srt_cue(index: usize, start_secs: u64, body: &str) -> String {
        format!(
            "{}\n00:00:{:02},000 --> 00:00:{:02},000\n{}\n\n",
            index,
            start_secs,
            start_secs + 1,
            body
        )
    }

    #[test]
    fn parses_labeled_coordinates() {
        let (lat, lon, alt) =
            parse_cue_coordinates("[latitude: 48.856613] [longitude: 2.352222] [altitude: 98.7]", 1)
                .unwrap();
        assert_eq!(lat, 48.856613);
        assert_eq!(lon, 2.352222);
        assert_eq!(alt, Some(98.7));
    }

    #[test]
    fn parses_gps_tuple() {
        let (lat, lon, alt) = parse_cue_coordinates("F/2.8 GPS(52.520008, 13.404954, 112) ISO 100", 1).unwrap();
        assert_eq!(lat, 52.520008);
        assert_eq!(lon, 13.404954);
        assert_eq!(alt, Some(112.0));
    }

    #[test]
    fn falls_back_to_bare_decimals() {
        let (lat, lon, alt) = parse_cue_coordinates("HOME 40.712776 -74.005974 D 12.0m", 1).unwrap();
        assert_eq!(lat, 40.712776);
        assert_eq!(lon, -74.005974);
        assert_eq!(alt, None);
    }

    #[test]
    fn rejects_cue_without_coordinates() {
        let err = parse_cue_coordinates("ISO 100 SHUTTER 1/500", 7).unwrap_err();
        assert_eq!(err.cue_index, 7);
    }

    #[test]
    fn track_parses_in_file_order() {
        let mut srt = String::new();
        for i in 0..5u64 {
            srt.push_str(&srt_cue(
                i as usize + 1,
                i,
                &format!("latitude: {} longitude: {}", 48.0 + i as f64 * 0.001, 2.0),
            ));
        }
        let track = TelemetryTrack::from_srt_str(&srt).unwrap();
        assert_eq!(track.len(), 5);
        assert_eq!(track.skipped_cues(), 0);
        for (i, fix) in track.fixes().iter().enumerate() {
            assert_eq!(fix.offset, Duration::from_secs(i as u64));
        }
    }

    #[test]
    fn generated_monotonic_tracks_stay_non_decreasing() {
        // Deterministic sweep over cue spacings; the parsed track must keep
        // offsets non-decreasing whenever the input does.
        for step in 1..8u64 {
            let mut srt = String::new();
            let mut t = 0;
            for i in 0..20 {
                srt.push_str(&srt_cue(i + 1, t, "lat: 10.0 lon: 20.0"));
                t += step % 3; // includes zero steps: equal offsets are legal
            }
            let track = TelemetryTrack::from_srt_str(&srt).unwrap();
            for pair in track.fixes().windows(2) {
                assert!(pair[0].offset <= pair[1].offset);
            }
        }
    }

    #[test]
    fn out_of_order_cue_is_fatal() {
        let mut srt = String::new();
        srt.push_str(&srt_cue(1, 5, "lat: 10.0 lon: 20.0"));
        srt.push_str(&srt_cue(2, 3, "lat: 10.0 lon: 20.0"));
        let err = TelemetryTrack::from_srt_str(&srt).unwrap_err();
        let order = err.downcast_ref::<TelemetryOrderError>().expect("order error");
        assert_eq!(order.cue_index, 2);
        assert_eq!(order.previous_ms, 5000);
        assert_eq!(order.current_ms, 3000);
    }

    #[test]
    fn equal_offsets_are_tolerated() {
        let mut srt = String::new();
        srt.push_str(&srt_cue(1, 4, "lat: 10.0 lon: 20.0"));
        srt.push_str(&srt_cue(2, 4, "lat: 10.1 lon: 20.1"));
        let track = TelemetryTrack::from_srt_str(&srt).unwrap();
        assert_eq!(track.len(), 2);
    }

    #[test]
    fn cue_without_coordinates_degrades() {
        let mut srt = String::new();
        srt.push_str(&srt_cue(1, 0, "lat: 10.0 lon: 20.0"));
        srt.push_str(&srt_cue(2, 1, "SHUTTER 1/500 ISO 100"));
        srt.push_str(&srt_cue(3, 2, "lat: 10.2 lon: 20.2"));
        let track = TelemetryTrack::from_srt_str(&srt).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.skipped_cues(), 1);
    }

    #[test]
    fn crlf_and_numeric_noise_are_tolerated() {
        let srt = "1\r\n00:00:00,000 --> 00:00:01,000\r\nGPS(48.1, 11.5) H 120.0m\r\n\r\n";
        let track = TelemetryTrack::from_srt_str(srt).unwrap();
        assert_eq!(track.len(), 1);
        assert_eq!(track.fixes()[0].latitude, 48.1);
    }
}
