//! Frame / telemetry correlation.
//!
//! Binds a sampled frame timestamp to the temporally-nearest GPS fix. The
//! track is monotonic by construction (enforced at parse time), so the
//! nearest fix is found with a binary search rather than a linear scan.
//!
//! Policy:
//! - Equidistant neighbors resolve to the earlier fix (deterministic)
//! - A nearest fix further away than `max_skew` yields None, not an error;
//!   frames before the first or after the last cue are an expected shape at
//!   the edges of a flight log

use std::time::Duration;

use crate::telemetry::{TelemetryFix, TelemetryTrack};

/// Find the fix minimizing |fix.offset - timestamp|, within `max_skew`.
pub fn match_fix(
    timestamp: Duration,
    track: &TelemetryTrack,
    max_skew: Duration,
) -> Option<TelemetryFix> {
    let fixes = track.fixes();
    if fixes.is_empty() {
        return None;
    }

    // First fix strictly after the frame timestamp.
    let upper = fixes.partition_point(|fix| fix.offset <= timestamp);

    let candidate = if upper == 0 {
        fixes[0]
    } else if upper == fixes.len() {
        fixes[upper - 1]
    } else {
        let earlier = fixes[upper - 1];
        let later = fixes[upper];
        let d_earlier = timestamp - earlier.offset;
        let d_later = later.offset - timestamp;
        // Tie-break: the earlier fix wins.
        if d_earlier <= d_later {
            earlier
        } else {
            later
        }
    };

    let skew = if candidate.offset > timestamp {
        candidate.offset - timestamp
    } else {
        timestamp - candidate.offset
    };
    if skew > max_skew {
        return None;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_at(offsets_secs: &[u64]) -> TelemetryTrack {
        let mut srt = String::new();
        for (i, secs) in offsets_secs.iter().enumerate() {
            srt.push_str(&format!(
                "{}\n00:00:{:02},000 --> 00:00:{:02},000\nlat: {} lon: 20.0\n\n",
                i + 1,
                secs,
                secs + 1,
                10.0 + *secs as f64
            ));
        }
        TelemetryTrack::from_srt_str(&srt).unwrap()
    }

    #[test]
    fn equidistant_frame_resolves_to_earlier_fix() {
        let track = track_at(&[0, 2]);
        let fix = match_fix(Duration::from_secs(1), &track, Duration::from_secs(5)).unwrap();
        assert_eq!(fix.offset, Duration::from_secs(0));
    }

    #[test]
    fn nearest_fix_wins_when_not_tied() {
        let track = track_at(&[0, 2, 10]);
        let fix =
            match_fix(Duration::from_millis(1800), &track, Duration::from_secs(5)).unwrap();
        assert_eq!(fix.offset, Duration::from_secs(2));
    }

    #[test]
    fn excess_skew_yields_none() {
        let track = track_at(&[0, 1, 2]);
        assert!(match_fix(Duration::from_secs(30), &track, Duration::from_secs(2)).is_none());
        // Before the first cue, same policy.
        let late_track = track_at(&[50, 51]);
        assert!(
            match_fix(Duration::from_secs(0), &late_track, Duration::from_secs(2)).is_none()
        );
    }

    #[test]
    fn edge_frames_match_when_within_skew() {
        let track = track_at(&[5, 6, 7]);
        let fix = match_fix(Duration::from_secs(4), &track, Duration::from_secs(2)).unwrap();
        assert_eq!(fix.offset, Duration::from_secs(5));
        let fix = match_fix(Duration::from_secs(8), &track, Duration::from_secs(2)).unwrap();
        assert_eq!(fix.offset, Duration::from_secs(7));
    }

    #[test]
    fn empty_track_yields_none() {
        let track = TelemetryTrack::default();
        assert!(match_fix(Duration::from_secs(1), &track, Duration::from_secs(2)).is_none());
    }

    #[test]
    fn exact_match_is_returned() {
        let track = track_at(&[0, 1, 2, 3]);
        let fix = match_fix(Duration::from_secs(2), &track, Duration::from_millis(100)).unwrap();
        assert_eq!(fix.offset, Duration::from_secs(2));
    }
}
