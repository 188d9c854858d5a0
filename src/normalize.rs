//! Response normalization.
//!
//! Turns the untrusted, free-form output of a detection backend into the
//! closed, typed `Detection` schema. This is a tolerant, rule-ordered parser
//! with an explicit "unparseable" terminal outcome per field; one bad field
//! never invalidates an otherwise-valid finding:
//! - Category text maps through a fixed synonym table (case-insensitive
//!   exact, then substring); unmappable findings are dropped and counted
//! - Confidence is coerced into [0, 1]; non-numeric or missing confidence
//!   defaults to the configured acceptance threshold; below-threshold
//!   findings are dropped silently (the product reports only clear findings)
//! - Bounding boxes are parsed from several tolerated shapes; a parse
//!   failure keeps the detection and nulls the box
//!
//! Normalization is pure: the same raw finding yields the same outcome.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::detect::RawFinding;
use crate::telemetry::TelemetryFix;
use crate::{BoundingBox, Category, Detection};

/// Per-frame context a detection is stamped with.
#[derive(Clone, Debug)]
pub struct FrameContext {
    pub frame_index: u32,
    pub location: Option<TelemetryFix>,
    pub image_path: String,
}

/// Terminal outcome of normalizing one raw finding.
#[derive(Clone, Debug)]
pub enum NormalizeOutcome {
    Accepted {
        detection: Detection,
        /// The finding carried a bounding box we could not parse.
        bbox_unparsed: bool,
    },
    /// Confidence below the acceptance threshold; dropped silently.
    BelowThreshold,
    /// Category text did not map into the closed enum; dropped and counted.
    UnrecognizedCategory,
}

/// Fixed synonym table mapping free-form labels to the closed category enum.
const SYNONYMS: &[(Category, &[&str])] = &[
    (
        Category::BareSpot,
        &[
            "bare_spot",
            "bare spot",
            "bare spots",
            "barespot",
            "bare soil",
            "bare patch",
            "exposed soil",
            "soil patch",
        ],
    ),
    (
        Category::Animal,
        &[
            "animal", "animals", "wildlife", "fauna", "deer", "bird", "rabbit", "hare", "fox",
        ],
    ),
    (
        Category::Weed,
        &["weed", "weeds", "weed patch", "vegetation anomaly"],
    ),
];

pub struct Normalizer {
    min_confidence: f32,
}

impl Normalizer {
    pub fn new(min_confidence: f32) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Validate and convert one raw finding.
    pub fn normalize(&self, finding: &RawFinding, ctx: &FrameContext) -> NormalizeOutcome {
        let raw_text = finding.raw_text.as_deref();

        let category = finding
            .category
            .as_deref()
            .and_then(map_category)
            .or_else(|| raw_text.and_then(map_category));
        let Some(category) = category else {
            return NormalizeOutcome::UnrecognizedCategory;
        };

        let confidence = finding
            .confidence
            .as_ref()
            .and_then(coerce_confidence)
            .or_else(|| raw_text.and_then(confidence_from_text))
            .unwrap_or(self.min_confidence);
        if confidence < self.min_confidence {
            return NormalizeOutcome::BelowThreshold;
        }

        let (bbox, bbox_unparsed) = match &finding.bbox {
            Some(value) => match parse_bbox(value) {
                Some(bbox) => (Some(bbox), false),
                None => (None, true),
            },
            None => (raw_text.and_then(bbox_from_prose), false),
        };

        let detail = finding
            .detail
            .clone()
            .or_else(|| raw_text.map(str::to_string));

        NormalizeOutcome::Accepted {
            detection: Detection {
                category,
                confidence,
                bbox,
                location: ctx.location,
                source_frame_index: ctx.frame_index,
                image_path: ctx.image_path.clone(),
                detail,
            },
            bbox_unparsed,
        }
    }
}

// -------------------- Category mapping --------------------

/// Map free-form category text via the synonym table.
///
/// Exact (case-insensitive) matches win; otherwise the text may contain a
/// synonym ("a large bare spot near the gate"), or — for inputs of at least
/// four characters — be a prefix-like fragment of one ("bare").
pub fn map_category(text: &str) -> Option<Category> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    for (category, synonyms) in SYNONYMS {
        if synonyms.iter().any(|s| *s == needle) {
            return Some(*category);
        }
    }
    for (category, synonyms) in SYNONYMS {
        if synonyms.iter().any(|s| needle.contains(s)) {
            return Some(*category);
        }
    }
    if needle.len() >= 4 {
        for (category, synonyms) in SYNONYMS {
            if synonyms.iter().any(|s| s.contains(needle.as_str())) {
                return Some(*category);
            }
        }
    }
    None
}

// -------------------- Confidence coercion --------------------

/// Coerce a JSON confidence value into [0, 1]; None when non-numeric.
pub fn coerce_confidence(value: &Value) -> Option<f32> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(stripped) = s.strip_suffix('%') {
                stripped.trim().parse::<f64>().ok().map(|v| v / 100.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    }?;
    if !number.is_finite() {
        return None;
    }
    // Models occasionally report percentages as bare numbers (e.g. 87).
    let number = if number > 1.0 && number <= 100.0 {
        number / 100.0
    } else {
        number
    };
    Some(number.clamp(0.0, 1.0) as f32)
}

fn confidence_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:confidence|score|probability)\b\D{0,12}?(\d+(?:\.\d+)?)(\s*%)?")
            .unwrap()
    })
}

/// Pull a labeled confidence out of free response text.
fn confidence_from_text(text: &str) -> Option<f32> {
    let caps = confidence_text_re().captures(text)?;
    let mut number: f64 = caps[1].parse().ok()?;
    if caps.get(2).is_some() || (number > 1.0 && number <= 100.0) {
        number /= 100.0;
    }
    if !number.is_finite() {
        return None;
    }
    Some(number.clamp(0.0, 1.0) as f32)
}

// -------------------- Bounding box parsing --------------------

/// Parse a bounding box from the shapes models have been observed to emit:
/// `[x1, y1, x2, y2]` arrays, `{x, y, w, h}` / `{x1, y1, x2, y2}` /
/// `{left, top, right, bottom}` objects, and `"x1, y1, x2, y2"` text.
pub fn parse_bbox(value: &Value) -> Option<BoundingBox> {
    match value {
        Value::Array(items) => {
            if items.len() != 4 {
                return None;
            }
            let coords: Vec<i64> = items.iter().filter_map(value_as_i64).collect();
            if coords.len() != 4 {
                return None;
            }
            BoundingBox::from_corners(coords[0], coords[1], coords[2], coords[3])
        }
        Value::Object(map) => {
            let get = |key: &str| map.get(key).and_then(value_as_i64);
            if let (Some(x1), Some(y1), Some(x2), Some(y2)) =
                (get("x1"), get("y1"), get("x2"), get("y2"))
            {
                return BoundingBox::from_corners(x1, y1, x2, y2);
            }
            if let (Some(left), Some(top), Some(right), Some(bottom)) =
                (get("left"), get("top"), get("right"), get("bottom"))
            {
                return BoundingBox::from_corners(left, top, right, bottom);
            }
            let width = get("w").or_else(|| get("width"));
            let height = get("h").or_else(|| get("height"));
            if let (Some(x), Some(y), Some(w), Some(h)) = (get("x"), get("y"), width, height) {
                if w <= 0 || h <= 0 {
                    return None;
                }
                return BoundingBox::from_corners(x, y, x + w, y + h);
            }
            None
        }
        Value::String(text) => bbox_from_text(text),
        _ => None,
    }
}

fn bbox_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap())
}

/// Extract a 4-number tuple from bbox-ish text such as
/// `"12, 34, 56, 78"` or `"(12, 34), (56, 78)"`.
fn bbox_from_text(text: &str) -> Option<BoundingBox> {
    let numbers: Vec<i64> = bbox_text_re()
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .map(|v| v.round() as i64)
        .collect();
    if numbers.len() != 4 {
        return None;
    }
    BoundingBox::from_corners(numbers[0], numbers[1], numbers[2], numbers[3])
}

fn bbox_prose_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[\[\(]\s*(\d+(?:\.\d+)?)\s*,\s*(\d+(?:\.\d+)?)(?:\s*[\)\]]\s*,?\s*[\(\[]\s*)?(?:\s*,\s*)?(\d+(?:\.\d+)?)\s*,\s*(\d+(?:\.\d+)?)\s*[\]\)]",
        )
        .unwrap()
    })
}

/// Extract a bracketed coordinate tuple out of free response text, e.g.
/// `"box (40, 50), (140, 150)"` or `"at [40, 50, 140, 150]"`. Prose carries
/// plenty of unrelated numbers, so only bracketed tuples are trusted here.
fn bbox_from_prose(text: &str) -> Option<BoundingBox> {
    let caps = bbox_prose_re().captures(text)?;
    let mut coords = [0i64; 4];
    for (i, slot) in coords.iter_mut().enumerate() {
        *slot = caps[i + 1].parse::<f64>().ok()?.round() as i64;
    }
    BoundingBox::from_corners(coords[0], coords[1], coords[2], coords[3])
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|v| v.round() as i64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .map(|v| v.round() as i64),
        _ => None,
    }
}
