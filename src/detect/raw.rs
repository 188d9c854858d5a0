//! Raw finding extraction.
//!
//! Backends return whatever the model produced. This module turns a response
//! body into `RawFinding` bags without validating anything: field shapes vary
//! per backend and model revision (inconsistent bounding-box formats, missing
//! confidence, free-text classifications), so each field is carried as-is and
//! the normalizer owns the burden of interpretation.

use serde_json::Value;

/// One unvalidated candidate detection from a backend.
///
/// Every field is optional and untrusted. `raw_text` carries the response
/// body when the backend could not parse it as structured findings at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFinding {
    /// Free-form category label ("bare spot", "Weeds", "deer", ...).
    pub category: Option<String>,
    /// Confidence in whatever representation the model chose
    /// (number, "0.9", "87%", ...).
    pub confidence: Option<Value>,
    /// Bounding box in whatever representation the model chose
    /// ([x1,y1,x2,y2], {x,y,w,h}, "12,34,56,78", ...).
    pub bbox: Option<Value>,
    /// Free-form description of the finding.
    pub detail: Option<String>,
    /// Unstructured response text, set when the body was not parseable JSON.
    pub raw_text: Option<String>,
}

impl RawFinding {
    pub fn from_text(text: &str) -> Self {
        Self {
            raw_text: Some(text.trim().to_string()),
            ..Self::default()
        }
    }
}

/// Keys models have been observed to use for each finding field.
const CATEGORY_KEYS: [&str; 5] = ["category", "object_type", "label", "class", "type"];
const CONFIDENCE_KEYS: [&str; 3] = ["confidence", "score", "probability"];
const BBOX_KEYS: [&str; 4] = ["bbox", "box", "box_parameter", "bounding_box"];
const DETAIL_KEYS: [&str; 3] = ["description", "report", "detail"];
const WRAPPER_KEYS: [&str; 3] = ["detections", "findings", "results"];

/// Lenient-parse a response body into findings.
///
/// Accepted shapes, tried in order:
/// 1. a JSON array of finding objects
/// 2. a JSON object wrapping such an array under `detections`/`findings`/
///    `results`
/// 3. a single JSON finding object
/// 4. anything else: one raw-text finding for the normalizer to salvage
///
/// An empty or whitespace body yields no findings.
pub fn findings_from_body(body: &str) -> Vec<RawFinding> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.iter().map(finding_from_value).collect(),
        Ok(Value::Object(map)) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().map(finding_from_value).collect();
                }
            }
            vec![finding_from_value(&Value::Object(map))]
        }
        // JSON scalars and non-JSON bodies both fall through to raw text.
        Ok(_) | Err(_) => vec![RawFinding::from_text(trimmed)],
    }
}

fn finding_from_value(value: &Value) -> RawFinding {
    let Value::Object(map) = value else {
        return RawFinding::from_text(&value.to_string());
    };

    let category = CATEGORY_KEYS
        .iter()
        .find_map(|key| map.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string);
    let confidence = CONFIDENCE_KEYS
        .iter()
        .find_map(|key| map.get(*key))
        .cloned();
    let bbox = BBOX_KEYS.iter().find_map(|key| map.get(*key)).cloned();
    let detail = DETAIL_KEYS
        .iter()
        .find_map(|key| map.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string);

    RawFinding {
        category,
        confidence,
        bbox,
        detail,
        raw_text: None,
    }
}
