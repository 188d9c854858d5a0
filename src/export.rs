//! Tabular result export.
//!
//! One row per detection, in insertion order, with a column set that is
//! stable across runs for the same configuration:
//! `frame_index, category, confidence, bbox, latitude, longitude, image_path`.
//! `bbox` and the coordinate columns are empty when the detection has no
//! parsed box or no telemetry fix. The reader half exists so round-trips can
//! be verified and downstream tooling has a reference parser.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::{BoundingBox, Category, Detection};

pub const CSV_COLUMNS: [&str; 7] = [
    "frame_index",
    "category",
    "confidence",
    "bbox",
    "latitude",
    "longitude",
    "image_path",
];

/// One parsed export row (the stable tabular subset of a detection).
#[derive(Clone, Debug, PartialEq)]
pub struct ExportRow {
    pub frame_index: u32,
    pub category: Category,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image_path: String,
}

pub fn render_csv(detections: &[Detection]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');
    for det in detections {
        let bbox = det.bbox.map(|b| b.to_field()).unwrap_or_default();
        let (latitude, longitude) = match det.location {
            Some(fix) => (fix.latitude.to_string(), fix.longitude.to_string()),
            None => (String::new(), String::new()),
        };
        let fields = [
            det.source_frame_index.to_string(),
            det.category.label().to_string(),
            det.confidence.to_string(),
            bbox,
            latitude,
            longitude,
            det.image_path.clone(),
        ];
        let escaped: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

pub fn write_csv(path: &Path, detections: &[Detection]) -> Result<()> {
    std::fs::write(path, render_csv(detections))
        .with_context(|| format!("failed to write results to {}", path.display()))
}

pub fn parse_csv(text: &str) -> Result<Vec<ExportRow>> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| anyhow!("results file is empty"))?;
    if header != CSV_COLUMNS.join(",") {
        return Err(anyhow!("unexpected results header '{}'", header));
    }

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line);
        if fields.len() != CSV_COLUMNS.len() {
            return Err(anyhow!(
                "results line {} has {} fields, expected {}",
                line_no + 2,
                fields.len(),
                CSV_COLUMNS.len()
            ));
        }
        let frame_index = fields[0]
            .parse()
            .with_context(|| format!("bad frame_index '{}'", fields[0]))?;
        let category = Category::from_label(&fields[1])
            .ok_or_else(|| anyhow!("bad category '{}'", fields[1]))?;
        let confidence = fields[2]
            .parse()
            .with_context(|| format!("bad confidence '{}'", fields[2]))?;
        let bbox = if fields[3].is_empty() {
            None
        } else {
            Some(
                BoundingBox::from_field(&fields[3])
                    .ok_or_else(|| anyhow!("bad bbox '{}'", fields[3]))?,
            )
        };
        let latitude = parse_optional_float(&fields[4]).context("bad latitude")?;
        let longitude = parse_optional_float(&fields[5]).context("bad longitude")?;
        rows.push(ExportRow {
            frame_index,
            category,
            confidence,
            bbox,
            latitude,
            longitude,
            image_path: fields[6].clone(),
        });
    }
    Ok(rows)
}

pub fn read_csv(path: &Path) -> Result<Vec<ExportRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read results from {}", path.display()))?;
    parse_csv(&text)
}

fn parse_optional_float(field: &str) -> Result<Option<f64>> {
    if field.is_empty() {
        return Ok(None);
    }
    Ok(Some(field.parse()?))
}

/// Quote a field when it contains a delimiter, quote, or newline.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one record, honoring double-quoted fields.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
