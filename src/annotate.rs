//! Frame annotation and persistence.
//!
//! Persisted frames are the durable half of a scan result: one JPEG per
//! detection-bearing (or, per configuration, every sampled) frame, named
//! deterministically by frame index under a configurable output root.
//! Bounding boxes are burned into the pixel buffer before encoding so the
//! persisted image is self-describing.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::sample::SampledFrame;
use crate::BoundingBox;

const JPEG_QUALITY: u8 = 85;
/// Burn-in outline color (RGB) and stroke width.
const BOX_COLOR: [u8; 3] = [0, 0, 255];
const BOX_THICKNESS: u32 = 4;

/// Writes annotated frames under one output root.
pub struct FrameSink {
    root: PathBuf,
}

impl FrameSink {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create output root {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic image path for a frame index.
    pub fn image_path(&self, index: u32) -> PathBuf {
        self.root.join(format!("frame_{:05}.jpg", index))
    }

    /// Burn boxes into the frame and write it as JPEG. Consumes the frame;
    /// the pixel buffer has single ownership and ends its life here.
    pub fn persist(&self, frame: SampledFrame, boxes: &[BoundingBox]) -> Result<PathBuf> {
        let path = self.image_path(frame.index);
        let (width, height) = (frame.width, frame.height);
        let mut pixels = frame.pixels;

        for bbox in boxes {
            burn_box(&mut pixels, width, height, *bbox);
        }

        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
            .encode(&pixels, width, height, ExtendedColorType::Rgb8)
            .with_context(|| format!("failed to encode {}", path.display()))?;
        Ok(path)
    }

    /// Remove everything under the output root, keeping the root itself.
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to read output root {}", self.root.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// Encode a frame as JPEG in memory (the detector request payload).
pub fn encode_jpeg(frame: &SampledFrame) -> Result<Vec<u8>> {
    let expected = (frame.width as usize) * (frame.height as usize) * 3;
    if frame.pixels.len() != expected {
        return Err(anyhow!(
            "frame {} pixel buffer is {} bytes, expected {}",
            frame.index,
            frame.pixels.len(),
            expected
        ));
    }
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode(&frame.pixels, frame.width, frame.height, ExtendedColorType::Rgb8)
        .context("failed to encode frame as JPEG")?;
    Ok(buffer)
}

/// Draw a rectangle outline into an RGB24 buffer, clamped to the frame.
fn burn_box(pixels: &mut [u8], width: u32, height: u32, bbox: BoundingBox) {
    let Some(bbox) = bbox.clamp_to(width, height) else {
        return;
    };
    let thickness = BOX_THICKNESS.min((bbox.x2 - bbox.x1) / 2).max(1);

    let mut paint = |x: u32, y: u32| {
        let offset = ((y as usize) * (width as usize) + (x as usize)) * 3;
        pixels[offset..offset + 3].copy_from_slice(&BOX_COLOR);
    };

    for t in 0..thickness {
        // Horizontal edges.
        let top = (bbox.y1 + t).min(height - 1);
        let bottom = bbox.y2.saturating_sub(t);
        for x in bbox.x1..=bbox.x2 {
            paint(x, top);
            paint(x, bottom);
        }
        // Vertical edges.
        let left = (bbox.x1 + t).min(width - 1);
        let right = bbox.x2.saturating_sub(t);
        for y in bbox.y1..=bbox.y2 {
            paint(left, y);
            paint(right, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(index: u32, width: u32, height: u32) -> SampledFrame {
        SampledFrame {
            index,
            timestamp: Duration::from_secs(index as u64),
            pixels: vec![128u8; (width * height * 3) as usize],
            width,
            height,
        }
    }

    #[test]
    fn persists_with_deterministic_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FrameSink::new(dir.path()).unwrap();
        let path = sink.persist(frame(7, 64, 48), &[]).unwrap();
        assert_eq!(path, dir.path().join("frame_00007.jpg"));
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn clear_empties_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FrameSink::new(dir.path()).unwrap();
        sink.persist(frame(0, 64, 48), &[]).unwrap();
        sink.persist(frame(1, 64, 48), &[]).unwrap();
        sink.clear().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn burn_box_paints_the_outline() {
        let mut pixels = vec![0u8; 64 * 64 * 3];
        burn_box(
            &mut pixels,
            64,
            64,
            BoundingBox {
                x1: 10,
                y1: 10,
                x2: 30,
                y2: 30,
            },
        );
        let at = |x: usize, y: usize| {
            let offset = (y * 64 + x) * 3;
            [pixels[offset], pixels[offset + 1], pixels[offset + 2]]
        };
        assert_eq!(at(10, 10), BOX_COLOR);
        assert_eq!(at(20, 10), BOX_COLOR);
        assert_eq!(at(10, 20), BOX_COLOR);
        assert_eq!(at(30, 30), BOX_COLOR);
        // Interior stays untouched.
        assert_eq!(at(20, 20), [0, 0, 0]);
    }

    #[test]
    fn out_of_frame_box_is_ignored() {
        let mut pixels = vec![7u8; 16 * 16 * 3];
        let before = pixels.clone();
        burn_box(
            &mut pixels,
            16,
            16,
            BoundingBox {
                x1: 100,
                y1: 100,
                x2: 200,
                y2: 200,
            },
        );
        assert_eq!(pixels, before);
    }

    #[test]
    fn encode_jpeg_rejects_mismatched_buffers() {
        let mut bad = frame(0, 64, 48);
        bad.pixels.truncate(10);
        assert!(encode_jpeg(&bad).is_err());
    }
}
