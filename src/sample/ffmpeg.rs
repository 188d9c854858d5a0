//! FFmpeg-backed frame sampling.
//!
//! Decodes the video sequentially, converts frames to RGB24 through the
//! software scaler, and emits the last decoded frame at or before each
//! `index * interval` target timestamp.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::{SampledFrame, SamplerConfig, VideoDecodeError, MAX_CONSECUTIVE_DECODE_FAILURES};

/// A decoded RGB frame with its presentation time in seconds.
#[derive(Clone)]
struct DecodedFrame {
    ts_secs: f64,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

pub(super) struct FfmpegSampler {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    /// Seconds per pts tick of the video stream.
    time_base: f64,
    interval_secs: f64,
    total: u32,
    next_index: u32,
    /// Last decoded frame at or before the current target.
    held: Option<DecodedFrame>,
    /// First decoded frame past the current target.
    lookahead: Option<DecodedFrame>,
    last_ts_secs: f64,
    flushed: bool,
    consecutive_failures: u32,
    decode_gaps: u32,
}

impl FfmpegSampler {
    pub(super) fn open(config: SamplerConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.source).with_context(|| {
            format!("failed to open video '{}' with ffmpeg", config.source)
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let tb = input_stream.time_base();
        let time_base = if tb.denominator() != 0 {
            tb.numerator() as f64 / tb.denominator() as f64
        } else {
            0.0
        };

        // Container duration in AV_TIME_BASE units, falling back to the
        // stream duration when the container does not carry one.
        let duration_secs = if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else if input_stream.duration() > 0 {
            input_stream.duration() as f64 * time_base
        } else {
            0.0
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let total = (duration_secs / config.interval_secs).floor().max(0.0) as u32;
        log::info!(
            "FrameSampler: opened {} ({}s, {} frames at {}s interval)",
            config.source,
            duration_secs,
            total,
            config.interval_secs
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            time_base,
            interval_secs: config.interval_secs,
            total,
            next_index: 0,
            held: None,
            lookahead: None,
            last_ts_secs: 0.0,
            flushed: false,
            consecutive_failures: 0,
            decode_gaps: 0,
        })
    }

    pub(super) fn total_frames(&self) -> u32 {
        self.total
    }

    pub(super) fn decode_gaps(&self) -> u32 {
        self.decode_gaps
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<SampledFrame>> {
        if self.next_index >= self.total {
            return Ok(None);
        }
        let target = self.next_index as f64 * self.interval_secs;

        // Advance the decode cursor until a frame lands past the target or
        // the stream ends. Everything at or before the target replaces the
        // held candidate (round-down selection).
        loop {
            if let Some(frame) = self.lookahead.take() {
                if frame.ts_secs > target {
                    self.lookahead = Some(frame);
                    break;
                }
                self.held = Some(frame);
            }
            match self.decode_next()? {
                Some(frame) => self.lookahead = Some(frame),
                None => break,
            }
        }

        // With decode gaps at the start, fall forward to the next decodable
        // frame rather than dropping the sample.
        let chosen = match (&self.held, &self.lookahead) {
            (Some(held), _) => held.clone(),
            (None, Some(ahead)) => ahead.clone(),
            (None, None) => return Ok(None),
        };

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(SampledFrame {
            index,
            timestamp: Duration::from_secs_f64(target.max(0.0)),
            pixels: chosen.pixels,
            width: chosen.width,
            height: chosen.height,
        }))
    }

    /// Decode the next frame from the stream, skipping over isolated packet
    /// failures and flushing the decoder at end of stream.
    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.consecutive_failures = 0;
                let ts_secs = decoded
                    .timestamp()
                    .or_else(|| decoded.pts())
                    .map(|pts| pts as f64 * self.time_base)
                    .unwrap_or(self.last_ts_secs);
                self.last_ts_secs = ts_secs;
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                return Ok(Some(DecodedFrame {
                    ts_secs,
                    pixels,
                    width,
                    height,
                }));
            }

            if self.flushed {
                return Ok(None);
            }

            // Feed exactly one video packet, then try the decoder again.
            let mut fed = false;
            let mut failure: Option<String> = None;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                if let Err(e) = self.decoder.send_packet(&packet) {
                    failure = Some(e.to_string());
                }
                fed = true;
                break;
            }

            if let Some(message) = failure {
                self.consecutive_failures += 1;
                self.decode_gaps += 1;
                log::warn!(
                    "frame decode failure ({} consecutive): {}",
                    self.consecutive_failures,
                    message
                );
                if self.consecutive_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                    return Err(VideoDecodeError {
                        message: format!(
                            "{} consecutive decode failures, treating file as corrupt: {}",
                            self.consecutive_failures, message
                        ),
                    }
                    .into());
                }
                continue;
            }

            if !fed {
                // End of stream: flush the decoder to drain buffered frames.
                let _ = self.decoder.send_eof();
                self.flushed = true;
            }
        }
    }
}

/// Copy an RGB24 frame out of ffmpeg's (possibly padded) row layout.
fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
