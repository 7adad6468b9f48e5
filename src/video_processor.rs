//! Video Processing Module
//!
//! Handles the decoding of video files and extraction of individual frames
//! using the ffmpeg-next crate.

use anyhow::{Context, Result, anyhow};
use ffmpeg::format::{Pixel, context::Input, input};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg_next as ffmpeg;
use image::{ImageBuffer, RgbImage};
use log::{debug, info};
use std::path::Path;

/// A sequential source of decoded frames.
pub trait FrameSource {
    /// Reads the next frame, or `None` once the source is exhausted.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Presentation time of the frame returned by the last `read_frame`.
    fn position_ms(&self) -> f64;

    fn frames_per_second(&self) -> f64;

    /// Width and height of the decoded frames, when known before decoding.
    fn frame_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Reads and discards up to `count` frames. Returns how many were skipped.
    fn skip_frames(&mut self, count: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < count && self.read_frame()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }
}

/// Attempts to get the total number of frames from video metadata.
///
/// This function is much faster than decoding the whole video, but the
/// result can be an estimate for variable frame rate (VFR) videos.
pub fn get_frame_count(path: &Path) -> Result<u64> {
    ffmpeg::init().context("Failed to initialize FFmpeg")?;
    let ictx = input(path).context("Failed to open input file for frame count")?;
    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| anyhow!("Could not find video stream in file"))?;

    // First, try the most direct method if available in the container
    let frame_count = stream.frames();
    if frame_count > 0 {
        return Ok(frame_count as u64);
    }

    // Fallback: Calculate from duration and average frame rate
    let duration = ictx.duration();
    let frame_rate = stream.avg_frame_rate();

    if duration > 0 && frame_rate.0 > 0 && frame_rate.1 > 0 {
        // Duration is in AV_TIME_BASE units (microseconds), so convert to seconds
        let duration_secs = duration as f64 / 1_000_000.0;
        let fps = frame_rate.0 as f64 / frame_rate.1 as f64;
        let estimated_frames = (duration_secs * fps).round() as u64;
        return Ok(estimated_frames);
    }

    Err(anyhow!("Could not determine frame count from video metadata"))
}

/// Pull-based FFmpeg decoder producing RGB frames.
pub struct VideoFrameSource {
    ictx: Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    stream_index: usize,
    time_base: f64,
    start_time: i64,
    fps: f64,
    frames_read: u64,
    position_ms: f64,
    eof_sent: bool,
}

impl VideoFrameSource {
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("Failed to initialize FFmpeg")?;

        let ictx = input(path).with_context(|| format!("Failed to open input file {:?}", path))?;
        let stream = ictx
            .streams()
            .best(Type::Video)
            .context("Could not find video stream")?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        let start_time = stream.start_time().max(0);
        let frame_rate = stream.avg_frame_rate();
        let fps = if frame_rate.1 > 0 {
            frame_rate.0 as f64 / frame_rate.1 as f64
        } else {
            0.0
        };

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("Failed to create decoder context")?;
        let decoder = context_decoder
            .decoder()
            .video()
            .context("Failed to create video decoder")?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .context("Failed to create scaler")?;

        info!(
            "Opened {:?}: {}x{} at {:.3} fps",
            path,
            decoder.width(),
            decoder.height(),
            fps
        );

        Ok(VideoFrameSource {
            ictx,
            decoder,
            scaler,
            stream_index,
            time_base,
            start_time,
            fps,
            frames_read: 0,
            position_ms: 0.0,
            eof_sent: false,
        })
    }

    fn frame_position_ms(&self, decoded: &Video) -> f64 {
        match decoded.timestamp().or(decoded.pts()) {
            Some(ts) => (ts - self.start_time).max(0) as f64 * self.time_base * 1000.0,
            None if self.fps > 0.0 => self.frames_read as f64 * 1000.0 / self.fps,
            None => 0.0,
        }
    }

    fn convert_frame(&mut self, decoded: &Video) -> Result<RgbImage> {
        let mut rgb_frame = Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("Scaler failed")?;

        let frame_data = rgb_frame.data(0);
        let width = rgb_frame.width() as usize;
        let height = rgb_frame.height() as usize;
        let stride = rgb_frame.stride(0);

        if stride == 0 {
            return Err(anyhow!("Invalid frame stride"));
        }

        let mut new_vec = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            let start_index = y * stride;
            let end_index = start_index + (width * 3);
            if end_index > frame_data.len() {
                return Err(anyhow!("Frame data is smaller than expected"));
            }
            new_vec.extend_from_slice(&frame_data[start_index..end_index]);
        }

        ImageBuffer::from_vec(width as u32, height as u32, new_vec)
            .context("Failed to create image buffer from frame data")
    }
}

impl FrameSource for VideoFrameSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.position_ms = self.frame_position_ms(&decoded);
                let img = self.convert_frame(&decoded)?;
                self.frames_read += 1;
                return Ok(Some(img));
            }
            if self.eof_sent {
                debug!("Decoder drained after {} frames.", self.frames_read);
                return Ok(None);
            }

            match self.ictx.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .context("Failed to send packet to decoder")?;
                    }
                }
                None => {
                    self.decoder.send_eof().context("Failed to flush decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn position_ms(&self) -> f64 {
        self.position_ms
    }

    fn frames_per_second(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        Some((self.decoder.width(), self.decoder.height()))
    }
}
