//! Pipeline Driver
//!
//! Owns the decode loop. Every frame is preprocessed and fingerprinted on the
//! calling thread; only subtitle changes cross over to the transcription
//! worker, through a bounded queue.

use crate::change_detector::{ChangeDetector, Fingerprinter, PerceptualFingerprinter};
use crate::config::Settings;
use crate::ocr::{Corrections, OcrEngine};
use crate::preprocess::Preprocessor;
use crate::sink::SubtitleSink;
use crate::transcriber::{TranscriberHandle, TranscriptionWorker};
use crate::video_processor::FrameSource;
use anyhow::{Result, ensure};
use image::RgbImage;
use indicatif::ProgressBar;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// A decoded frame and where it sits in the video.
#[derive(Debug)]
pub struct Frame {
    pub index: u64,
    pub timestamp_ms: f64,
    pub image: RgbImage,
}

/// Cloneable flag asking the decode loop to stop after the current frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum Termination {
    EndOfStream,
    Stopped,
    DecodeError(String),
}

/// Summary of a run, written to the optional JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub first_frame: u64,
    pub frames_read: u64,
    pub changes: u64,
    pub blank_changes: u64,
    pub ocr_calls: u64,
    pub ocr_failures: u64,
    pub entries_written: u64,
    pub termination: Termination,
    pub elapsed_secs: f64,
}

pub struct Pipeline<F: Fingerprinter> {
    settings: Settings,
    preprocessor: Preprocessor,
    detector: ChangeDetector<F>,
    stop: StopSignal,
    progress: Option<ProgressBar>,
}

impl Pipeline<PerceptualFingerprinter> {
    pub fn new(settings: Settings) -> Self {
        let fingerprinter = PerceptualFingerprinter::new(settings.detection.fingerprint_size);
        Self::with_fingerprinter(settings, fingerprinter)
    }
}

impl<F: Fingerprinter> Pipeline<F> {
    pub fn with_fingerprinter(settings: Settings, fingerprinter: F) -> Self {
        let preprocessor = Preprocessor::new(settings.roi, settings.preprocess.clone());
        let detector = ChangeDetector::new(
            fingerprinter,
            settings.detection.distance_threshold,
            settings.roi.width(),
            settings.roi.height(),
        );
        Pipeline {
            settings,
            preprocessor,
            detector,
            stop: StopSignal::new(),
            progress: None,
        }
    }

    /// Ticks `bar` once per decoded frame.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// A handle that makes `run` return early.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Runs the whole video through detection and transcription, writing
    /// finished entries to `sink`.
    pub fn run<S, E>(
        mut self,
        source: &mut S,
        engine: E,
        sink: Box<dyn SubtitleSink + Send>,
    ) -> Result<PipelineReport>
    where
        S: FrameSource,
        E: OcrEngine + Send + 'static,
    {
        let start_time = Instant::now();
        let first_frame = self.settings.pipeline.initial_frame;
        info!(
            "Sampling every frame at {:.3} fps, starting at frame {}.",
            source.frames_per_second(),
            first_frame
        );

        let roi = self.settings.roi;
        if let Some((width, height)) = source.frame_size() {
            ensure!(
                roi.fits(width, height),
                "Subtitle area {},{},{},{} does not fit in {}x{} frames",
                roi.left,
                roi.top,
                roi.right,
                roi.bottom,
                width,
                height
            );
        }

        if first_frame > 0 {
            let skipped = source.skip_frames(first_frame)?;
            info!("Skipped {} frames before sampling.", skipped);
            if skipped < first_frame {
                warn!(
                    "Video ended after {} frames, before the requested start frame {}.",
                    skipped, first_frame
                );
            }
        }

        let worker = TranscriptionWorker::new(
            engine,
            Corrections::new(self.settings.ocr.corrections.clone()),
            sink,
            self.settings.pipeline.flush_trailing_line,
        );
        let transcriber = TranscriberHandle::spawn(worker, self.settings.pipeline.queue_capacity)?;

        let mut frame_index = first_frame;
        let mut last_timestamp_ms = source.position_ms();
        let mut frames_read = 0;

        let termination = loop {
            if self.stop.is_stopped() {
                info!("Stop requested at frame {}.", frame_index);
                break Termination::Stopped;
            }

            let image = match source.read_frame() {
                Ok(Some(image)) => image,
                Ok(None) => break Termination::EndOfStream,
                Err(e) => {
                    error!("Decoding failed at frame {}: {:#}", frame_index, e);
                    break Termination::DecodeError(format!("{:#}", e));
                }
            };
            // Decoders may report a PTS earlier than the previous frame.
            let frame = Frame {
                index: frame_index,
                timestamp_ms: source.position_ms().max(last_timestamp_ms),
                image,
            };
            last_timestamp_ms = frame.timestamp_ms;

            if let Err(e) = self.process_frame(frame, &transcriber) {
                // Usually a dead worker; `finish` below returns its error.
                warn!("Stopping at frame {}: {:#}", frame_index, e);
                break Termination::Stopped;
            }

            frames_read += 1;
            frame_index += 1;
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        };

        let transcription = transcriber.finish(last_timestamp_ms)?;
        let detection = self.detector.stats();

        let report = PipelineReport {
            first_frame,
            frames_read,
            changes: detection.changes,
            blank_changes: detection.blank_changes,
            ocr_calls: transcription.ocr_calls,
            ocr_failures: transcription.ocr_failures,
            entries_written: transcription.entries_written,
            termination,
            elapsed_secs: start_time.elapsed().as_secs_f64(),
        };

        info!(
            "Transcription finished in {:.2}s. Frames {}, changes {}, OCR calls {}, subtitles {}.",
            report.elapsed_secs,
            report.frames_read,
            report.changes,
            report.ocr_calls,
            report.entries_written
        );
        Ok(report)
    }

    fn process_frame(&mut self, frame: Frame, transcriber: &TranscriberHandle) -> Result<()> {
        let processed = self.preprocessor.process(&frame.image);
        if let Some(material) = self.detector.observe(processed, frame.timestamp_ms)? {
            transcriber.submit(material)?;
        }
        Ok(())
    }
}
