//! hardsub2srt - Core Library
//!
//! Transcribes hardcoded subtitles into SRT. The decode loop, preprocessing
//! and change detection run on the calling thread; OCR runs on a worker
//! thread fed through a bounded queue.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;

// Define modules for different functionalities
pub mod accumulator;
pub mod change_detector;
pub mod config;
pub mod ocr;
pub mod pipeline;
pub mod preprocess;
pub mod sink;
pub mod srt;
pub mod transcriber;
pub mod video_processor;

use config::Settings;
use pipeline::{Pipeline, PipelineReport, StopSignal};
use sink::{ConsoleSink, MultiSink, SrtWriter};

/// Application configuration structure.
#[derive(Debug)]
pub struct Config {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub report_file: Option<PathBuf>,
    pub mirror_to_console: bool,
    pub settings: Settings,
}

fn progress_bar(config: &Config) -> Result<ProgressBar> {
    let bar = match video_processor::get_frame_count(&config.input_file) {
        Ok(count) if count > 0 => {
            let remaining = count.saturating_sub(config.settings.pipeline.initial_frame);
            let bar = ProgressBar::new(remaining);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Transcribing [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) [{elapsed_precise}<{eta}]")?
                    .progress_chars("##-"),
            );
            bar
        }
        _ => {
            warn!("Could not determine total frame count. Using spinner as fallback.");
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} Transcribing... [{elapsed_precise}] {pos} frames processed")?,
            );
            bar
        }
    };
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(bar)
}

/// Ctrl-C handler: asks the decode loop to stop so the open line is still
/// flushed and the worker joined.
fn on_interrupt(stop: StopSignal) -> impl FnMut() + Send + 'static {
    move || {
        warn!("Interrupt received, finishing the current frame.");
        stop.stop();
    }
}

/// The main function that orchestrates the transcription process.
pub fn run(config: Config) -> Result<PipelineReport> {
    info!("Initializing processing with config: {:?}", config);
    config.settings.validate().context("Invalid settings")?;

    // 1. Open the video before anything is written
    let mut source = video_processor::VideoFrameSource::open(&config.input_file)?;

    // 2. Start OCR engine
    let engine = ocr::TesseractEngine::new(&config.settings.ocr)?;

    // 3. Output sinks
    let pb = progress_bar(&config)?;
    let mut sink = MultiSink::new().with(SrtWriter::create(
        &config.output_file,
        config.settings.pipeline.encoding,
    )?);
    if config.mirror_to_console {
        sink = sink.with(ConsoleSink::new(pb.clone()));
    }

    // 4. Run the pipeline
    info!("Starting transcription stream for: {:?}", config.input_file);
    let pipeline = Pipeline::new(config.settings.clone()).with_progress(pb.clone());
    if let Err(e) = ctrlc::set_handler(on_interrupt(pipeline.stop_signal())) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
    let report = pipeline
        .run(&mut source, engine, Box::new(sink))
        .context("Transcription failed")?;
    pb.finish_with_message(format!("Transcribed {} frames", report.frames_read));
    info!(
        "Wrote {} subtitles to {:?}",
        report.entries_written, config.output_file
    );

    // 5. Optional run report
    if let Some(report_path) = &config.report_file {
        if let Some(parent_dir) = report_path.parent() {
            if !parent_dir.as_os_str().is_empty() {
                fs::create_dir_all(parent_dir).context("Failed to create report directory")?;
            }
        }
        fs::write(report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report to {:?}", report_path))?;
        info!("Run report written to {:?}", report_path);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_requests_stop() {
        let stop = StopSignal::new();
        let mut handler = on_interrupt(stop.clone());
        assert!(!stop.is_stopped());
        handler();
        assert!(stop.is_stopped());
        // Repeated interrupts are harmless.
        handler();
        assert!(stop.is_stopped());
    }
}
