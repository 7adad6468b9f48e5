//! hardsub2srt - Main Application Entrypoint
//!
//! This file is responsible for parsing command-line arguments, initializing
//! the application environment (like logging), and dispatching the core
//! processing logic.

use clap::Parser;
use hardsub2srt::config::{OutputEncoding, Roi, Settings};
use hardsub2srt::run;
use log::{error, info};
use std::path::PathBuf;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// A command-line tool that transcribes hardcoded video subtitles into SRT files.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input video file (e.g., episode.mkv)
    #[arg(short, long)]
    input: PathBuf,

    /// Path of the SRT file to write
    #[arg(short, long)]
    output: PathBuf,

    /// JSON settings file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subtitle area as left,top,right,bottom in pixels
    #[arg(long)]
    roi: Option<Roi>,

    /// OCR language (e.g., "chi_sim" for simplified Chinese, "eng" for English)
    #[arg(short, long)]
    lang: Option<String>,

    /// Number of frames to skip before sampling
    #[arg(long)]
    start_frame: Option<u64>,

    /// Fingerprint distance above which the subtitle counts as changed
    #[arg(short, long)]
    threshold: Option<u32>,

    /// Text encoding of the SRT file
    #[arg(long, value_enum)]
    encoding: Option<Encoding>,

    /// Drop the subtitle still on screen when the video ends
    #[arg(long)]
    drop_trailing_line: bool,

    /// Do not print subtitles to the console while transcribing
    #[arg(short, long)]
    quiet: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum Encoding {
    Utf8,
    Utf8Bom,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
}

fn build_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(roi) = args.roi {
        settings.roi = roi;
    }
    if let Some(lang) = &args.lang {
        settings.ocr.language = lang.clone();
    }
    if let Some(start_frame) = args.start_frame {
        settings.pipeline.initial_frame = start_frame;
    }
    if let Some(threshold) = args.threshold {
        settings.detection.distance_threshold = threshold;
    }
    if let Some(encoding) = &args.encoding {
        settings.pipeline.encoding = match encoding {
            Encoding::Utf8 => OutputEncoding::Utf8,
            Encoding::Utf8Bom => OutputEncoding::Utf8Bom,
        };
    }
    if args.drop_trailing_line {
        settings.pipeline.flush_trailing_line = false;
    }
    Ok(settings)
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args = Args::parse();

    // 1. Initialize Logger
    let log_level = match args.log_level {
        LogLevel::Error => "error",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("Starting hardsub2srt...");

    // 2. Validate input path
    if !args.input.exists() {
        error!("Input file does not exist: {:?}", args.input);
        std::process::exit(1);
    }

    // 3. Create a configuration object from arguments
    let settings = match build_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Could not load settings: {:#}", e);
            std::process::exit(1);
        }
    };
    let config = hardsub2srt::Config {
        input_file: args.input,
        output_file: args.output,
        report_file: args.report,
        mirror_to_console: !args.quiet,
        settings,
    };

    // 4. Run the main application logic
    if let Err(e) = run(config) {
        error!("Application failed: {:#}", e);
        std::process::exit(2);
    }

    info!("Processing completed successfully.");
}
