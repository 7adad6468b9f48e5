//! Settings Module
//!
//! Every tunable value of the pipeline lives here. The defaults are the
//! values calibrated for 4K sources with white Chinese subtitles; other
//! resolutions and fonts usually need their own ROI, guard bands and
//! distance threshold.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Rectangle of the frame where subtitles are rendered. `right` and `bottom`
/// are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Roi {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Whether the area lies inside frames of `width` x `height`.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.right <= width && self.bottom <= height
    }
}

impl Default for Roi {
    fn default() -> Self {
        Roi {
            left: 820,
            top: 1600,
            right: 3020,
            bottom: 2160,
        }
    }
}

/// Parses `left,top,right,bottom`.
impl FromStr for Roi {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| format!("invalid ROI coordinate: {}", e))?;

        match parts.as_slice() {
            [left, top, right, bottom] => Ok(Roi {
                left: *left,
                top: *top,
                right: *right,
                bottom: *bottom,
            }),
            _ => Err(format!(
                "expected 4 comma separated values (left,top,right,bottom), got {}",
                parts.len()
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Luma at or above this value counts as subtitle text before blurring.
    pub bright_threshold: u8,
    /// Luma at or above this value counts as text after blurring.
    pub post_blur_threshold: u8,
    /// Odd Gaussian kernel size in pixels.
    pub blur_kernel: u32,
    /// Rows forced to background at the top of the crop.
    pub top_guard: u32,
    /// Rows forced to background at the bottom of the crop.
    pub bottom_guard: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        PreprocessSettings {
            bright_threshold: 250,
            post_blur_threshold: 55,
            blur_kernel: 21,
            top_guard: 46,
            bottom_guard: 46,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Side of the square perceptual hash, in bits.
    pub fingerprint_size: usize,
    /// Hamming distance above which a frame counts as a subtitle change.
    pub distance_threshold: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        DetectionSettings {
            fingerprint_size: 16, // 256-bit hash
            distance_threshold: 10,
        }
    }
}

/// One `from -> to` substitution applied to raw OCR output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub from: String,
    pub to: String,
}

impl Correction {
    pub fn new(from: &str, to: &str) -> Self {
        Correction {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract language identifier, e.g. "chi_sim".
    pub language: String,
    /// Tesseract page segmentation mode. 13 treats the image as one raw line.
    pub segmentation_mode: u32,
    /// Overrides the tessdata location the build script downloads to.
    pub tessdata_dir: Option<PathBuf>,
    /// Applied in order to every recognized line.
    pub corrections: Vec<Correction>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        OcrSettings {
            language: "chi_sim".to_string(),
            segmentation_mode: 13,
            tessdata_dir: None,
            corrections: vec![
                Correction::new("-", "一"),
                Correction::new("+", "十"),
                Correction::new("F", "上"),
                Correction::new("，", ""),
                Correction::new("。", ""),
                Correction::new("”", ""),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputEncoding {
    #[default]
    Utf8,
    /// UTF-8 prefixed with a byte order mark, for players that insist on it.
    Utf8Bom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Number of frames skipped before sampling starts.
    pub initial_frame: u64,
    /// Maximum number of changes waiting for OCR before decoding blocks.
    pub queue_capacity: usize,
    /// Emit the subtitle still on screen when the video ends.
    pub flush_trailing_line: bool,
    pub encoding: OutputEncoding,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            initial_frame: 0,
            queue_capacity: 8,
            flush_trailing_line: true,
            encoding: OutputEncoding::Utf8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub roi: Roi,
    pub preprocess: PreprocessSettings,
    pub detection: DetectionSettings,
    pub ocr: OcrSettings,
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Loads settings from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;
        Ok(settings)
    }

    /// Rejects combinations that cannot produce meaningful output.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.roi.width() > 0 && self.roi.height() > 0,
            "ROI {:?} is empty; right/bottom must be greater than left/top",
            self.roi
        );
        ensure!(
            self.preprocess.blur_kernel % 2 == 1,
            "Blur kernel size must be odd, got {}",
            self.preprocess.blur_kernel
        );
        ensure!(
            self.preprocess.post_blur_threshold < self.preprocess.bright_threshold,
            "Post-blur threshold ({}) must be lower than the brightness threshold ({})",
            self.preprocess.post_blur_threshold,
            self.preprocess.bright_threshold
        );
        ensure!(
            self.detection.fingerprint_size >= 2,
            "Fingerprint size must be at least 2, got {}",
            self.detection.fingerprint_size
        );
        ensure!(
            self.pipeline.queue_capacity > 0,
            "Queue capacity must be at least 1"
        );
        ensure!(!self.ocr.language.is_empty(), "OCR language must not be empty");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn parse_roi() {
        let roi: Roi = "10, 20,110,220".parse().unwrap();
        assert_eq!(roi, Roi { left: 10, top: 20, right: 110, bottom: 220 });
        assert_eq!(roi.width(), 100);
        assert_eq!(roi.height(), 200);

        assert!("1,2,3".parse::<Roi>().is_err());
        assert!("a,b,c,d".parse::<Roi>().is_err());
    }

    #[test]
    fn default_roi_needs_4k_frames() {
        let roi = Roi::default();
        assert!(roi.fits(3840, 2160));
        assert!(!roi.fits(1920, 1080));
        assert!(!roi.fits(3840, 2000));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.roi = Roi { left: 10, top: 10, right: 10, bottom: 20 };
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.preprocess.blur_kernel = 20;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.preprocess.post_blur_threshold = 250;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pipeline.queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "roi": {{ "left": 0, "top": 800, "right": 1920, "bottom": 1080 }},
                "detection": {{ "distance_threshold": 4 }},
                "pipeline": {{ "encoding": "utf8-bom" }}
            }}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.roi.width(), 1920);
        assert_eq!(settings.detection.distance_threshold, 4);
        assert_eq!(settings.detection.fingerprint_size, 16);
        assert_eq!(settings.pipeline.encoding, OutputEncoding::Utf8Bom);
        assert_eq!(settings.ocr, OcrSettings::default());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::from_file(&dir.path().join("missing.json")).is_err());
    }
}
