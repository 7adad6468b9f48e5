//! OCR Module
//!
//! Handles text extraction from subtitle images using the tesseract-rs crate,
//! and the cleanup of systematic recognition mistakes.

use crate::config::{Correction, OcrSettings};
use anyhow::{Context, Result, anyhow, bail};
use image::GrayImage;
use log::info;
use std::path::PathBuf;
use tesseract_rs::TesseractAPI;

/// Anything that can turn a single-line text image into a string.
pub trait OcrEngine {
    fn recognize(&mut self, image: &GrayImage) -> Result<String>;
}

/// Gets the default location where this version of `tesseract-rs` caches its data.
/// The build script downloads language files here.
fn get_tessdata_dir() -> Result<PathBuf> {
    let base_path = if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").context("HOME env var not set")?;
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
    } else if cfg!(target_os = "linux") {
        let home = std::env::var("HOME").context("HOME env var not set")?;
        PathBuf::from(home).join(".tesseract-rs")
    } else if cfg!(target_os = "windows") {
        let appdata = std::env::var("APPDATA").context("APPDATA env var not set")?;
        PathBuf::from(appdata)
    } else {
        bail!("Unsupported operating system; set ocr.tessdata_dir explicitly");
    };
    Ok(base_path.join("tesseract-rs").join("tessdata"))
}

/// Tesseract configured for one language and one page segmentation mode.
pub struct TesseractEngine {
    api: TesseractAPI,
}

impl TesseractEngine {
    pub fn new(settings: &OcrSettings) -> Result<Self> {
        let tessdata_dir = match &settings.tessdata_dir {
            Some(dir) => dir.clone(),
            None => get_tessdata_dir().context("Could not determine tessdata directory")?,
        };
        let tessdata = tessdata_dir
            .to_str()
            .ok_or_else(|| anyhow!("tessdata path {:?} is not valid UTF-8", tessdata_dir))?;

        let api = TesseractAPI::new();
        api.init(tessdata, &settings.language).with_context(|| {
            format!("Failed to initialize Tesseract with language '{}'", settings.language)
        })?;
        api.set_variable(
            "tessedit_pageseg_mode",
            &settings.segmentation_mode.to_string(),
        )
        .context("Failed to set Tesseract page segmentation mode")?;

        info!(
            "Tesseract ready (language '{}', segmentation mode {}).",
            settings.language, settings.segmentation_mode
        );
        Ok(TesseractEngine { api })
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&mut self, image: &GrayImage) -> Result<String> {
        let (width, height) = image.dimensions();
        self.api
            .set_image(
                image.as_raw(),
                width as i32,
                height as i32,
                1,            // bytes per pixel for Luma8
                width as i32, // bytes per line
            )
            .context("Tesseract failed to set image")?;
        self.api
            .recognize()
            .context("Tesseract failed to recognize text")?;
        let text = self
            .api
            .get_utf8_text()
            .context("Tesseract failed to return text")?;
        Ok(text)
    }
}

/// Ordered substring replacements for known misrecognitions.
#[derive(Debug, Clone, Default)]
pub struct Corrections {
    rules: Vec<Correction>,
}

impl Corrections {
    pub fn new(rules: Vec<Correction>) -> Self {
        Corrections { rules }
    }

    /// Applies every rule in order, then trims surrounding whitespace.
    pub fn apply(&self, raw: &str) -> String {
        let text = self
            .rules
            .iter()
            .filter(|rule| !rule.from.is_empty())
            .fold(raw.to_string(), |text, rule| text.replace(&rule.from, &rule.to));
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_fixes_chinese_lookalikes() {
        let corrections = Corrections::new(OcrSettings::default().corrections);
        assert_eq!(corrections.apply("-个人\n"), "一个人");
        assert_eq!(corrections.apply(" +年，F海。”\n\x0c"), "十年上海");
    }

    #[test]
    fn rules_apply_in_order() {
        let corrections = Corrections::new(vec![
            Correction::new("ab", "c"),
            Correction::new("c", "d"),
        ]);
        assert_eq!(corrections.apply("abc"), "dd");
    }

    #[test]
    fn empty_rules_only_trim() {
        let corrections = Corrections::new(vec![Correction::new("", "x")]);
        assert_eq!(corrections.apply("  hello \n"), "hello");
        assert_eq!(corrections.apply(" \n "), "");
    }
}
