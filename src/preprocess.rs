//! Frame Preprocessing Module
//!
//! Turns a raw video frame into a black-on-white, single channel image of the
//! subtitle area. The same image is used for fingerprinting and for OCR.

use crate::config::{PreprocessSettings, Roi};
use image::{GrayImage, RgbImage, imageops};

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Stateless preprocessor; `process` is a pure function of its input.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    roi: Roi,
    settings: PreprocessSettings,
    sigma: f32,
}

impl Preprocessor {
    pub fn new(roi: Roi, settings: PreprocessSettings) -> Self {
        let sigma = kernel_to_sigma(settings.blur_kernel);
        Preprocessor { roi, settings, sigma }
    }

    /// Crops, binarizes, blurs and inverts a frame.
    pub fn process(&self, frame: &RgbImage) -> GrayImage {
        let cropped = imageops::crop_imm(
            frame,
            self.roi.left,
            self.roi.top,
            self.roi.width(),
            self.roi.height(),
        )
        .to_image();

        let mut img = imageops::grayscale(&cropped);
        threshold(&mut img, self.settings.bright_threshold);
        clear_guard_bands(&mut img, self.settings.top_guard, self.settings.bottom_guard);

        // Merges anti-aliased glyph edges and drowns isolated bright pixels.
        let mut img = imageops::blur(&img, self.sigma);
        threshold(&mut img, self.settings.post_blur_threshold);
        imageops::invert(&mut img);
        img
    }
}

/// Same sigma OpenCV derives for a Gaussian kernel when none is given.
fn kernel_to_sigma(kernel: u32) -> f32 {
    let k = kernel.max(1) as f32;
    0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8
}

fn threshold(img: &mut GrayImage, level: u8) {
    for pixel in img.pixels_mut() {
        pixel.0[0] = if pixel.0[0] >= level { FOREGROUND } else { BACKGROUND };
    }
}

fn clear_guard_bands(img: &mut GrayImage, top: u32, bottom: u32) {
    let (width, height) = img.dimensions();
    let top_end = top.min(height);
    let bottom_start = height.saturating_sub(bottom);
    for y in (0..top_end).chain(bottom_start..height) {
        for x in 0..width {
            img.put_pixel(x, y, image::Luma([BACKGROUND]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn settings() -> PreprocessSettings {
        PreprocessSettings {
            bright_threshold: 250,
            post_blur_threshold: 55,
            blur_kernel: 3,
            top_guard: 4,
            bottom_guard: 4,
        }
    }

    fn roi() -> Roi {
        Roi { left: 10, top: 20, right: 90, bottom: 60 }
    }

    /// Dark frame with a white "glyph" block inside the ROI.
    fn frame_with_text() -> RgbImage {
        let mut frame = RgbImage::from_pixel(100, 80, Rgb([30, 30, 60]));
        for y in 30..50 {
            for x in 30..60 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        frame
    }

    #[test]
    fn output_matches_crop_size() {
        let out = Preprocessor::new(roi(), settings()).process(&frame_with_text());
        assert_eq!(out.dimensions(), (80, 40));
    }

    #[test]
    fn text_becomes_black_on_white() {
        let out = Preprocessor::new(roi(), settings()).process(&frame_with_text());
        // Block center, relative to the ROI origin.
        assert_eq!(out.get_pixel(35, 20).0[0], 0);
        // Background far from the block.
        assert_eq!(out.get_pixel(2, 20).0[0], 255);
        assert_eq!(out.get_pixel(78, 20).0[0], 255);
    }

    #[test]
    fn dim_pixels_are_background() {
        let mut frame = RgbImage::from_pixel(100, 80, Rgb([0, 0, 0]));
        for x in 20..80 {
            frame.put_pixel(x, 40, Rgb([240, 240, 240]));
        }
        let out = Preprocessor::new(roi(), settings()).process(&frame);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn guard_bands_are_cleared() {
        // Bright everywhere: only the guard rows should survive as background.
        let frame = RgbImage::from_pixel(100, 80, Rgb([255, 255, 255]));
        let out = Preprocessor::new(roi(), settings()).process(&frame);
        assert_eq!(out.get_pixel(40, 0).0[0], 255);
        assert_eq!(out.get_pixel(40, 39).0[0], 255);
        assert_eq!(out.get_pixel(40, 20).0[0], 0);
    }

    #[test]
    fn oversized_guards_blank_the_crop() {
        let mut s = settings();
        s.top_guard = 30;
        s.bottom_guard = 30;
        let out = Preprocessor::new(roi(), s).process(&frame_with_text());
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn processing_is_idempotent() {
        let pre = Preprocessor::new(roi(), settings());
        let frame = frame_with_text();
        assert_eq!(pre.process(&frame).into_raw(), pre.process(&frame).into_raw());
    }

    #[test]
    fn opencv_sigma() {
        assert!((kernel_to_sigma(21) - 3.5).abs() < 1e-5);
        assert!((kernel_to_sigma(3) - 0.8).abs() < 1e-5);
    }
}
