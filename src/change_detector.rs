//! Change Detection Module
//!
//! Compares the perceptual hash of each preprocessed frame with the previous
//! one and reports when the subtitle on screen has changed. Hashing is cheap
//! compared to OCR, so only frames that survive this filter are transcribed.

use anyhow::{Result, anyhow};
use image::{DynamicImage, GrayImage, Luma};
use imagehash::PerceptualHash;
use log::debug;

/// A fixed-size perceptual hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    bits: Vec<bool>,
}

impl Fingerprint {
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Fingerprint { bits }
    }

    /// Hamming distance between two fingerprints of the same size.
    pub fn distance(&self, other: &Fingerprint) -> Result<u32> {
        if self.bits.len() != other.bits.len() {
            return Err(anyhow!(
                "Cannot compare fingerprints of different lengths ({} and {}).",
                self.bits.len(),
                other.bits.len()
            ));
        }

        let distance = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .filter(|(x, y)| x != y)
            .count() as u32;

        Ok(distance)
    }
}

/// Produces fingerprints for preprocessed frames.
pub trait Fingerprinter {
    fn fingerprint(&self, image: &DynamicImage) -> Fingerprint;
}

/// `imagehash` perceptual (DCT) hash with a square hash of `size * size` bits.
pub struct PerceptualFingerprinter {
    hasher: PerceptualHash,
}

impl PerceptualFingerprinter {
    pub fn new(size: usize) -> Self {
        let hasher = PerceptualHash::new()
            .with_image_size(size, size)
            .with_hash_size(size, size);
        PerceptualFingerprinter { hasher }
    }
}

impl Fingerprinter for PerceptualFingerprinter {
    fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        Fingerprint::from_bits(self.hasher.hash(image).bits)
    }
}

/// A detected change of the subtitle area, handed to the transcriber.
#[derive(Debug)]
pub enum SubtitleMaterial {
    /// The area is known to be empty; no OCR needed.
    Blank { timestamp_ms: f64 },
    /// The area shows something new.
    Candidate { image: GrayImage, timestamp_ms: f64 },
}

impl SubtitleMaterial {
    pub fn timestamp_ms(&self) -> f64 {
        match self {
            SubtitleMaterial::Blank { timestamp_ms } => *timestamp_ms,
            SubtitleMaterial::Candidate { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, SubtitleMaterial::Blank { .. })
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    pub frames: u64,
    pub changes: u64,
    pub blank_changes: u64,
}

/// Stateful detector; feed it frames in order.
pub struct ChangeDetector<F: Fingerprinter> {
    fingerprinter: F,
    threshold: u32,
    blank: Fingerprint,
    previous: Fingerprint,
    stats: DetectionStats,
}

impl<F: Fingerprinter> ChangeDetector<F> {
    /// Builds a detector whose blank sentinel is the fingerprint of an empty
    /// (all white) preprocessed image of `width` x `height`.
    pub fn new(fingerprinter: F, threshold: u32, width: u32, height: u32) -> Self {
        let background = GrayImage::from_pixel(width.max(1), height.max(1), Luma([255]));
        let blank = fingerprinter.fingerprint(&DynamicImage::ImageLuma8(background));

        ChangeDetector {
            fingerprinter,
            threshold,
            previous: blank.clone(),
            blank,
            stats: DetectionStats::default(),
        }
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    /// Processes one preprocessed frame. Returns the change event, if any.
    pub fn observe(
        &mut self,
        image: GrayImage,
        timestamp_ms: f64,
    ) -> Result<Option<SubtitleMaterial>> {
        let image = DynamicImage::ImageLuma8(image);
        let current = self.fingerprinter.fingerprint(&image);
        let distance = current.distance(&self.previous)?;
        self.stats.frames += 1;

        let material = if distance <= self.threshold {
            None
        } else if current == self.blank {
            self.stats.changes += 1;
            self.stats.blank_changes += 1;
            debug!("Subtitle cleared at {:.0} ms (distance {})", timestamp_ms, distance);
            Some(SubtitleMaterial::Blank { timestamp_ms })
        } else {
            self.stats.changes += 1;
            debug!("Subtitle changed at {:.0} ms (distance {})", timestamp_ms, distance);
            Some(SubtitleMaterial::Candidate {
                image: image.into_luma8(),
                timestamp_ms,
            })
        };

        self.previous = current;
        Ok(material)
    }
}
