//! Pixel comparison of two screenshots

use image::{Pixel, Rgba, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};

/// Allowed per-channel difference (anti-aliasing, compression)
pub const CHANNEL_TOLERANCE: u8 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone, Serialize)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,

    /// Pixels of the union of both canvases
    pub total_pixels: u64,

    /// Dimensions (width, height) of reference and candidate
    pub reference_size: (u32, u32),
    pub candidate_size: (u32, u32),

    /// Path to the diff image (if generated)
    pub diff_image_path: Option<PathBuf>,

    pub reference_hash: String,
    pub candidate_hash: String,
}

impl VisualDiff {
    pub fn same_size(&self) -> bool {
        self.reference_size == self.candidate_size
    }

    /// Fail with `ScreenshotMismatch` when over the threshold
    pub fn ensure_within(&self, name: &str, threshold: f64) -> E2eResult<()> {
        if self.diff_percent <= threshold {
            Ok(())
        } else {
            Err(E2eError::ScreenshotMismatch {
                name: name.to_string(),
                diff_percent: self.diff_percent,
                threshold,
            })
        }
    }
}

/// Compare `candidate` against `reference`
///
/// Pixels outside the overlap of differently sized images count as
/// differing. A diff image (differences in red over the dimmed candidate)
/// is written to `diff_path` when any pixel differs.
pub fn compare_images(
    reference: &Path,
    candidate: &Path,
    diff_path: &Path,
    threshold: f64,
) -> E2eResult<VisualDiff> {
    for path in [reference, candidate] {
        if !path.exists() {
            return Err(E2eError::Visual(format!(
                "screenshot not found: {}",
                path.display()
            )));
        }
    }

    let reference_hash = hash_file(reference)?;
    let candidate_hash = hash_file(candidate)?;

    let reference_img = image::open(reference)?.to_rgba8();
    let candidate_img = image::open(candidate)?.to_rgba8();
    let reference_size = reference_img.dimensions();
    let candidate_size = candidate_img.dimensions();

    // Quick hash comparison
    if reference_hash == candidate_hash {
        debug!("Screenshots match exactly (same hash)");
        let (width, height) = reference_size;
        return Ok(VisualDiff {
            matches: true,
            diff_percent: 0.0,
            diff_pixels: 0,
            total_pixels: u64::from(width) * u64::from(height),
            reference_size,
            candidate_size,
            diff_image_path: None,
            reference_hash,
            candidate_hash,
        });
    }

    if reference_size != candidate_size {
        warn!(
            "Screenshot dimensions differ: {:?} vs {:?}",
            reference_size, candidate_size
        );
    }

    let (diff_img, diff_pixels) = diff(&reference_img, &candidate_img);
    let total_pixels = u64::from(diff_img.width()) * u64::from(diff_img.height());
    let diff_percent = if total_pixels == 0 {
        0.0
    } else {
        (diff_pixels as f64 / total_pixels as f64) * 100.0
    };
    let matches = diff_percent <= threshold;

    let diff_image_path = if diff_pixels > 0 {
        if let Some(parent) = diff_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        diff_img.save(diff_path)?;
        Some(diff_path.to_path_buf())
    } else {
        None
    };

    if !matches {
        warn!(
            "{:.2}% pixels differ (threshold: {:.2}%)",
            diff_percent, threshold
        );
    }

    Ok(VisualDiff {
        matches,
        diff_percent,
        diff_pixels,
        total_pixels,
        reference_size,
        candidate_size,
        diff_image_path,
        reference_hash,
        candidate_hash,
    })
}

/// Diff image over the union canvas, plus the differing pixel count
fn diff(reference: &RgbaImage, candidate: &RgbaImage) -> (RgbaImage, u64) {
    let width = reference.width().max(candidate.width());
    let height = reference.height().max(candidate.height());
    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = reference.get_pixel_checked(x, y);
            let b = candidate.get_pixel_checked(x, y);
            match (a, b) {
                (Some(a), Some(b)) if !pixels_differ(a, b) => {
                    // Keep original but dim it
                    let channels = b.channels();
                    diff_img.put_pixel(
                        x,
                        y,
                        Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                    );
                }
                _ => {
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                }
            }
        }
    }

    (diff_img, diff_pixels)
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| x.abs_diff(*y) > CHANNEL_TOLERANCE)
}

/// Hash a file using SHA256
fn hash_file(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(path: &Path, width: u32, height: u32, color: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(color))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_identical_files_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("production.png");
        let b = dir.path().join("staging.png");
        solid(&a, 4, 4, [10, 20, 30, 255]);
        std::fs::copy(&a, &b).unwrap();

        let result = compare_images(&a, &b, &dir.path().join("diff.png"), 0.5).unwrap();
        assert!(result.matches);
        assert_eq!(result.diff_pixels, 0);
        assert_eq!(result.total_pixels, 16);
        assert_eq!(result.reference_hash, result.candidate_hash);
        assert!(result.diff_image_path.is_none());
    }

    #[test]
    fn test_small_channel_noise_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        solid(&a, 4, 4, [100, 100, 100, 255]);
        solid(&b, 4, 4, [105, 96, 100, 255]);

        let result = compare_images(&a, &b, &dir.path().join("diff.png"), 0.0).unwrap();
        assert!(result.matches);
        assert_eq!(result.diff_pixels, 0);
        assert_ne!(result.reference_hash, result.candidate_hash);
    }

    #[test]
    fn test_differing_pixels_write_diff_image() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        solid(&a, 10, 10, [0, 0, 0, 255]);
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        img.put_pixel(3, 3, Rgba([255, 255, 255, 255]));
        img.save(&b).unwrap();

        let diff_path = dir.path().join("out/diff.png");
        let result = compare_images(&a, &b, &diff_path, 0.5).unwrap();
        assert_eq!(result.diff_pixels, 1);
        assert!((result.diff_percent - 1.0).abs() < f64::EPSILON);
        assert!(!result.matches);
        assert!(diff_path.exists());
        assert!(matches!(
            result.ensure_within("donut", 0.5),
            Err(E2eError::ScreenshotMismatch { .. })
        ));
    }

    #[test]
    fn test_size_mismatch_counts_missing_area() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        solid(&a, 10, 10, [0, 0, 0, 255]);
        solid(&b, 10, 20, [0, 0, 0, 255]);

        let result = compare_images(&a, &b, &dir.path().join("diff.png"), 0.5).unwrap();
        assert!(!result.same_size());
        assert_eq!(result.total_pixels, 200);
        assert_eq!(result.diff_pixels, 100);
        assert!((result.diff_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        solid(&a, 1, 1, [0, 0, 0, 255]);
        let result = compare_images(&a, &dir.path().join("nope.png"), &dir.path().join("d.png"), 0.5);
        assert!(matches!(result, Err(E2eError::Visual(_))));
    }
}
