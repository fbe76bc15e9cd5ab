//! Camera-image helpers for experimental feedback.
//!
//! The feedback adapter needs per-spot scalar intensities extracted from a
//! measured camera frame. This module provides the region cropping,
//! integration, and image-moment primitives that turn a registered camera
//! image into that signal: crop square integration regions around spot
//! centers, integrate them, and characterize spots via first and second
//! moments (centroid, variance, ellipticity).
//!
//! Image capture, dark-frame subtraction, and coordinate registration are
//! the acquisition layer's job; images arriving here are already aligned to
//! the declared coordinate mapping.
//!
//! ## Example
//!
//! ```rust
//! use holo_core::analysis::{extract_spot_intensities, RegionPolicy};
//!
//! // A 16×16 frame with one bright pixel.
//! let mut image = vec![0.0; 256];
//! image[8 * 16 + 8] = 5.0;
//!
//! let centers = [(8.0, 8.0)];
//! let intensities =
//!     extract_spot_intensities(&image, 16, 16, &centers, 2, RegionPolicy::Sum).unwrap();
//! assert!((intensities[0] - 5.0).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

/// Error type for image analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Image length does not match the declared shape.
    ShapeMismatch { expected: usize, got: usize },
    /// An integration region extends outside the image (and clipping was
    /// not requested).
    RegionOutOfBounds { index: usize },
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::ShapeMismatch { expected, got } => {
                write!(f, "image length {} does not match declared shape {}", got, expected)
            }
            AnalysisError::RegionOutOfBounds { index } => {
                write!(f, "integration region {} extends outside the image", index)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

/// How a region reduces to one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionPolicy {
    /// Sum all samples in the region.
    Sum,
    /// Take the brightest sample in the region.
    Peak,
}

/// Crop square integration regions of side `2·radius + 1` centered on each
/// continuous center (rounded to the nearest pixel).
///
/// With `clip` set, out-of-range samples read as zero; otherwise any region
/// leaving the image is a `RegionOutOfBounds` error.
pub fn take_regions(
    image: &[f64],
    width: usize,
    height: usize,
    centers: &[(f64, f64)],
    radius: usize,
    clip: bool,
) -> Result<Vec<Vec<f64>>, AnalysisError> {
    if image.len() != width * height {
        return Err(AnalysisError::ShapeMismatch { expected: width * height, got: image.len() });
    }
    let side = 2 * radius as i64 + 1;
    let mut regions = Vec::with_capacity(centers.len());
    for (index, &(cx, cy)) in centers.iter().enumerate() {
        let px = cx.round() as i64;
        let py = cy.round() as i64;
        let r = radius as i64;
        if !clip
            && (px - r < 0 || py - r < 0 || px + r >= width as i64 || py + r >= height as i64)
        {
            return Err(AnalysisError::RegionOutOfBounds { index });
        }
        let mut region = Vec::with_capacity((side * side) as usize);
        for dy in -r..=r {
            for dx in -r..=r {
                let x = px + dx;
                let y = py + dy;
                let value = if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                    0.0
                } else {
                    image[y as usize * width + x as usize]
                };
                region.push(value);
            }
        }
        regions.push(region);
    }
    Ok(regions)
}

/// Reduce each region of [`take_regions`] to a scalar per `policy`.
pub fn integrate_regions(
    image: &[f64],
    width: usize,
    height: usize,
    centers: &[(f64, f64)],
    radius: usize,
    policy: RegionPolicy,
) -> Result<Vec<f64>, AnalysisError> {
    let regions = take_regions(image, width, height, centers, radius, false)?;
    Ok(regions
        .iter()
        .map(|region| match policy {
            RegionPolicy::Sum => region.iter().sum(),
            RegionPolicy::Peak => region.iter().cloned().fold(f64::MIN, f64::max),
        })
        .collect())
}

/// Per-spot scalar intensities for
/// [`crate::feedback::FeedbackSource::ExperimentalSpots`]: one region
/// integral per spot center, in center order.
pub fn extract_spot_intensities(
    image: &[f64],
    width: usize,
    height: usize,
    centers: &[(f64, f64)],
    radius: usize,
    policy: RegionPolicy,
) -> Result<Vec<f64>, AnalysisError> {
    integrate_regions(image, width, height, centers, radius, policy)
}

/// Total image signal (zeroth raw moment).
pub fn image_normalization(image: &[f64]) -> f64 {
    image.iter().sum()
}

/// Intensity-weighted centroid `(x̄, ȳ)` from the first raw moments.
/// Returns the image center for an all-zero image.
pub fn image_centroid(image: &[f64], width: usize, height: usize) -> (f64, f64) {
    let total = image_normalization(image);
    if total == 0.0 {
        return ((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0);
    }
    let mut mx = 0.0;
    let mut my = 0.0;
    for y in 0..height {
        for x in 0..width {
            let v = image[y * width + x];
            mx += v * x as f64;
            my += v * y as f64;
        }
    }
    (mx / total, my / total)
}

/// Central second moments `(m20, m02, m11)` about the given center
/// (defaults to the centroid when `None`).
pub fn image_variances(
    image: &[f64],
    width: usize,
    height: usize,
    center: Option<(f64, f64)>,
) -> (f64, f64, f64) {
    let (cx, cy) = center.unwrap_or_else(|| image_centroid(image, width, height));
    let total = image_normalization(image);
    if total == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let mut m20 = 0.0;
    let mut m02 = 0.0;
    let mut m11 = 0.0;
    for y in 0..height {
        for x in 0..width {
            let v = image[y * width + x];
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            m20 += v * dx * dx;
            m02 += v * dy * dy;
            m11 += v * dx * dy;
        }
    }
    (m20 / total, m02 / total, m11 / total)
}

/// Spot ellipticity from the second-moment triplet: `1 − λ₋/λ₊` of the
/// covariance eigenvalues. 0 for a circular spot, approaching 1 as the spot
/// degenerates to a line.
pub fn image_ellipticity(variances: (f64, f64, f64)) -> f64 {
    let (m20, m02, m11) = variances;
    let half_trace = 0.5 * (m20 + m02);
    let discriminant = (0.25 * (m20 - m02) * (m20 - m02) + m11 * m11).sqrt();
    let eig_plus = half_trace + discriminant;
    let eig_minus = half_trace - discriminant;
    if eig_plus <= 0.0 {
        return 0.0;
    }
    1.0 - eig_minus / eig_plus
}
