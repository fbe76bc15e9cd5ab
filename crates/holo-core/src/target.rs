//! Target model: the desired far-field pattern.
//!
//! A [`Target`] is either a dense amplitude grid aligned to the observation
//! plane, or a sparse list of point targets ("spot array") with continuous
//! positions and per-spot relative amplitudes. Both kinds expose the same
//! narrow interface the optimizer and the feedback adapter need:
//!
//! - normalized target amplitude per region ([`Target::amplitudes`]),
//! - initial per-region weights ([`Target::initial_weights`]),
//! - measured amplitude per region from an observation field
//!   ([`Target::extract_amplitude`]).
//!
//! Target amplitudes are normalized at construction so that total target
//! power is 1; power bookkeeping downstream is scale-free.
//!
//! ## Example
//!
//! ```rust
//! use holo_core::target::{ExtractPolicy, SpotTarget, Target};
//!
//! let spots = vec![
//!     SpotTarget { x: 16.0, y: 16.0, amplitude: 1.0 },
//!     SpotTarget { x: 48.0, y: 48.0, amplitude: 2.0 },
//! ];
//! let target = Target::spots(64, 64, spots, 2, ExtractPolicy::Sum).unwrap();
//! assert_eq!(target.region_count(), 2);
//!
//! // Amplitudes are normalized to unit total power: 1² + 2² → 1/√5, 2/√5.
//! let amps = target.amplitudes();
//! assert!((amps[1] / amps[0] - 2.0).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

use crate::field::Field;

/// Error type for target construction.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetError {
    /// Dense array length does not match the observation grid.
    ShapeMismatch { expected: usize, got: usize },
    /// Two spot integration regions overlap under the configured radius.
    DuplicateRegion { first: usize, second: usize },
    /// A spot's integration region does not fit inside the grid.
    RegionOutOfBounds { index: usize },
    /// A spot has a non-positive or non-finite requested amplitude.
    InvalidAmplitude { index: usize },
    /// The target carries no power (all-zero dense array or no spots).
    EmptyTarget,
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::ShapeMismatch { expected, got } => {
                write!(f, "dense target length {} does not match grid size {}", got, expected)
            }
            TargetError::DuplicateRegion { first, second } => {
                write!(f, "integration regions of spots {} and {} overlap", first, second)
            }
            TargetError::RegionOutOfBounds { index } => {
                write!(f, "integration region of spot {} falls outside the grid", index)
            }
            TargetError::InvalidAmplitude { index } => {
                write!(f, "spot {} has a non-positive or non-finite amplitude", index)
            }
            TargetError::EmptyTarget => write!(f, "target carries no power"),
        }
    }
}

impl std::error::Error for TargetError {}

/// How intensity is gathered from a spot's integration region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractPolicy {
    /// Sum intensity over the whole region.
    Sum,
    /// Take the peak intensity within the region.
    Peak,
}

/// A single point target with a continuous (sub-pixel) observation-plane
/// position and a relative amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotTarget {
    /// Observation-plane x position in pixels.
    pub x: f64,
    /// Observation-plane y position in pixels.
    pub y: f64,
    /// Relative target amplitude (normalized at `Target` construction).
    pub amplitude: f64,
}

/// Measured amplitude per target region.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// Full observation-grid amplitude array (dense targets).
    Dense(Vec<f64>),
    /// One amplitude per spot (spot-array targets).
    PerSpot(Vec<f64>),
}

impl Extracted {
    /// Borrow the underlying values regardless of kind.
    pub fn values(&self) -> &[f64] {
        match self {
            Extracted::Dense(v) => v,
            Extracted::PerSpot(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TargetKind {
    Dense {
        /// Normalized amplitude per observation-grid pixel.
        amplitude: Vec<f64>,
    },
    Spots {
        spots: Vec<SpotTarget>,
        radius: usize,
        policy: ExtractPolicy,
    },
}

/// Desired far-field pattern, dense or spot-array.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    kind: TargetKind,
    obs_width: usize,
    obs_height: usize,
}

impl Target {
    /// Build a dense target from an amplitude array aligned to the
    /// observation grid (row-major). The array is normalized to unit total
    /// power.
    pub fn dense(
        obs_width: usize,
        obs_height: usize,
        amplitude: Vec<f64>,
    ) -> Result<Self, TargetError> {
        let n = obs_width * obs_height;
        if amplitude.len() != n {
            return Err(TargetError::ShapeMismatch { expected: n, got: amplitude.len() });
        }
        let power: f64 = amplitude.iter().map(|a| a * a).sum();
        if power <= 0.0 || !power.is_finite() {
            return Err(TargetError::EmptyTarget);
        }
        let norm = power.sqrt();
        let amplitude = amplitude.into_iter().map(|a| a / norm).collect();
        Ok(Self {
            kind: TargetKind::Dense { amplitude },
            obs_width,
            obs_height,
        })
    }

    /// Build a spot-array target.
    ///
    /// Each spot's integration region is the square of side `2·radius + 1`
    /// centered on the spot's nearest pixel. Regions must fit inside the
    /// grid and must not overlap each other; amplitudes are normalized so
    /// total target power is 1.
    pub fn spots(
        obs_width: usize,
        obs_height: usize,
        mut spots: Vec<SpotTarget>,
        radius: usize,
        policy: ExtractPolicy,
    ) -> Result<Self, TargetError> {
        if spots.is_empty() {
            return Err(TargetError::EmptyTarget);
        }
        for (i, spot) in spots.iter().enumerate() {
            if !(spot.amplitude.is_finite() && spot.amplitude > 0.0) {
                return Err(TargetError::InvalidAmplitude { index: i });
            }
            let (px, py) = nearest_pixel(spot);
            if px < radius as i64
                || py < radius as i64
                || px + radius as i64 >= obs_width as i64
                || py + radius as i64 >= obs_height as i64
            {
                return Err(TargetError::RegionOutOfBounds { index: i });
            }
        }

        // Square regions of side 2r+1 share a pixel iff both center
        // distances are at most 2r.
        let span = 2 * radius as i64;
        for i in 0..spots.len() {
            for j in (i + 1)..spots.len() {
                let (xi, yi) = nearest_pixel(&spots[i]);
                let (xj, yj) = nearest_pixel(&spots[j]);
                if (xi - xj).abs() <= span && (yi - yj).abs() <= span {
                    return Err(TargetError::DuplicateRegion { first: i, second: j });
                }
            }
        }

        let power: f64 = spots.iter().map(|s| s.amplitude * s.amplitude).sum();
        let norm = power.sqrt();
        for spot in spots.iter_mut() {
            spot.amplitude /= norm;
        }

        Ok(Self {
            kind: TargetKind::Spots { spots, radius, policy },
            obs_width,
            obs_height,
        })
    }

    /// Observation grid shape `(width, height)`.
    pub fn obs_shape(&self) -> (usize, usize) {
        (self.obs_width, self.obs_height)
    }

    /// Number of target regions: grid pixels for dense targets, spot count
    /// for spot arrays.
    pub fn region_count(&self) -> usize {
        match &self.kind {
            TargetKind::Dense { amplitude } => amplitude.len(),
            TargetKind::Spots { spots, .. } => spots.len(),
        }
    }

    /// True for spot-array targets.
    pub fn is_spots(&self) -> bool {
        matches!(self.kind, TargetKind::Spots { .. })
    }

    /// The spot list, if this is a spot-array target.
    pub fn spot_list(&self) -> Option<&[SpotTarget]> {
        match &self.kind {
            TargetKind::Spots { spots, .. } => Some(spots),
            TargetKind::Dense { .. } => None,
        }
    }

    /// Spot integration radius, if this is a spot-array target.
    pub fn spot_radius(&self) -> Option<usize> {
        match &self.kind {
            TargetKind::Spots { radius, .. } => Some(*radius),
            TargetKind::Dense { .. } => None,
        }
    }

    /// Nearest observation-grid pixel of each spot.
    pub fn spot_pixels(&self) -> Vec<(usize, usize)> {
        match &self.kind {
            TargetKind::Spots { spots, .. } => spots
                .iter()
                .map(|s| {
                    let (px, py) = nearest_pixel(s);
                    (px as usize, py as usize)
                })
                .collect(),
            TargetKind::Dense { .. } => Vec::new(),
        }
    }

    /// Normalized target amplitude per region (unit total power).
    pub fn amplitudes(&self) -> Vec<f64> {
        match &self.kind {
            TargetKind::Dense { amplitude } => amplitude.clone(),
            TargetKind::Spots { spots, .. } => spots.iter().map(|s| s.amplitude).collect(),
        }
    }

    /// Initial per-region weights.
    ///
    /// Dense targets start at 1 on patterned pixels and 0 (inert) on masked
    /// pixels; spot arrays start proportional to the requested relative
    /// amplitude so brighter spots pull harder from the first iteration.
    pub fn initial_weights(&self) -> Vec<f64> {
        match &self.kind {
            TargetKind::Dense { amplitude } => amplitude
                .iter()
                .map(|&a| if a > 0.0 { 1.0 } else { 0.0 })
                .collect(),
            TargetKind::Spots { spots, .. } => spots.iter().map(|s| s.amplitude).collect(),
        }
    }

    /// Per-region mask: `true` where the weight update applies. Masked-out
    /// ("don't care") regions keep their weight forever.
    pub fn update_mask(&self) -> Vec<bool> {
        match &self.kind {
            TargetKind::Dense { amplitude } => amplitude.iter().map(|&a| a > 0.0).collect(),
            TargetKind::Spots { spots, .. } => vec![true; spots.len()],
        }
    }

    /// Measure how much amplitude landed in each target region of an
    /// observation-plane field.
    ///
    /// Spot arrays integrate intensity over each region (sum or peak per the
    /// configured policy) and return one amplitude per spot; dense targets
    /// return the full amplitude array.
    ///
    /// # Panics
    ///
    /// Panics if `observation` does not match the observation grid shape.
    pub fn extract_amplitude(&self, observation: &Field) -> Extracted {
        assert_eq!(
            observation.shape(),
            (self.obs_width, self.obs_height),
            "observation field shape mismatch"
        );
        match &self.kind {
            TargetKind::Dense { .. } => Extracted::Dense(observation.amplitude()),
            TargetKind::Spots { spots, radius, policy } => {
                let r = *radius as i64;
                let values = spots
                    .iter()
                    .map(|spot| {
                        let (px, py) = nearest_pixel(spot);
                        let mut sum = 0.0;
                        let mut peak = 0.0f64;
                        for dy in -r..=r {
                            for dx in -r..=r {
                                let x = (px + dx) as usize;
                                let y = (py + dy) as usize;
                                let intensity = observation.get(x, y).norm_sqr();
                                sum += intensity;
                                peak = peak.max(intensity);
                            }
                        }
                        match policy {
                            ExtractPolicy::Sum => sum.sqrt(),
                            ExtractPolicy::Peak => peak.sqrt(),
                        }
                    })
                    .collect();
                Extracted::PerSpot(values)
            }
        }
    }
}

fn nearest_pixel(spot: &SpotTarget) -> (i64, i64) {
    (spot.x.round() as i64, spot.y.round() as i64)
}
