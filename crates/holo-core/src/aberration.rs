//! Aberration correction: Zernike fits over a field of view.
//!
//! Optical systems deliver a position-dependent phase error across their
//! field of view. This module fits calibration measurements to a Zernike
//! polynomial basis (Noll-indexed, orthonormal on the unit disk) per
//! calibrated field-of-view position, and renders SLM-plane correction maps
//! that pre-compensate the error for a source at any requested position.
//!
//! A [`CorrectionMap`] is fit once from calibration data, then held
//! immutable and reused across many optimizer runs; the optimizer only
//! reads it (see [`crate::optimizer::PhaseRetrieval::with_correction`]).
//!
//! ## Example
//!
//! ```rust
//! use holo_core::aberration::{AberrationModel, FovSamples, PhaseSample, ZernikeBasis};
//!
//! // Calibration measured a pure defocus (Noll j=4) at one position.
//! let basis = ZernikeBasis::new(6);
//! let samples: Vec<PhaseSample> = (0..40)
//!     .map(|i| {
//!         let rho = 0.15 + 0.8 * (i as f64 / 40.0);
//!         let theta = i as f64 * 0.7;
//!         let (x, y) = (rho * theta.cos(), rho * theta.sin());
//!         PhaseSample { pupil_x: x, pupil_y: y, phase_error: 0.2 * basis.evaluate(3, rho, theta) }
//!     })
//!     .collect();
//! let groups = vec![FovSamples { position: (0.0, 0.0), samples }];
//!
//! let model = AberrationModel::fit(&groups, basis).unwrap();
//! let coeffs = model.coefficients(0);
//! assert!((coeffs[3] - 0.2).abs() < 1e-8);
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Error type for aberration fitting.
#[derive(Debug, Clone, PartialEq)]
pub enum AberrationError {
    /// Fewer samples than basis modes: the fit is underdetermined.
    InsufficientSamples { need: usize, have: usize },
    /// No field-of-view positions supplied.
    NoPositions,
    /// The sample geometry is degenerate; the least-squares solve failed.
    DegenerateFit,
}

impl std::fmt::Display for AberrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AberrationError::InsufficientSamples { need, have } => {
                write!(f, "need at least {} samples for the fit, got {}", need, have)
            }
            AberrationError::NoPositions => write!(f, "no field-of-view positions supplied"),
            AberrationError::DegenerateFit => write!(f, "degenerate sample geometry, fit failed"),
        }
    }
}

impl std::error::Error for AberrationError {}

/// Zernike polynomial basis, Noll-indexed, orthonormal on the unit disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZernikeBasis {
    modes: usize,
}

impl ZernikeBasis {
    /// Basis with the first `modes` Noll modes (mode index 0 is piston,
    /// Noll `j = 1`).
    ///
    /// # Panics
    ///
    /// Panics if `modes` is zero.
    pub fn new(modes: usize) -> Self {
        assert!(modes > 0, "basis must have at least one mode");
        Self { modes }
    }

    /// Number of modes in the basis.
    pub fn modes(&self) -> usize {
        self.modes
    }

    /// Radial and azimuthal order `(n, m)` for 0-based mode index
    /// (Noll `j = mode + 1`).
    pub fn orders(mode: usize) -> (u32, i32) {
        let j = mode + 1;
        let mut n = 0usize;
        let mut j1 = j - 1;
        while j1 > n {
            n += 1;
            j1 -= n;
        }
        let base = if n % 2 == 0 { 2 * ((j1 + 1) / 2) } else { 2 * (j1 / 2) + 1 };
        let mut m = base as i32;
        // Noll: even j carries the cosine term, odd j the sine term.
        if m != 0 && j % 2 == 1 {
            m = -m;
        }
        (n as u32, m)
    }

    /// Evaluate one mode at polar pupil coordinates (`rho` ∈ [0, 1]).
    ///
    /// Includes the orthonormalization factor (√(n+1), with an extra √2 for
    /// m ≠ 0), so distinct modes are orthonormal over the unit disk.
    pub fn evaluate(&self, mode: usize, rho: f64, theta: f64) -> f64 {
        assert!(mode < self.modes, "mode index out of range");
        let (n, m) = Self::orders(mode);
        let m_abs = m.unsigned_abs();
        let radial = radial_polynomial(n, m_abs, rho);
        let norm = if m == 0 {
            ((n + 1) as f64).sqrt()
        } else {
            (2.0 * (n + 1) as f64).sqrt()
        };
        let azimuthal = if m > 0 {
            (m_abs as f64 * theta).cos()
        } else if m < 0 {
            (m_abs as f64 * theta).sin()
        } else {
            1.0
        };
        norm * radial * azimuthal
    }

    /// Evaluate one mode at Cartesian pupil coordinates.
    pub fn evaluate_xy(&self, mode: usize, x: f64, y: f64) -> f64 {
        self.evaluate(mode, (x * x + y * y).sqrt(), y.atan2(x))
    }

    /// Render a single mode with unit coefficient on an SLM grid, the pupil
    /// being the inscribed disk (zero phase outside it). Useful for
    /// inspecting or displaying individual aberration terms.
    pub fn render(&self, mode: usize, width: usize, height: usize) -> CorrectionMap {
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let radius = 0.5 * width.min(height) as f64;
        let mut phase = vec![0.0; width * height];
        for y in 0..height {
            for x in 0..width {
                let px = (x as f64 - cx) / radius;
                let py = (y as f64 - cy) / radius;
                if px * px + py * py > 1.0 {
                    continue;
                }
                phase[y * width + x] = self.evaluate_xy(mode, px, py);
            }
        }
        CorrectionMap { width, height, phase }
    }
}

/// Zernike radial polynomial `R_n^m(ρ)` for `m = |m|`.
fn radial_polynomial(n: u32, m: u32, rho: f64) -> f64 {
    if (n - m) % 2 != 0 {
        return 0.0;
    }
    let kmax = (n - m) / 2;
    let mut sum = 0.0;
    for k in 0..=kmax {
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        let num = factorial(n - k);
        let den = factorial(k) * factorial((n + m) / 2 - k) * factorial((n - m) / 2 - k);
        sum += sign * num / den * rho.powi((n - 2 * k) as i32);
    }
    sum
}

fn factorial(k: u32) -> f64 {
    (1..=k).fold(1.0, |acc, v| acc * v as f64)
}

/// One calibration sample: a pupil-plane coordinate (unit-disk normalized)
/// and the measured phase error there, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSample {
    pub pupil_x: f64,
    pub pupil_y: f64,
    pub phase_error: f64,
}

/// Calibration samples measured for one field-of-view position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FovSamples {
    /// Field-of-view position (arbitrary caller units, e.g. camera pixels).
    pub position: (f64, f64),
    pub samples: Vec<PhaseSample>,
}

/// Phase-offset field on the SLM grid, composed additively into the
/// optimizer's result. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionMap {
    width: usize,
    height: usize,
    phase: Vec<f64>,
}

impl CorrectionMap {
    /// Constant phase offset over the whole grid.
    pub fn constant(width: usize, height: usize, value: f64) -> Self {
        Self { width, height, phase: vec![value; width * height] }
    }

    /// Grid shape `(width, height)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Phase offsets in radians, row-major.
    pub fn phase(&self) -> &[f64] {
        &self.phase
    }
}

/// Zernike coefficients fit per calibrated field-of-view position.
///
/// Fit once from calibration measurements, then evaluated (read-only) for
/// each optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AberrationModel {
    basis: ZernikeBasis,
    positions: Vec<(f64, f64)>,
    coefficients: Vec<Vec<f64>>,
}

impl AberrationModel {
    /// Least-squares fit of the basis to each position's samples.
    ///
    /// Fails with `InsufficientSamples` if any position has fewer samples
    /// than basis modes (underdetermined), `NoPositions` for an empty input.
    pub fn fit(groups: &[FovSamples], basis: ZernikeBasis) -> Result<Self, AberrationError> {
        if groups.is_empty() {
            return Err(AberrationError::NoPositions);
        }
        let modes = basis.modes();
        let mut positions = Vec::with_capacity(groups.len());
        let mut coefficients = Vec::with_capacity(groups.len());

        for group in groups {
            if group.samples.len() < modes {
                return Err(AberrationError::InsufficientSamples {
                    need: modes,
                    have: group.samples.len(),
                });
            }
            let rows = group.samples.len();
            let mut design = DMatrix::zeros(rows, modes);
            let mut rhs = DVector::zeros(rows);
            for (r, sample) in group.samples.iter().enumerate() {
                for c in 0..modes {
                    design[(r, c)] = basis.evaluate_xy(c, sample.pupil_x, sample.pupil_y);
                }
                rhs[r] = sample.phase_error;
            }
            let svd = design.svd(true, true);
            let solution = svd
                .solve(&rhs, 1e-12)
                .map_err(|_| AberrationError::DegenerateFit)?;
            positions.push(group.position);
            coefficients.push(solution.iter().cloned().collect());
        }

        Ok(Self { basis, positions, coefficients })
    }

    /// The basis this model was fit against.
    pub fn basis(&self) -> ZernikeBasis {
        self.basis
    }

    /// Calibrated field-of-view positions, in fit order.
    pub fn positions(&self) -> &[(f64, f64)] {
        &self.positions
    }

    /// Fitted coefficients for one calibrated position.
    pub fn coefficients(&self, index: usize) -> &[f64] {
        &self.coefficients[index]
    }

    /// Coefficients interpolated to an arbitrary field-of-view position:
    /// inverse-square-distance blend of the calibrated fits (a single
    /// calibrated position acts as a global fit).
    pub fn interpolate(&self, position: (f64, f64)) -> Vec<f64> {
        if self.positions.len() == 1 {
            return self.coefficients[0].clone();
        }
        let mut blended = vec![0.0; self.basis.modes()];
        let mut total = 0.0;
        for (pos, coeffs) in self.positions.iter().zip(self.coefficients.iter()) {
            let dx = pos.0 - position.0;
            let dy = pos.1 - position.1;
            let d2 = dx * dx + dy * dy;
            if d2 < 1e-18 {
                return coeffs.clone();
            }
            let w = 1.0 / d2;
            total += w;
            for (b, &c) in blended.iter_mut().zip(coeffs.iter()) {
                *b += w * c;
            }
        }
        for b in blended.iter_mut() {
            *b /= total;
        }
        blended
    }

    /// Render the correction phase field for a source at the given
    /// field-of-view position, on an SLM grid of the given shape.
    ///
    /// The pupil is the inscribed disk of the grid; pixels outside it get
    /// zero phase.
    pub fn evaluate(&self, position: (f64, f64), width: usize, height: usize) -> CorrectionMap {
        let coeffs = self.interpolate(position);
        self.render(&coeffs, width, height)
    }

    /// Blend per-spot corrections into a single SLM-plane map, weighting
    /// each field-of-view point by its relative amplitude. Used for
    /// multi-spot targets where each spot sees a different aberration.
    pub fn compose(
        &self,
        points: &[((f64, f64), f64)],
        width: usize,
        height: usize,
    ) -> CorrectionMap {
        let modes = self.basis.modes();
        let mut blended = vec![0.0; modes];
        let mut total = 0.0;
        for &(position, amplitude) in points {
            let w = amplitude.abs();
            let coeffs = self.interpolate(position);
            for (b, c) in blended.iter_mut().zip(coeffs.iter()) {
                *b += w * c;
            }
            total += w;
        }
        if total > 0.0 {
            for b in blended.iter_mut() {
                *b /= total;
            }
        }
        self.render(&blended, width, height)
    }

    fn render(&self, coeffs: &[f64], width: usize, height: usize) -> CorrectionMap {
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let radius = 0.5 * width.min(height) as f64;
        let mut phase = vec![0.0; width * height];
        for y in 0..height {
            for x in 0..width {
                let px = (x as f64 - cx) / radius;
                let py = (y as f64 - cy) / radius;
                let rho = (px * px + py * py).sqrt();
                if rho > 1.0 {
                    continue; // outside the pupil
                }
                let theta = py.atan2(px);
                let mut value = 0.0;
                for (mode, &c) in coeffs.iter().enumerate() {
                    if c != 0.0 {
                        value += c * self.basis.evaluate(mode, rho, theta);
                    }
                }
                phase[y * width + x] = value;
            }
        }
        CorrectionMap { width, height, phase }
    }
}
