//! Fourier transform pair between the SLM plane and the observation plane.
//!
//! The SLM (near-field) and the observation plane (far-field) are conjugate
//! domains related by a 2D discrete Fourier transform. [`FourierEngine`]
//! wraps the forward/inverse pair and owns the FFT plans, scratch, and
//! working buffers; the only per-call allocation is the returned field.
//!
//! Conventions:
//!
//! - Normalization is unitary (`1/√N` in each direction), so total power is
//!   conserved exactly by both transforms.
//! - Observation-plane data is kept fftshift-centered: DC sits at
//!   `(obs_width/2, obs_height/2)`. A flat-phase SLM field therefore maps to
//!   a single bright pixel at the center of the observation grid.
//! - An `oversample` factor ≥ 1 zero-pads the SLM field into a larger
//!   computation grid, improving point-target resolution in the far field.
//!   The inverse path crops back to the SLM grid.
//!
//! ## Example
//!
//! ```rust
//! use holo_core::field::Field;
//! use holo_core::transform::FourierEngine;
//!
//! let mut engine = FourierEngine::new(16, 16, 1);
//! let amp = vec![1.0; 256];
//! let phase = vec![0.0; 256];
//! let slm = Field::from_amp_phase(16, 16, &amp, &phase).unwrap();
//!
//! let obs = engine.forward(&slm);
//! // Flat phase: all power lands in the centered DC bin.
//! let dc = obs.get(8, 8);
//! assert!((dc.norm_sqr() - slm.total_power()).abs() < 1e-9);
//!
//! let back = engine.inverse(&obs);
//! assert!((back.get(3, 5) - slm.get(3, 5)).norm() < 1e-10);
//! ```

use std::sync::Arc;

use rustfft::{num_complex::Complex64, Fft, FftPlanner};

use crate::field::Field;

/// Planned 2D FFT pair between the SLM grid and the observation grid.
///
/// Performance-critical: invoked twice per optimizer iteration, so plans and
/// scratch space are created once and reused for the whole run.
pub struct FourierEngine {
    slm_width: usize,
    slm_height: usize,
    obs_width: usize,
    obs_height: usize,
    fwd_row: Arc<dyn Fft<f64>>,
    fwd_col: Arc<dyn Fft<f64>>,
    inv_row: Arc<dyn Fft<f64>>,
    inv_col: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
    col_buf: Vec<Complex64>,
    shift_buf: Vec<Complex64>,
    work: Vec<Complex64>,
}

impl std::fmt::Debug for FourierEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FourierEngine")
            .field("slm", &(self.slm_width, self.slm_height))
            .field("obs", &(self.obs_width, self.obs_height))
            .finish()
    }
}

impl FourierEngine {
    /// Create an engine for an SLM grid of `slm_width × slm_height` with the
    /// given zero-padding factor.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is zero or `oversample` is zero.
    pub fn new(slm_width: usize, slm_height: usize, oversample: usize) -> Self {
        assert!(slm_width > 0 && slm_height > 0, "SLM grid must be non-empty");
        assert!(oversample > 0, "oversample factor must be at least 1");

        let obs_width = slm_width * oversample;
        let obs_height = slm_height * oversample;

        let mut planner = FftPlanner::new();
        let fwd_row = planner.plan_fft_forward(obs_width);
        let fwd_col = planner.plan_fft_forward(obs_height);
        let inv_row = planner.plan_fft_inverse(obs_width);
        let inv_col = planner.plan_fft_inverse(obs_height);

        let scratch_len = fwd_row
            .get_inplace_scratch_len()
            .max(fwd_col.get_inplace_scratch_len())
            .max(inv_row.get_inplace_scratch_len())
            .max(inv_col.get_inplace_scratch_len());

        Self {
            slm_width,
            slm_height,
            obs_width,
            obs_height,
            fwd_row,
            fwd_col,
            inv_row,
            inv_col,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
            col_buf: vec![Complex64::new(0.0, 0.0); obs_height],
            shift_buf: vec![Complex64::new(0.0, 0.0); obs_width * obs_height],
            work: vec![Complex64::new(0.0, 0.0); obs_width * obs_height],
        }
    }

    /// SLM grid shape `(width, height)`.
    pub fn slm_shape(&self) -> (usize, usize) {
        (self.slm_width, self.slm_height)
    }

    /// Observation (computation) grid shape `(width, height)`.
    pub fn obs_shape(&self) -> (usize, usize) {
        (self.obs_width, self.obs_height)
    }

    /// Transform an SLM-plane field to the observation plane.
    ///
    /// Zero-pads to the computation grid, applies the unitary 2D FFT, and
    /// fftshifts so DC is centered. The transform runs directly in the
    /// returned field's storage; no auxiliary buffer is allocated.
    ///
    /// # Panics
    ///
    /// Panics if `slm` does not match the SLM grid shape.
    pub fn forward(&mut self, slm: &Field) -> Field {
        assert_eq!(
            slm.shape(),
            (self.slm_width, self.slm_height),
            "SLM field shape mismatch"
        );

        let mut buf = vec![Complex64::new(0.0, 0.0); self.obs_width * self.obs_height];
        for y in 0..self.slm_height {
            let src = &slm.as_slice()[y * self.slm_width..(y + 1) * self.slm_width];
            buf[y * self.obs_width..y * self.obs_width + self.slm_width].copy_from_slice(src);
        }

        fft2(
            &self.fwd_row,
            &self.fwd_col,
            &mut self.scratch,
            &mut self.col_buf,
            &mut buf,
            self.obs_width,
            self.obs_height,
        );

        let norm = 1.0 / ((self.obs_width * self.obs_height) as f64).sqrt();
        for z in buf.iter_mut() {
            *z *= norm;
        }

        rotate(
            &mut buf,
            &mut self.shift_buf,
            self.obs_width,
            self.obs_height,
            self.obs_width / 2,
            self.obs_height / 2,
        );

        Field::from_data(self.obs_width, self.obs_height, buf)
            .unwrap_or_else(|_| unreachable!("buffer sized to the observation grid"))
    }

    /// Transform an observation-plane field back to the SLM plane.
    ///
    /// Undoes the fftshift, applies the unitary inverse 2D FFT, and crops to
    /// the SLM grid. The intermediate copy lives in the engine's reusable
    /// work buffer.
    ///
    /// # Panics
    ///
    /// Panics if `obs` does not match the observation grid shape.
    pub fn inverse(&mut self, obs: &Field) -> Field {
        assert_eq!(
            obs.shape(),
            (self.obs_width, self.obs_height),
            "observation field shape mismatch"
        );

        self.work.copy_from_slice(obs.as_slice());

        // Undo the centering shift. For odd sizes the inverse rotation
        // differs from the forward one by a single sample.
        rotate(
            &mut self.work,
            &mut self.shift_buf,
            self.obs_width,
            self.obs_height,
            self.obs_width - self.obs_width / 2,
            self.obs_height - self.obs_height / 2,
        );

        fft2(
            &self.inv_row,
            &self.inv_col,
            &mut self.scratch,
            &mut self.col_buf,
            &mut self.work,
            self.obs_width,
            self.obs_height,
        );

        let norm = 1.0 / ((self.obs_width * self.obs_height) as f64).sqrt();
        for z in self.work.iter_mut() {
            *z *= norm;
        }

        let mut out = Field::zeros(self.slm_width, self.slm_height);
        for y in 0..self.slm_height {
            for x in 0..self.slm_width {
                out.set(x, y, self.work[y * self.obs_width + x]);
            }
        }
        out
    }
}

/// In-place 2D FFT over the computation grid: rows first, then columns.
fn fft2(
    row_fft: &Arc<dyn Fft<f64>>,
    col_fft: &Arc<dyn Fft<f64>>,
    scratch: &mut [Complex64],
    col_buf: &mut [Complex64],
    buf: &mut [Complex64],
    width: usize,
    height: usize,
) {
    for y in 0..height {
        let row = &mut buf[y * width..(y + 1) * width];
        row_fft.process_with_scratch(row, scratch);
    }

    for x in 0..width {
        for y in 0..height {
            col_buf[y] = buf[y * width + x];
        }
        col_fft.process_with_scratch(col_buf, scratch);
        for y in 0..height {
            buf[y * width + x] = col_buf[y];
        }
    }
}

/// Circularly rotate the grid by `(sx, sy)` through the reusable temporary.
/// `(w/2, h/2)` centers DC after a forward FFT.
fn rotate(
    buf: &mut [Complex64],
    tmp: &mut [Complex64],
    width: usize,
    height: usize,
    sx: usize,
    sy: usize,
) {
    for y in 0..height {
        let ty = (y + sy) % height;
        for x in 0..width {
            let tx = (x + sx) % width;
            tmp[ty * width + tx] = buf[y * width + x];
        }
    }
    buf.copy_from_slice(tmp);
}
