//! Complex 2D field grid shared by the SLM and observation planes.
//!
//! A [`Field`] is a row-major array of `Complex64` samples over a fixed
//! `width × height` grid. Two conjugate-domain instances exist per optimizer
//! iteration: the SLM-plane field (phase-only, amplitude pinned to the
//! illumination profile) and the observation-plane field (amplitude carries
//! the delivered pattern).
//!
//! ## Example
//!
//! ```rust
//! use holo_core::field::Field;
//!
//! let amp = vec![1.0; 16];
//! let phase = vec![0.0; 16];
//! let field = Field::from_amp_phase(4, 4, &amp, &phase).unwrap();
//! assert!((field.total_power() - 16.0).abs() < 1e-12);
//! ```

use num_complex::Complex64;

/// Error type for field construction.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Supplied data length does not match `width * height`.
    ShapeMismatch { expected: usize, got: usize },
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::ShapeMismatch { expected, got } => {
                write!(f, "field data length {} does not match grid size {}", got, expected)
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Complex-valued 2D array over a fixed grid, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    width: usize,
    height: usize,
    data: Vec<Complex64>,
}

impl Field {
    /// Create a zero field of the given shape.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![Complex64::new(0.0, 0.0); width * height],
        }
    }

    /// Create a field from raw complex samples (row-major).
    pub fn from_data(width: usize, height: usize, data: Vec<Complex64>) -> Result<Self, FieldError> {
        if data.len() != width * height {
            return Err(FieldError::ShapeMismatch {
                expected: width * height,
                got: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Create a field from amplitude and phase arrays (both row-major).
    pub fn from_amp_phase(
        width: usize,
        height: usize,
        amplitude: &[f64],
        phase: &[f64],
    ) -> Result<Self, FieldError> {
        let n = width * height;
        if amplitude.len() != n {
            return Err(FieldError::ShapeMismatch { expected: n, got: amplitude.len() });
        }
        if phase.len() != n {
            return Err(FieldError::ShapeMismatch { expected: n, got: phase.len() });
        }
        let data = amplitude
            .iter()
            .zip(phase.iter())
            .map(|(&a, &p)| Complex64::from_polar(a, p))
            .collect();
        Ok(Self { width, height, data })
    }

    /// Grid width in samples.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height in samples.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)` pair.
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the grid is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample at `(x, y)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Complex64 {
        self.data[y * self.width + x]
    }

    /// Set the sample at `(x, y)`.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: Complex64) {
        self.data[y * self.width + x] = value;
    }

    /// Borrow the raw samples.
    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    /// Mutably borrow the raw samples.
    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    /// Per-sample amplitude `|z|`.
    pub fn amplitude(&self) -> Vec<f64> {
        self.data.iter().map(|z| z.norm()).collect()
    }

    /// Per-sample phase `arg(z)` in radians, in `(-π, π]`.
    pub fn phase(&self) -> Vec<f64> {
        self.data.iter().map(|z| z.arg()).collect()
    }

    /// Per-sample intensity `|z|²`.
    pub fn intensity(&self) -> Vec<f64> {
        self.data.iter().map(|z| z.norm_sqr()).collect()
    }

    /// Total power `Σ |z|²` over the grid.
    pub fn total_power(&self) -> f64 {
        self.data.iter().map(|z| z.norm_sqr()).sum()
    }

    /// True iff every sample has finite real and imaginary parts.
    ///
    /// The optimizer checks this after each transform; a `false` here is a
    /// numerical fault and aborts the run.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|z| z.re.is_finite() && z.im.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_zeros_shape_and_power() {
        let f = Field::zeros(8, 4);
        assert_eq!(f.shape(), (8, 4));
        assert_eq!(f.len(), 32);
        assert!(f.total_power().abs() < EPS);
    }

    #[test]
    fn test_from_data_shape_mismatch() {
        let data = vec![Complex64::new(1.0, 0.0); 7];
        let err = Field::from_data(4, 2, data).unwrap_err();
        assert_eq!(err, FieldError::ShapeMismatch { expected: 8, got: 7 });
    }

    #[test]
    fn test_from_amp_phase_roundtrip() {
        let amp = vec![2.0, 0.5, 1.0, 3.0];
        let phase = vec![0.0, 1.0, -1.5, 3.0];
        let f = Field::from_amp_phase(2, 2, &amp, &phase).unwrap();

        let a = f.amplitude();
        let p = f.phase();
        for i in 0..4 {
            assert!((a[i] - amp[i]).abs() < EPS, "amplitude mismatch at {}", i);
            assert!((p[i] - phase[i]).abs() < EPS, "phase mismatch at {}", i);
        }
    }

    #[test]
    fn test_total_power() {
        let amp = vec![1.0, 2.0, 3.0, 4.0];
        let phase = vec![0.3; 4];
        let f = Field::from_amp_phase(4, 1, &amp, &phase).unwrap();
        // 1 + 4 + 9 + 16 = 30
        assert!((f.total_power() - 30.0).abs() < EPS);
    }

    #[test]
    fn test_get_set_row_major() {
        let mut f = Field::zeros(3, 2);
        f.set(2, 1, Complex64::new(1.0, -1.0));
        assert_eq!(f.get(2, 1), Complex64::new(1.0, -1.0));
        // Row-major: (x=2, y=1) is the last element.
        assert_eq!(f.as_slice()[5], Complex64::new(1.0, -1.0));
    }

    #[test]
    fn test_is_finite_detects_nan_and_inf() {
        let mut f = Field::zeros(2, 2);
        assert!(f.is_finite());
        f.set(0, 1, Complex64::new(f64::NAN, 0.0));
        assert!(!f.is_finite());

        let mut g = Field::zeros(2, 2);
        g.set(1, 0, Complex64::new(0.0, f64::INFINITY));
        assert!(!g.is_finite());
    }
}
