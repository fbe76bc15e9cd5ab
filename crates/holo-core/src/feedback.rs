//! Feedback adapter: where the amplitude constraint comes from.
//!
//! Each optimizer iteration needs two per-region amplitude signals:
//!
//! - the **enforced** amplitude written into the observation-plane field at
//!   the target regions, and
//! - the **measured** amplitude driving the weight update and the error
//!   metric.
//!
//! [`FeedbackSource`] abstracts where the measured side comes from:
//! the simulated far field itself (pure software loop, the default), a
//! caller-supplied camera intensity image, or per-spot scalar measurements
//! produced by image analysis. The adapter never mutates weights; the
//! optimizer owns that step.
//!
//! ## Example
//!
//! ```rust
//! use holo_core::feedback::FeedbackSource;
//! use holo_core::target::{ExtractPolicy, SpotTarget, Target};
//!
//! let spots = vec![
//!     SpotTarget { x: 16.0, y: 16.0, amplitude: 1.0 },
//!     SpotTarget { x: 48.0, y: 48.0, amplitude: 1.0 },
//! ];
//! let target = Target::spots(64, 64, spots, 2, ExtractPolicy::Sum).unwrap();
//!
//! // Per-spot camera intensities: cardinality must match the spot count.
//! let feedback = FeedbackSource::ExperimentalSpots { measured: vec![0.4, 0.6] };
//! assert!(feedback.validate(&target).is_ok());
//!
//! let bad = FeedbackSource::ExperimentalSpots { measured: vec![0.4] };
//! assert!(bad.validate(&target).is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::field::Field;
use crate::target::Target;

/// Error type for feedback validation.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackError {
    /// Measurement cardinality (or image size) does not match the target.
    ShapeMismatch { expected: usize, got: usize },
    /// Feedback kind is incompatible with the target kind (e.g. per-spot
    /// measurements supplied for a dense target).
    KindMismatch,
}

impl std::fmt::Display for FeedbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackError::ShapeMismatch { expected, got } => {
                write!(f, "feedback measurement count {} does not match target region count {}", got, expected)
            }
            FeedbackError::KindMismatch => {
                write!(f, "feedback kind is incompatible with the target kind")
            }
        }
    }
}

impl std::error::Error for FeedbackError {}

/// Source of the amplitude constraint for one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedbackSource {
    /// Measured amplitude comes from the simulated far field itself.
    Simulated,
    /// Measured intensity image aligned to the observation grid (row-major).
    /// The caller is responsible for dark-frame subtraction and coordinate
    /// registration.
    ExperimentalDense { measured: Vec<f64> },
    /// Per-spot measured intensities (one per target spot, in spot order),
    /// e.g. from [`crate::analysis::extract_spot_intensities`].
    ExperimentalSpots { measured: Vec<f64> },
}

impl FeedbackSource {
    /// Check this source against a target. Surfaced before the first
    /// iteration; mismatches are fatal and never retried.
    pub fn validate(&self, target: &Target) -> Result<(), FeedbackError> {
        match self {
            FeedbackSource::Simulated => Ok(()),
            FeedbackSource::ExperimentalDense { measured } => {
                if target.is_spots() {
                    return Err(FeedbackError::KindMismatch);
                }
                let (w, h) = target.obs_shape();
                if measured.len() != w * h {
                    return Err(FeedbackError::ShapeMismatch {
                        expected: w * h,
                        got: measured.len(),
                    });
                }
                Ok(())
            }
            FeedbackSource::ExperimentalSpots { measured } => {
                if !target.is_spots() {
                    return Err(FeedbackError::KindMismatch);
                }
                if measured.len() != target.region_count() {
                    return Err(FeedbackError::ShapeMismatch {
                        expected: target.region_count(),
                        got: measured.len(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Amplitude delivered to each target region, on the same unit-power
    /// scale as the target amplitudes.
    ///
    /// Simulated mode extracts from the current observation field and
    /// divides by the field's total amplitude, so power leaking outside the
    /// target regions shows up as a measurement deficit (and as error in the
    /// convergence metric). Dense experimental images are normalized the
    /// same way over the full frame. Per-spot experimental measurements
    /// carry no information about out-of-region light, so they are
    /// normalized over the spots alone and drive relative uniformity only.
    pub fn measured_amplitude(
        &self,
        target: &Target,
        observation: &Field,
    ) -> Result<Vec<f64>, FeedbackError> {
        self.validate(target)?;
        Ok(match self {
            FeedbackSource::Simulated => {
                let values = target.extract_amplitude(observation).values().to_vec();
                let total = observation.total_power().sqrt();
                if total > 0.0 {
                    values.into_iter().map(|v| v / total).collect()
                } else {
                    values
                }
            }
            FeedbackSource::ExperimentalDense { measured } => {
                normalize_power(measured.iter().map(|&i| i.max(0.0).sqrt()).collect())
            }
            FeedbackSource::ExperimentalSpots { measured } => {
                normalize_power(measured.iter().map(|&i| i.max(0.0).sqrt()).collect())
            }
        })
    }

    /// Amplitude to enforce at each target region.
    ///
    /// Simulated and per-spot experimental modes enforce `weights × target`;
    /// dense experimental mode enforces `weights × measured` so real
    /// detector response corrects systematic intensity errors.
    pub fn enforced_amplitude(
        &self,
        target: &Target,
        weights: &[f64],
    ) -> Result<Vec<f64>, FeedbackError> {
        let amplitudes = match self {
            FeedbackSource::Simulated | FeedbackSource::ExperimentalSpots { .. } => {
                target.amplitudes()
            }
            FeedbackSource::ExperimentalDense { measured } => {
                if target.is_spots() {
                    return Err(FeedbackError::KindMismatch);
                }
                let (w, h) = target.obs_shape();
                if measured.len() != w * h {
                    return Err(FeedbackError::ShapeMismatch {
                        expected: w * h,
                        got: measured.len(),
                    });
                }
                normalize_power(measured.iter().map(|&i| i.max(0.0).sqrt()).collect())
            }
        };
        if weights.len() != amplitudes.len() {
            return Err(FeedbackError::ShapeMismatch {
                expected: amplitudes.len(),
                got: weights.len(),
            });
        }
        Ok(weights
            .iter()
            .zip(amplitudes.iter())
            .map(|(&w, &a)| w * a)
            .collect())
    }
}

/// Scale a vector so its sum of squares is 1; zero vectors pass through.
fn normalize_power(mut values: Vec<f64>) -> Vec<f64> {
    let power: f64 = values.iter().map(|v| v * v).sum();
    if power > 0.0 {
        let norm = power.sqrt();
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{ExtractPolicy, SpotTarget};
    use num_complex::Complex64;

    const EPS: f64 = 1e-12;

    fn two_spot_target() -> Target {
        let spots = vec![
            SpotTarget { x: 8.0, y: 8.0, amplitude: 1.0 },
            SpotTarget { x: 24.0, y: 24.0, amplitude: 1.0 },
        ];
        Target::spots(32, 32, spots, 2, ExtractPolicy::Sum).unwrap()
    }

    #[test]
    fn test_simulated_enforced_is_weights_times_target() {
        let target = two_spot_target();
        let weights = vec![0.5, 2.0];
        let enforced = FeedbackSource::Simulated
            .enforced_amplitude(&target, &weights)
            .unwrap();
        let t = target.amplitudes();
        assert!((enforced[0] - 0.5 * t[0]).abs() < EPS);
        assert!((enforced[1] - 2.0 * t[1]).abs() < EPS);
    }

    #[test]
    fn test_simulated_measured_extracts_from_field() {
        let target = two_spot_target();
        let mut field = Field::zeros(32, 32);
        field.set(8, 8, Complex64::new(3.0, 0.0));
        field.set(24, 24, Complex64::new(4.0, 0.0));

        let measured = FeedbackSource::Simulated
            .measured_amplitude(&target, &field)
            .unwrap();
        // Normalized to unit power: 3-4-5 triangle.
        assert!((measured[0] - 0.6).abs() < EPS);
        assert!((measured[1] - 0.8).abs() < EPS);
    }

    #[test]
    fn test_simulated_measured_accounts_for_leakage() {
        let target = two_spot_target();
        let mut field = Field::zeros(32, 32);
        field.set(8, 8, Complex64::new(3.0, 0.0));
        field.set(24, 24, Complex64::new(4.0, 0.0));
        field.set(0, 0, Complex64::new(5.0, 0.0)); // stray light outside both regions

        let measured = FeedbackSource::Simulated
            .measured_amplitude(&target, &field)
            .unwrap();
        // Total power 50; region amplitudes 3 and 4.
        assert!((measured[0] - 3.0 / 50.0_f64.sqrt()).abs() < EPS);
        assert!((measured[1] - 4.0 / 50.0_f64.sqrt()).abs() < EPS);
        let captured: f64 = measured.iter().map(|m| m * m).sum();
        assert!(captured < 1.0, "leaked power must register as a measurement deficit");
    }

    #[test]
    fn test_experimental_spots_cardinality_mismatch() {
        let target = two_spot_target();
        let feedback = FeedbackSource::ExperimentalSpots { measured: vec![1.0, 2.0, 3.0] };
        let err = feedback.validate(&target).unwrap_err();
        assert_eq!(err, FeedbackError::ShapeMismatch { expected: 2, got: 3 });
    }

    #[test]
    fn test_experimental_spots_substitutes_measurements() {
        let target = two_spot_target();
        // Camera intensities 9 and 16 → amplitudes 3 and 4 → 0.6 / 0.8.
        let feedback = FeedbackSource::ExperimentalSpots { measured: vec![9.0, 16.0] };
        let obs = Field::zeros(32, 32); // ignored in this mode
        let measured = feedback.measured_amplitude(&target, &obs).unwrap();
        assert!((measured[0] - 0.6).abs() < EPS);
        assert!((measured[1] - 0.8).abs() < EPS);
    }

    #[test]
    fn test_experimental_dense_requires_dense_target() {
        let target = two_spot_target();
        let feedback = FeedbackSource::ExperimentalDense { measured: vec![0.0; 32 * 32] };
        assert_eq!(feedback.validate(&target).unwrap_err(), FeedbackError::KindMismatch);
    }

    #[test]
    fn test_experimental_dense_image_size_mismatch() {
        let mut amp = vec![0.0; 16];
        amp[3] = 1.0;
        let target = Target::dense(4, 4, amp).unwrap();
        let feedback = FeedbackSource::ExperimentalDense { measured: vec![0.0; 15] };
        assert_eq!(
            feedback.validate(&target).unwrap_err(),
            FeedbackError::ShapeMismatch { expected: 16, got: 15 }
        );
    }

    #[test]
    fn test_experimental_dense_enforced_uses_measurement() {
        let mut amp = vec![0.0; 16];
        amp[3] = 1.0;
        amp[7] = 1.0;
        let target = Target::dense(4, 4, amp).unwrap();

        let mut image = vec![0.0; 16];
        image[3] = 9.0;
        image[7] = 16.0;
        let feedback = FeedbackSource::ExperimentalDense { measured: image };

        let weights = vec![1.0; 16];
        let enforced = feedback.enforced_amplitude(&target, &weights).unwrap();
        assert!((enforced[3] - 0.6).abs() < EPS);
        assert!((enforced[7] - 0.8).abs() < EPS);
    }
}
