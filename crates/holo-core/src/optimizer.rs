//! Weighted Gerchberg–Saxton phase-retrieval engine.
//!
//! Computes a phase-only SLM pattern whose far field approximates a
//! [`Target`] pattern, by alternating projections between the two conjugate
//! domains:
//!
//! ```text
//! SLM plane (phase-only)            observation plane (amplitude-constrained)
//!      │  illumination · e^{jφ}              ▲
//!      │                                     │ enforce amplitude at target
//!      ├────────── forward FFT ──────────────┤ regions (phase kept), apply
//!      │                                     │ unpatterned policy elsewhere
//!      ◄────────── inverse FFT ──────────────┘
//!      keep phase, re-impose illumination,
//!      update per-region weights
//! ```
//!
//! Per-region weights are updated every iteration,
//! `w ← w · (target / measured)^p`, so regions receiving too little power
//! pull harder on the next pass — the weighted-GS uniformity mechanism. The
//! measured side can come from the simulation itself or from camera
//! measurements (see [`FeedbackSource`]).
//!
//! The run is a small state machine,
//! `Initialized → Iterating → {Converged | MaxIterationsReached | Aborted}`,
//! deterministic for a fixed seed, with an append-only convergence record
//! returned for every outcome (including aborts, so partial records remain
//! available for diagnosis).
//!
//! ## Example
//!
//! ```rust
//! use holo_core::optimizer::{OptimizerConfig, Outcome, PhaseRetrieval};
//! use holo_core::target::{ExtractPolicy, SpotTarget, Target};
//!
//! let spots = vec![SpotTarget { x: 32.0, y: 32.0, amplitude: 1.0 }];
//! let target = Target::spots(64, 64, spots, 3, ExtractPolicy::Sum).unwrap();
//! let illumination = vec![1.0; 64 * 64];
//!
//! let config = OptimizerConfig { max_iterations: 200, tolerance: 5e-3, ..Default::default() };
//! let mut optimizer = PhaseRetrieval::new(64, 64, target, illumination, config).unwrap();
//! let result = optimizer.run().unwrap();
//! assert_eq!(result.outcome, Outcome::Converged);
//! ```

use serde::{Deserialize, Serialize};

use crate::aberration::CorrectionMap;
use crate::feedback::{FeedbackError, FeedbackSource};
use crate::field::Field;
use crate::target::Target;
use crate::transform::FourierEngine;

/// Guard against division blow-up for regions measuring zero power.
const MEASURED_FLOOR: f64 = 1e-12;

/// Error type for optimizer construction and run setup.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerError {
    /// Illumination, warm-start, correction, or target grid disagrees with
    /// the configured SLM/observation geometry.
    ShapeMismatch { expected: usize, got: usize },
    /// Feedback source incompatible with the target.
    Feedback(FeedbackError),
}

impl std::fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerError::ShapeMismatch { expected, got } => {
                write!(f, "array length {} does not match expected grid size {}", got, expected)
            }
            OptimizerError::Feedback(e) => write!(f, "feedback rejected: {}", e),
        }
    }
}

impl std::error::Error for OptimizerError {}

impl From<FeedbackError> for OptimizerError {
    fn from(e: FeedbackError) -> Self {
        OptimizerError::Feedback(e)
    }
}

/// What happens to observation-plane amplitude outside the target regions.
///
/// `Free` leaves it untouched (amplitude-freedom variant: tolerates speckle
/// outside the pattern, improves in-pattern efficiency). `Suppressed` scales
/// it by `factor` each iteration, strict Gerchberg–Saxton at `factor = 0`.
/// `anneal` multiplies the factor each iteration (1.0 keeps it constant);
/// both knobs are explicit configuration, never a hidden schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UnpatternedPolicy {
    Free,
    Suppressed { factor: f64, anneal: f64 },
}

/// Which iteration's phase the terminal result carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultPolicy {
    /// Phase from the iteration with the lowest recorded error.
    BestOfRun,
    /// Phase from the last completed iteration.
    Latest,
}

/// Configuration for one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Iteration budget (must be > 0).
    pub max_iterations: usize,
    /// Error tolerance; the run converges once the metric drops below this.
    pub tolerance: f64,
    /// Stop after this many iterations without improvement (0 disables).
    pub patience: usize,
    /// Weight-update exponent `p` in `w ← w · (target/measured)^p`.
    /// `p = 1` is the standard weighted-GS update.
    pub feedback_gain_exponent: f64,
    /// Amplitude policy outside the target regions.
    pub unpatterned_policy: UnpatternedPolicy,
    /// Terminal phase selection.
    pub result_policy: ResultPolicy,
    /// Zero-padding factor between SLM and observation grids.
    pub oversample: usize,
    /// Seed for the random starting phase.
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            patience: 0,
            feedback_gain_exponent: 1.0,
            unpatterned_policy: UnpatternedPolicy::Suppressed { factor: 0.0, anneal: 1.0 },
            result_policy: ResultPolicy::BestOfRun,
            oversample: 1,
            seed: 42,
        }
    }
}

/// Why a run aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The caller's cancellation predicate fired at an iteration boundary.
    Cancelled,
    /// Non-finite values appeared in a field mid-run.
    NumericalFault,
}

/// Terminal state of a run.
///
/// `MaxIterationsReached` is a normal outcome, not an error: the result is
/// still usable and differs from `Converged` only by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Converged,
    MaxIterationsReached,
    Aborted(AbortReason),
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// SLM-plane phase in radians, wrapped to `(-π, π]`, with any correction
    /// map already composed in. Device-specific encoding is the caller's job.
    pub phase: Vec<f64>,
    /// Terminal state tag.
    pub outcome: Outcome,
    /// One error-metric entry per completed iteration, append-only.
    /// Preserved for every outcome, including aborts.
    pub convergence: Vec<f64>,
    /// Index of the iteration with the lowest recorded error.
    pub best_iteration: usize,
    /// Per-region weights at the end of the run.
    pub final_weights: Vec<f64>,
}

/// Weighted-GS phase-retrieval run over one target.
///
/// Exclusively owns the live field pair, the weights, and the convergence
/// record; the target and correction map are read-only inputs.
pub struct PhaseRetrieval {
    slm_width: usize,
    slm_height: usize,
    target: Target,
    illumination: Vec<f64>,
    config: OptimizerConfig,
    correction: Option<Vec<f64>>,
    warm_start: Option<Vec<f64>>,
    engine: FourierEngine,
}

impl std::fmt::Debug for PhaseRetrieval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRetrieval")
            .field("slm", &(self.slm_width, self.slm_height))
            .field("regions", &self.target.region_count())
            .field("config", &self.config)
            .finish()
    }
}

impl PhaseRetrieval {
    /// Create a run for the given SLM grid, target, and illumination
    /// amplitude profile.
    ///
    /// The target's observation grid must equal the SLM grid scaled by
    /// `config.oversample`.
    pub fn new(
        slm_width: usize,
        slm_height: usize,
        target: Target,
        illumination: Vec<f64>,
        config: OptimizerConfig,
    ) -> Result<Self, OptimizerError> {
        let n = slm_width * slm_height;
        if illumination.len() != n {
            return Err(OptimizerError::ShapeMismatch { expected: n, got: illumination.len() });
        }
        let oversample = config.oversample.max(1);
        let expected_obs = (slm_width * oversample, slm_height * oversample);
        if target.obs_shape() != expected_obs {
            return Err(OptimizerError::ShapeMismatch {
                expected: expected_obs.0 * expected_obs.1,
                got: target.obs_shape().0 * target.obs_shape().1,
            });
        }
        let engine = FourierEngine::new(slm_width, slm_height, oversample);
        Ok(Self {
            slm_width,
            slm_height,
            target,
            illumination,
            config,
            correction: None,
            warm_start: None,
            engine,
        })
    }

    /// Seed the starting phase from a previous run instead of the random
    /// draw (incremental refinement).
    pub fn with_warm_start(mut self, phase: Vec<f64>) -> Result<Self, OptimizerError> {
        let n = self.slm_width * self.slm_height;
        if phase.len() != n {
            return Err(OptimizerError::ShapeMismatch { expected: n, got: phase.len() });
        }
        self.warm_start = Some(phase);
        Ok(self)
    }

    /// Compose a fixed phase correction into the displayed result.
    ///
    /// The correction models a known optical aberration that the displayed
    /// pattern must pre-compensate. It is added to the returned phase every
    /// run but never enters the simulated transform loop — inside the
    /// simulation the correction and the aberration it cancels are a no-op,
    /// and folding it into the iterate would accumulate it once per
    /// iteration.
    pub fn with_correction(mut self, correction: &CorrectionMap) -> Result<Self, OptimizerError> {
        let n = self.slm_width * self.slm_height;
        if correction.phase().len() != n {
            return Err(OptimizerError::ShapeMismatch {
                expected: n,
                got: correction.phase().len(),
            });
        }
        self.correction = Some(correction.phase().to_vec());
        Ok(self)
    }

    /// Run with simulated feedback and no cancellation.
    pub fn run(&mut self) -> Result<RunResult, OptimizerError> {
        self.run_with(&FeedbackSource::Simulated, || false)
    }

    /// Run with an explicit feedback source and no cancellation.
    pub fn run_with_feedback(
        &mut self,
        feedback: &FeedbackSource,
    ) -> Result<RunResult, OptimizerError> {
        self.run_with(feedback, || false)
    }

    /// Run the full state machine.
    ///
    /// `cancel` is evaluated once per iteration boundary (never mid
    /// transform); when it returns `true` the run stops in
    /// `Aborted(Cancelled)` with the record accumulated so far. Each
    /// iteration is atomic: it is either fully applied or not executed.
    pub fn run_with(
        &mut self,
        feedback: &FeedbackSource,
        mut cancel: impl FnMut() -> bool,
    ) -> Result<RunResult, OptimizerError> {
        feedback.validate(&self.target)?;

        let n = self.slm_width * self.slm_height;
        let mut phase = match &self.warm_start {
            Some(p) => p.clone(),
            None => random_phase(n, self.config.seed),
        };

        let target_amps = self.target.amplitudes();
        let mask = self.target.update_mask();
        let mut weights = self.target.initial_weights();

        let mut convergence: Vec<f64> = Vec::new();
        let mut best_error = f64::INFINITY;
        let mut best_iteration = 0usize;
        let mut best_phase = phase.clone();
        let mut outcome = Outcome::MaxIterationsReached;

        for iteration in 0..self.config.max_iterations.max(1) {
            if cancel() {
                outcome = Outcome::Aborted(AbortReason::Cancelled);
                break;
            }

            let slm = self.slm_field(&phase);
            let observation = self.engine.forward(&slm);
            if !observation.is_finite() {
                outcome = Outcome::Aborted(AbortReason::NumericalFault);
                break;
            }

            let measured = feedback.measured_amplitude(&self.target, &observation)?;
            let enforced = feedback.enforced_amplitude(&self.target, &weights)?;

            // The recorded error describes the phase that produced this
            // observation, so best tracking and the stop checks run before
            // the phase is advanced.
            let error = error_metric(&measured, &target_amps, &mask);
            convergence.push(error);
            if error < best_error {
                best_error = error;
                best_iteration = iteration;
                best_phase.copy_from_slice(&phase);
            }

            if error <= self.config.tolerance {
                outcome = Outcome::Converged;
                break;
            }
            if self.config.patience > 0 && iteration - best_iteration >= self.config.patience {
                // Stalled: no improvement across the patience window.
                outcome = Outcome::Converged;
                break;
            }

            let suppression = match self.config.unpatterned_policy {
                UnpatternedPolicy::Free => None,
                UnpatternedPolicy::Suppressed { factor, anneal } => {
                    Some((factor * anneal.powi(iteration as i32)).clamp(0.0, 1.0))
                }
            };
            let constrained = constrain(observation, &self.target, &mask, &enforced, suppression);

            let back = self.engine.inverse(&constrained);
            if !back.is_finite() {
                outcome = Outcome::Aborted(AbortReason::NumericalFault);
                break;
            }

            phase = back.phase();
            weighted_update(
                &mut weights,
                &target_amps,
                &measured,
                &mask,
                self.config.feedback_gain_exponent,
            );
        }

        let mut result_phase = match self.config.result_policy {
            ResultPolicy::BestOfRun => best_phase,
            ResultPolicy::Latest => phase,
        };
        if let Some(correction) = &self.correction {
            for (p, c) in result_phase.iter_mut().zip(correction.iter()) {
                *p = wrap_phase(*p + c);
            }
        }

        Ok(RunResult {
            phase: result_phase,
            outcome,
            convergence,
            best_iteration,
            final_weights: weights,
        })
    }

    fn slm_field(&self, phase: &[f64]) -> Field {
        Field::from_amp_phase(self.slm_width, self.slm_height, &self.illumination, phase)
            .unwrap_or_else(|_| unreachable!("illumination and phase sized to the SLM grid"))
    }
}

/// Per-region weight update: `w ← w · (target / max(measured, ε))^p`.
/// Masked-out regions keep their weight.
pub fn weighted_update(
    weights: &mut [f64],
    target: &[f64],
    measured: &[f64],
    mask: &[bool],
    exponent: f64,
) {
    for i in 0..weights.len() {
        if mask[i] {
            let ratio = target[i] / measured[i].max(MEASURED_FLOOR);
            weights[i] *= ratio.powf(exponent);
        }
    }
}

/// Normalized RMS deviation between delivered and target power per region,
/// over unmasked regions: `rms(mᵢ² − tᵢ²) / mean(tᵢ²)`.
pub fn error_metric(measured: &[f64], target: &[f64], mask: &[bool]) -> f64 {
    let mut sum_sq = 0.0;
    let mut sum_target = 0.0;
    let mut count = 0usize;
    for i in 0..target.len() {
        if mask[i] {
            let d = measured[i] * measured[i] - target[i] * target[i];
            sum_sq += d * d;
            sum_target += target[i] * target[i];
            count += 1;
        }
    }
    if count == 0 || sum_target == 0.0 {
        return 0.0;
    }
    let rms = (sum_sq / count as f64).sqrt();
    rms / (sum_target / count as f64)
}

/// Build the constrained observation field: each target region is rescaled
/// so that the amplitude [`Target::extract_amplitude`] reports equals the
/// enforced value (scaled to the field's total power), keeping the simulated
/// phase and the intra-region amplitude profile; unpatterned samples follow
/// the suppression policy. Enforcement and measurement act on the same
/// region quantity, so the weight update sees exactly what was imposed.
/// Phase is never dictated by the target.
fn constrain(
    mut observation: Field,
    target: &Target,
    mask: &[bool],
    enforced: &[f64],
    suppression: Option<f64>,
) -> Field {
    let total_power = observation.total_power();
    let enforced_norm: f64 = enforced.iter().map(|e| e * e).sum::<f64>().sqrt();
    let scale = if enforced_norm > 0.0 {
        total_power.sqrt() / enforced_norm
    } else {
        0.0
    };

    if target.is_spots() {
        let current = target.extract_amplitude(&observation).values().to_vec();
        let pixels = target.spot_pixels();
        let r = target.spot_radius().unwrap_or(0) as i64;
        let side = (2 * r + 1) as usize;

        // Region samples, captured before suppression can zero them.
        let mut saved = Vec::with_capacity(pixels.len() * side * side);
        for &(cx, cy) in &pixels {
            for dy in -r..=r {
                for dx in -r..=r {
                    saved.push(
                        observation.get((cx as i64 + dx) as usize, (cy as i64 + dy) as usize),
                    );
                }
            }
        }
        if let Some(factor) = suppression {
            for z in observation.as_mut_slice().iter_mut() {
                *z *= factor;
            }
        }
        for (k, &(cx, cy)) in pixels.iter().enumerate() {
            let gain = enforced[k] * scale;
            let base = k * side * side;
            if current[k] > MEASURED_FLOOR {
                let s = gain / current[k];
                let mut idx = base;
                for dy in -r..=r {
                    for dx in -r..=r {
                        let x = (cx as i64 + dx) as usize;
                        let y = (cy as i64 + dy) as usize;
                        observation.set(x, y, saved[idx] * s);
                        idx += 1;
                    }
                }
            } else {
                // Dark region: seed its center pixel.
                let center = saved[base + side * side / 2];
                observation.set(
                    cx,
                    cy,
                    num_complex::Complex64::from_polar(gain, center.arg()),
                );
            }
        }
    } else {
        for (i, z) in observation.as_mut_slice().iter_mut().enumerate() {
            if mask[i] {
                *z = num_complex::Complex64::from_polar(enforced[i] * scale, z.arg());
            } else if let Some(factor) = suppression {
                *z *= factor;
            }
        }
    }
    observation
}

/// Wrap a phase value to `(-π, π]`.
fn wrap_phase(p: f64) -> f64 {
    let tau = std::f64::consts::TAU;
    let mut w = p % tau;
    if w > std::f64::consts::PI {
        w -= tau;
    } else if w <= -std::f64::consts::PI {
        w += tau;
    }
    w
}

/// Uniform random phase in `[-π, π)` from a seeded xoshiro256** generator.
fn random_phase(n: usize, seed: u64) -> Vec<f64> {
    let mut state = [0u64; 4];
    state[0] = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    state[1] = state[0].wrapping_mul(6364136223846793005).wrapping_add(1);
    state[2] = state[1].wrapping_mul(6364136223846793005).wrapping_add(1);
    state[3] = state[2].wrapping_mul(6364136223846793005).wrapping_add(1);

    let mut next = move || -> f64 {
        let result = state[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = state[1] << 17;
        state[2] ^= state[0];
        state[3] ^= state[1];
        state[1] ^= state[2];
        state[0] ^= state[3];
        state[2] ^= t;
        state[3] = state[3].rotate_left(45);
        (result >> 11) as f64 / (1u64 << 53) as f64
    };

    (0..n)
        .map(|_| (next() * 2.0 - 1.0) * std::f64::consts::PI)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{ExtractPolicy, SpotTarget};

    fn uniform_illumination(n: usize) -> Vec<f64> {
        vec![1.0; n]
    }

    fn single_center_spot(grid: usize, radius: usize) -> Target {
        let c = (grid / 2) as f64;
        let spots = vec![SpotTarget { x: c, y: c, amplitude: 1.0 }];
        Target::spots(grid, grid, spots, radius, ExtractPolicy::Sum).unwrap()
    }

    /// Fraction of total observation power delivered inside the spot regions
    /// for a given result phase.
    fn delivered_fraction(grid: usize, target: &Target, phase: &[f64]) -> f64 {
        let mut engine = FourierEngine::new(grid, grid, 1);
        let slm =
            Field::from_amp_phase(grid, grid, &uniform_illumination(grid * grid), phase).unwrap();
        let obs = engine.forward(&slm);
        let extracted = target.extract_amplitude(&obs);
        let in_region: f64 = extracted.values().iter().map(|a| a * a).sum();
        in_region / obs.total_power()
    }

    #[test]
    fn test_scenario_single_center_spot_converges() {
        let grid = 64;
        let target = single_center_spot(grid, 3);
        let config = OptimizerConfig {
            max_iterations: 200,
            tolerance: 5e-3,
            ..Default::default()
        };
        let mut optimizer = PhaseRetrieval::new(
            grid,
            grid,
            target.clone(),
            uniform_illumination(grid * grid),
            config,
        )
        .unwrap();
        let result = optimizer.run().unwrap();

        assert_eq!(result.outcome, Outcome::Converged);
        let final_error = *result.convergence.last().unwrap();
        assert!(final_error <= 5e-3, "final error {} should be below tolerance", final_error);

        let fraction = delivered_fraction(grid, &target, &result.phase);
        assert!(
            fraction >= 0.99,
            "delivered power fraction {} should be at least 0.99",
            fraction
        );
    }

    #[test]
    fn test_scenario_four_spot_uniformity() {
        let grid = 64;
        let spots = vec![
            SpotTarget { x: 16.0, y: 16.0, amplitude: 1.0 },
            SpotTarget { x: 16.0, y: 48.0, amplitude: 1.0 },
            SpotTarget { x: 48.0, y: 16.0, amplitude: 1.0 },
            SpotTarget { x: 48.0, y: 48.0, amplitude: 1.0 },
        ];
        let target = Target::spots(grid, grid, spots, 2, ExtractPolicy::Sum).unwrap();
        let config = OptimizerConfig {
            max_iterations: 300,
            tolerance: 1e-8,
            ..Default::default()
        };
        let mut optimizer = PhaseRetrieval::new(
            grid,
            grid,
            target.clone(),
            uniform_illumination(grid * grid),
            config,
        )
        .unwrap();
        let result = optimizer.run().unwrap();

        // Extract final delivered amplitudes and check uniformity.
        let mut engine = FourierEngine::new(grid, grid, 1);
        let slm = Field::from_amp_phase(
            grid,
            grid,
            &uniform_illumination(grid * grid),
            &result.phase,
        )
        .unwrap();
        let obs = engine.forward(&slm);
        let amps = target.extract_amplitude(&obs);
        let values = amps.values();
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        assert!(
            (max - min) / max < 0.01,
            "four equal spots should be uniform within 1%: min={} max={}",
            min,
            max
        );
    }

    #[test]
    fn test_scenario_cancellation_after_two_iterations() {
        let grid = 32;
        let target = single_center_spot(grid, 3);
        let config = OptimizerConfig {
            max_iterations: 100,
            tolerance: 0.0, // never converge on tolerance
            ..Default::default()
        };
        let mut optimizer =
            PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                .unwrap();

        let mut calls = 0usize;
        let result = optimizer
            .run_with(&FeedbackSource::Simulated, move || {
                calls += 1;
                calls > 2
            })
            .unwrap();

        assert_eq!(result.outcome, Outcome::Aborted(AbortReason::Cancelled));
        assert_eq!(
            result.convergence.len(),
            2,
            "exactly two iterations should have completed before cancellation"
        );
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let grid = 32;
        let spots = vec![
            SpotTarget { x: 8.0, y: 8.0, amplitude: 1.0 },
            SpotTarget { x: 24.0, y: 24.0, amplitude: 2.0 },
        ];
        let make = || {
            let target =
                Target::spots(grid, grid, spots.clone(), 2, ExtractPolicy::Sum).unwrap();
            let config = OptimizerConfig {
                max_iterations: 20,
                tolerance: 0.0,
                seed: 7,
                ..Default::default()
            };
            PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                .unwrap()
        };

        let a = make().run().unwrap();
        let b = make().run().unwrap();
        assert_eq!(a.convergence, b.convergence, "same seed must give identical records");
        assert_eq!(a.phase, b.phase);
    }

    #[test]
    fn test_constrain_makes_enforced_and_measured_commensurate() {
        let grid = 32;
        let spots = vec![
            SpotTarget { x: 8.0, y: 8.0, amplitude: 1.0 },
            SpotTarget { x: 24.0, y: 24.0, amplitude: 1.0 },
        ];
        let target = Target::spots(grid, grid, spots, 2, ExtractPolicy::Sum).unwrap();

        // Speckle-like field with power everywhere.
        let n = grid * grid;
        let amp: Vec<f64> = (0..n).map(|i| 0.5 + ((i * 29 % 83) as f64) / 83.0).collect();
        let phase: Vec<f64> = (0..n).map(|i| ((i * 41 % 97) as f64) / 97.0).collect();
        let field = Field::from_amp_phase(grid, grid, &amp, &phase).unwrap();
        let total = field.total_power();

        let enforced = [0.6, 0.8]; // unit total power
        let mask = [true, true];
        let constrained = constrain(field, &target, &mask, &enforced, Some(0.0));

        // Re-extracting must report exactly the enforced amplitudes (scaled
        // to the field's total power), or the weight update chases a
        // quantity it never controlled.
        let extracted = target.extract_amplitude(&constrained);
        let scale = total.sqrt();
        assert!((extracted.values()[0] - 0.6 * scale).abs() < 1e-9);
        assert!((extracted.values()[1] - 0.8 * scale).abs() < 1e-9);
        // Strict suppression: all power now sits in the regions.
        assert!((constrained.total_power() - total).abs() < 1e-6);
    }

    #[test]
    fn test_optimizer_debug_format() {
        let grid = 16;
        let target = single_center_spot(grid, 2);
        let optimizer = PhaseRetrieval::new(
            grid,
            grid,
            target,
            uniform_illumination(grid * grid),
            OptimizerConfig::default(),
        )
        .unwrap();
        let repr = format!("{:?}", optimizer);
        assert!(repr.contains("PhaseRetrieval"));
        assert!(repr.contains("regions"));
    }

    #[test]
    fn test_weight_update_monotone() {
        let target = [0.8, 0.6];
        let mask = [true, true];

        // Region 0 below target: weight must strictly increase.
        // Region 1 above target: weight must strictly decrease.
        let measured = [0.5, 0.9];
        let mut weights = [1.0, 1.0];
        weighted_update(&mut weights, &target, &measured, &mask, 1.0);
        assert!(weights[0] > 1.0, "under-delivered region weight should increase");
        assert!(weights[1] < 1.0, "over-delivered region weight should decrease");

        // Masked regions are inert.
        let mut weights = [1.0, 1.0];
        weighted_update(&mut weights, &target, &measured, &[false, true], 1.0);
        assert_eq!(weights[0], 1.0);

        // Zero measured power must not blow up.
        let mut weights = [1.0, 1.0];
        weighted_update(&mut weights, &target, &[0.0, 0.9], &mask, 1.0);
        assert!(weights[0].is_finite());
        assert!(weights[0] > 1.0);
    }

    #[test]
    fn test_numerical_fault_aborts_with_partial_record() {
        let grid = 16;
        let target = single_center_spot(grid, 2);
        let config = OptimizerConfig { max_iterations: 10, ..Default::default() };
        let mut optimizer = PhaseRetrieval::new(
            grid,
            grid,
            target,
            vec![f64::NAN; grid * grid],
            config,
        )
        .unwrap();
        let result = optimizer.run().unwrap();
        assert_eq!(result.outcome, Outcome::Aborted(AbortReason::NumericalFault));
        // Fault hit before the first iteration completed: empty record, but
        // still returned rather than discarded.
        assert!(result.convergence.is_empty());
    }

    #[test]
    fn test_max_iterations_reached_is_normal_outcome() {
        let grid = 32;
        let spots = vec![
            SpotTarget { x: 8.0, y: 8.0, amplitude: 1.0 },
            SpotTarget { x: 24.0, y: 24.0, amplitude: 1.0 },
        ];
        let target = Target::spots(grid, grid, spots, 2, ExtractPolicy::Sum).unwrap();
        let config = OptimizerConfig {
            max_iterations: 3,
            tolerance: 0.0,
            ..Default::default()
        };
        let mut optimizer =
            PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                .unwrap();
        let result = optimizer.run().unwrap();
        assert_eq!(result.outcome, Outcome::MaxIterationsReached);
        assert_eq!(result.convergence.len(), 3);
    }

    #[test]
    fn test_patience_stops_stalled_run() {
        let grid = 32;
        let spots = vec![
            SpotTarget { x: 8.0, y: 8.0, amplitude: 1.0 },
            SpotTarget { x: 24.0, y: 24.0, amplitude: 1.0 },
        ];
        let target = Target::spots(grid, grid, spots, 2, ExtractPolicy::Sum).unwrap();
        // Fixed camera measurements: the error metric is identical every
        // iteration, so the run stalls immediately after the first entry.
        let feedback = FeedbackSource::ExperimentalSpots { measured: vec![9.0, 16.0] };
        let config = OptimizerConfig {
            max_iterations: 50,
            tolerance: 0.0, // unreachable
            patience: 3,
            ..Default::default()
        };
        let mut optimizer =
            PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                .unwrap();
        let result = optimizer.run_with_feedback(&feedback).unwrap();
        assert_eq!(result.outcome, Outcome::Converged);
        assert_eq!(
            result.convergence.len(),
            1 + 3,
            "stall should be detected one patience window after the best iteration"
        );
    }

    #[test]
    fn test_warm_start_shape_checked() {
        let grid = 16;
        let target = single_center_spot(grid, 2);
        let optimizer = PhaseRetrieval::new(
            grid,
            grid,
            target,
            uniform_illumination(grid * grid),
            OptimizerConfig::default(),
        )
        .unwrap();
        let err = optimizer.with_warm_start(vec![0.0; 17]).unwrap_err();
        assert_eq!(err, OptimizerError::ShapeMismatch { expected: 256, got: 17 });
    }

    #[test]
    fn test_warm_start_deterministic_without_seed() {
        let grid = 32;
        let warm = vec![0.25; grid * grid];
        let make = |seed| {
            let target = single_center_spot(grid, 2);
            let config = OptimizerConfig {
                max_iterations: 5,
                tolerance: 0.0,
                seed,
                ..Default::default()
            };
            PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                .unwrap()
                .with_warm_start(warm.clone())
                .unwrap()
        };
        // Warm start bypasses the random draw, so the seed is irrelevant.
        let a = make(1).run().unwrap();
        let b = make(2).run().unwrap();
        assert_eq!(a.convergence, b.convergence);
    }

    #[test]
    fn test_correction_offsets_result_phase() {
        let grid = 16;
        let correction = CorrectionMap::constant(grid, grid, 0.5);
        let run = |with_correction: bool| {
            let target = single_center_spot(grid, 2);
            let config = OptimizerConfig {
                max_iterations: 10,
                tolerance: 0.0,
                ..Default::default()
            };
            let optimizer =
                PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                    .unwrap();
            let mut optimizer = if with_correction {
                optimizer.with_correction(&correction).unwrap()
            } else {
                optimizer
            };
            optimizer.run().unwrap()
        };

        let plain = run(false);
        let corrected = run(true);
        assert_eq!(plain.convergence, corrected.convergence);
        for (p, c) in plain.phase.iter().zip(corrected.phase.iter()) {
            let diff = super::wrap_phase(c - p);
            assert!((diff - 0.5).abs() < 1e-12, "correction should offset phase by 0.5 rad");
        }
    }

    #[test]
    fn test_result_policy_latest_vs_best() {
        let grid = 32;
        let spots = vec![
            SpotTarget { x: 8.0, y: 8.0, amplitude: 1.0 },
            SpotTarget { x: 24.0, y: 24.0, amplitude: 3.0 },
        ];
        let make = |policy| {
            let target = Target::spots(grid, grid, spots.clone(), 2, ExtractPolicy::Sum).unwrap();
            let config = OptimizerConfig {
                max_iterations: 15,
                tolerance: 0.0,
                result_policy: policy,
                ..Default::default()
            };
            PhaseRetrieval::new(grid, grid, target, uniform_illumination(grid * grid), config)
                .unwrap()
        };

        let best = make(ResultPolicy::BestOfRun).run().unwrap();
        let latest = make(ResultPolicy::Latest).run().unwrap();
        // Same record either way; only the returned phase selection differs.
        assert_eq!(best.convergence, latest.convergence);
        assert_eq!(best.best_iteration, latest.best_iteration);
        if best.best_iteration != best.convergence.len() - 1 {
            assert_ne!(best.phase, latest.phase);
        }
    }

    #[test]
    fn test_feedback_mismatch_surfaces_before_iterating() {
        let grid = 16;
        let target = single_center_spot(grid, 2);
        let mut optimizer = PhaseRetrieval::new(
            grid,
            grid,
            target,
            uniform_illumination(grid * grid),
            OptimizerConfig::default(),
        )
        .unwrap();
        let feedback = FeedbackSource::ExperimentalSpots { measured: vec![1.0, 2.0] };
        let err = optimizer.run_with_feedback(&feedback).unwrap_err();
        assert_eq!(
            err,
            OptimizerError::Feedback(FeedbackError::ShapeMismatch { expected: 1, got: 2 })
        );
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = OptimizerConfig {
            unpatterned_policy: UnpatternedPolicy::Suppressed { factor: 0.1, anneal: 1.05 },
            result_policy: ResultPolicy::Latest,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
