//! # SLM Holography Core
//!
//! Phase-retrieval engine for spatial light modulator (SLM) holography:
//! compute a phase-only SLM pattern whose far field reproduces a target
//! intensity pattern (spot arrays or dense images), optionally refined with
//! measured camera feedback and pre-compensated for optical aberrations.
//!
//! ## Signal Flow
//!
//! ```text
//! Target ──► Optimizer ──► forward FFT ──► observation plane
//!               ▲                               │
//!               │                        enforce amplitude
//!   correction, │                        (target × weights, or
//!   weights     │                         camera measurement)
//!               │                               │
//!               └──────── inverse FFT ◄────────┘
//!            keep phase, re-impose illumination,
//!            update weights, log convergence
//! ```
//!
//! The iteration is the weighted Gerchberg–Saxton family: amplitude is
//! constrained in the observation plane (phase stays free), phase-only
//! modulation is constrained at the SLM, and per-region weights equalize
//! delivered power across targets. Feedback modes substitute measured
//! camera data for the simulated far field; a Zernike-based aberration
//! model supplies per-field-of-view phase corrections.
//!
//! Hardware drivers, calibration orchestration, and device pixel encoding
//! live outside this crate: the optimizer consumes plain arrays and returns
//! a phase array in radians plus a convergence record.
//!
//! ## Example
//!
//! ```rust
//! use holo_core::{ExtractPolicy, OptimizerConfig, Outcome, PhaseRetrieval, SpotTarget, Target};
//!
//! // Four equal spots in a square on a 64×64 grid.
//! let spots = vec![
//!     SpotTarget { x: 16.0, y: 16.0, amplitude: 1.0 },
//!     SpotTarget { x: 16.0, y: 48.0, amplitude: 1.0 },
//!     SpotTarget { x: 48.0, y: 16.0, amplitude: 1.0 },
//!     SpotTarget { x: 48.0, y: 48.0, amplitude: 1.0 },
//! ];
//! let target = Target::spots(64, 64, spots, 2, ExtractPolicy::Sum).unwrap();
//!
//! let config = OptimizerConfig { max_iterations: 100, ..Default::default() };
//! let illumination = vec![1.0; 64 * 64];
//! let mut optimizer = PhaseRetrieval::new(64, 64, target, illumination, config).unwrap();
//!
//! let result = optimizer.run().unwrap();
//! assert!(matches!(result.outcome, Outcome::Converged | Outcome::MaxIterationsReached));
//! assert_eq!(result.phase.len(), 64 * 64);
//! ```

pub mod aberration;
pub mod analysis;
pub mod feedback;
pub mod field;
pub mod optimizer;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod target;
pub mod transform;

pub use aberration::{AberrationModel, CorrectionMap, ZernikeBasis};
pub use feedback::FeedbackSource;
pub use field::Field;
pub use optimizer::{
    AbortReason, OptimizerConfig, OptimizerError, Outcome, PhaseRetrieval, ResultPolicy,
    RunResult, UnpatternedPolicy,
};
pub use target::{ExtractPolicy, SpotTarget, Target};
pub use transform::FourierEngine;
