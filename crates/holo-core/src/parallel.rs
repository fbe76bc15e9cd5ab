//! Parallel batch execution of independent optimizer runs.
//!
//! Enable with the `parallel` feature flag:
//!
//! ```toml
//! [dependencies]
//! holo-core = { version = "0.1", features = ["parallel"] }
//! ```
//!
//! Batch calibration across many field-of-view points means many
//! independent phase-retrieval runs over shared read-only inputs. Each run
//! owns its field pair, weights, and convergence record, so runs
//! parallelize with no synchronization beyond final result collection.

use rayon::prelude::*;

use crate::aberration::CorrectionMap;
use crate::feedback::FeedbackSource;
use crate::optimizer::{OptimizerConfig, OptimizerError, PhaseRetrieval, RunResult};
use crate::target::Target;

/// One independent phase-retrieval job.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub slm_width: usize,
    pub slm_height: usize,
    pub target: Target,
    pub illumination: Vec<f64>,
    pub config: OptimizerConfig,
    pub feedback: FeedbackSource,
    pub correction: Option<CorrectionMap>,
    pub warm_start: Option<Vec<f64>>,
}

impl BatchJob {
    /// Simulated-feedback job with no correction or warm start.
    pub fn simulated(
        slm_width: usize,
        slm_height: usize,
        target: Target,
        illumination: Vec<f64>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            slm_width,
            slm_height,
            target,
            illumination,
            config,
            feedback: FeedbackSource::Simulated,
            correction: None,
            warm_start: None,
        }
    }

    fn run(&self) -> Result<RunResult, OptimizerError> {
        let mut optimizer = PhaseRetrieval::new(
            self.slm_width,
            self.slm_height,
            self.target.clone(),
            self.illumination.clone(),
            self.config.clone(),
        )?;
        if let Some(correction) = &self.correction {
            optimizer = optimizer.with_correction(correction)?;
        }
        if let Some(warm) = &self.warm_start {
            optimizer = optimizer.with_warm_start(warm.clone())?;
        }
        optimizer.run_with_feedback(&self.feedback)
    }
}

/// Run every job on the rayon thread pool, one optimizer per job.
///
/// Results come back in job order.
pub fn run_batch(jobs: &[BatchJob]) -> Vec<Result<RunResult, OptimizerError>> {
    jobs.par_iter().map(BatchJob::run).collect()
}
