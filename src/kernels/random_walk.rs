use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    model::{Evaluator, McmcError, Result},
    state::ModelState,
    tuning::transformed,
};

use super::{metropolis_decision, Decision, KernelKind, TransitionKernel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDistribution {
    Gaussian,
    /// Uniform on `[-1, 1]`.
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomWalkSettings {
    /// Step scale before the tuning multiplier is applied.
    pub step_size: f64,
    pub distribution: StepDistribution,
}

impl Default for RandomWalkSettings {
    fn default() -> Self {
        Self {
            step_size: 1.,
            distribution: StepDistribution::Gaussian,
        }
    }
}

/// Symmetric random-walk Metropolis proposal on the coefficients.
#[derive(Debug, Clone)]
pub struct RandomWalkSampler {
    settings: RandomWalkSettings,
    candidate: Vec<f64>,
}

impl RandomWalkSampler {
    pub fn new(settings: RandomWalkSettings) -> Result<Self> {
        if !(settings.step_size.is_finite() && settings.step_size > 0.) {
            return Err(McmcError::Config(format!(
                "Random walk step size must be positive, got {}",
                settings.step_size
            )));
        }
        Ok(Self {
            settings,
            candidate: Vec::new(),
        })
    }

    pub fn settings(&self) -> RandomWalkSettings {
        self.settings
    }

    fn step<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self.settings.distribution {
            StepDistribution::Gaussian => rng.sample(StandardNormal),
            StepDistribution::Uniform => rng.random_range(-1f64..=1f64),
        }
    }
}

impl TransitionKernel for RandomWalkSampler {
    fn kind(&self) -> KernelKind {
        KernelKind::RandomWalk
    }

    fn sample<R: Rng + ?Sized>(
        &mut self,
        state: &mut ModelState,
        tuning: f64,
        rng: &mut R,
    ) -> Result<()> {
        let scale = self.settings.step_size * transformed(tuning).sqrt();
        let mut candidate = std::mem::take(&mut self.candidate);
        candidate.clear();
        candidate.extend(
            state
                .beta()
                .values()
                .iter()
                .map(|&x| x + scale * self.step(&mut *rng)),
        );
        let result = state.set_beta(&candidate);
        self.candidate = candidate;
        result
    }

    fn evaluate_sample<E: Evaluator, R: Rng + ?Sized>(
        &mut self,
        state: &ModelState,
        _tuning: f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<Decision> {
        let stored = state.stored()?;

        evaluator
            .set_beta(state.beta().values())
            .map_err(McmcError::evaluator)?;
        let log_likelihood = evaluator.log_likelihood().map_err(McmcError::evaluator)?;
        let log_prior = evaluator.log_prior().map_err(McmcError::evaluator)?;

        let log_ratio =
            (log_likelihood + log_prior) - (stored.log_likelihood + stored.log_prior);

        Ok(metropolis_decision(rng, log_ratio, log_likelihood, log_prior))
    }
}
