use faer::linalg::solvers::Llt;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    math::{cholesky, lower_quad_form, solve_lower_transpose_in_place},
    model::{Evaluator, McmcError, ReferenceDistribution, Result},
    state::ModelState,
    tuning::transformed,
};

use super::{metropolis_decision, Decision, KernelKind, TransitionKernel};

/// Proposes coefficients from a Gaussian approximation of the posterior.
///
/// The proposal is `N(mode, (exp(t) * precision)⁻¹)` for tuning value `t`,
/// independent of the current coefficients.
#[derive(Debug, Clone)]
pub struct IndependenceSampler {
    mode: Box<[f64]>,
    /// Cholesky factorization of the reference precision.
    factor: Llt<f64>,
    draw: Vec<f64>,
}

impl IndependenceSampler {
    pub fn new(reference: &ReferenceDistribution) -> Result<Self> {
        let dim = reference.dim();
        if reference.precision.nrows() != dim || reference.precision.ncols() != dim {
            return Err(McmcError::Proposal(format!(
                "Reference precision is {}x{}, but the mode has {} entries",
                reference.precision.nrows(),
                reference.precision.ncols(),
                dim
            )));
        }
        if reference.mode.iter().any(|v| !v.is_finite()) {
            return Err(McmcError::Proposal(
                "Reference mode is not finite".to_string(),
            ));
        }
        let factor = cholesky(&reference.precision).ok_or_else(|| {
            McmcError::Proposal("Reference precision is not positive definite".to_string())
        })?;
        Ok(Self {
            mode: reference.mode.clone(),
            factor,
            draw: vec![0.; dim],
        })
    }

    pub fn mode(&self) -> &[f64] {
        &self.mode
    }

    /// Log-density of the proposal at `beta`, up to a constant.
    pub fn log_proposal(&self, beta: &[f64], tuning: f64) -> f64 {
        -0.5 * lower_quad_form(self.factor.L(), beta, &self.mode) * tuning.exp()
    }
}

impl TransitionKernel for IndependenceSampler {
    fn kind(&self) -> KernelKind {
        KernelKind::Independence
    }

    fn sample<R: Rng + ?Sized>(
        &mut self,
        state: &mut ModelState,
        tuning: f64,
        rng: &mut R,
    ) -> Result<()> {
        let scale = transformed(tuning).sqrt();
        self.draw
            .iter_mut()
            .for_each(|z| *z = rng.sample(StandardNormal));
        solve_lower_transpose_in_place(self.factor.L(), &mut self.draw);
        self.draw
            .iter_mut()
            .zip(self.mode.iter())
            .for_each(|(z, &m)| *z = m + scale * *z);
        state.set_beta(&self.draw)
    }

    fn evaluate_sample<E: Evaluator, R: Rng + ?Sized>(
        &mut self,
        state: &ModelState,
        tuning: f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<Decision> {
        let stored = state.stored()?;
        let candidate = state.beta().values();

        evaluator
            .set_beta(candidate)
            .map_err(McmcError::evaluator)?;
        let log_likelihood = evaluator.log_likelihood().map_err(McmcError::evaluator)?;
        let log_prior = evaluator.log_prior().map_err(McmcError::evaluator)?;

        let candidate_weight = log_likelihood + log_prior - self.log_proposal(candidate, tuning);
        let current_weight = stored.log_likelihood + stored.log_prior
            - self.log_proposal(stored.beta.values(), tuning);
        let log_ratio = candidate_weight - current_weight;

        Ok(metropolis_decision(rng, log_ratio, log_likelihood, log_prior))
    }
}
