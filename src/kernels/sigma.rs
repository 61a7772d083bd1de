use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::{
    math::sum_of_squares,
    model::{Evaluator, McmcError, Result},
    state::ModelState,
};

use super::{Decision, KernelKind, TransitionKernel};

/// Inverse-gamma hyperprior on the prior variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaSettings {
    pub shape: f64,
    pub scale: f64,
}

impl Default for SigmaSettings {
    fn default() -> Self {
        Self {
            shape: 1.,
            scale: 1.,
        }
    }
}

/// Gibbs update of the prior variance given the coefficients.
///
/// With `beta ~ N(0, sigma_squared I)` and an inverse-gamma hyperprior, the
/// conditional of `sigma_squared` is inverse-gamma again, so the draw is exact
/// and always accepted.
#[derive(Debug, Clone)]
pub struct SigmaSampler {
    settings: SigmaSettings,
}

impl SigmaSampler {
    pub fn new(settings: SigmaSettings) -> Result<Self> {
        let SigmaSettings { shape, scale } = settings;
        if !(shape.is_finite() && shape > 0. && scale.is_finite() && scale > 0.) {
            return Err(McmcError::Config(format!(
                "Sigma hyperprior needs positive shape and scale, got {} and {}",
                shape, scale
            )));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> SigmaSettings {
        self.settings
    }

    /// Shape and rate of the conditional precision `1 / sigma_squared`.
    pub fn conditional(&self, beta: &[f64]) -> (f64, f64) {
        let shape = self.settings.shape + 0.5 * beta.len() as f64;
        let rate = self.settings.scale + 0.5 * sum_of_squares(beta);
        (shape, rate)
    }
}

impl TransitionKernel for SigmaSampler {
    fn kind(&self) -> KernelKind {
        KernelKind::Sigma
    }

    fn sample<R: Rng + ?Sized>(
        &mut self,
        state: &mut ModelState,
        _tuning: f64,
        rng: &mut R,
    ) -> Result<()> {
        let (shape, rate) = self.conditional(state.beta().values());
        let precision = Gamma::new(shape, 1. / rate)
            .map_err(|err| McmcError::Proposal(format!("Invalid gamma conditional: {}", err)))?
            .sample(rng);
        state.set_sigma_squared(1. / precision)
    }

    fn evaluate_sample<E: Evaluator, R: Rng + ?Sized>(
        &mut self,
        state: &ModelState,
        _tuning: f64,
        evaluator: &mut E,
        _rng: &mut R,
    ) -> Result<Decision> {
        let stored = state.stored()?;

        evaluator
            .set_beta(state.beta().values())
            .map_err(McmcError::evaluator)?;
        evaluator
            .set_prior_variance(state.sigma_squared())
            .map_err(McmcError::evaluator)?;
        let log_prior = evaluator.log_prior().map_err(McmcError::evaluator)?;

        Ok(Decision {
            accepted: true,
            log_likelihood: stored.log_likelihood,
            log_prior,
            log_ratio: 0.,
        })
    }
}
