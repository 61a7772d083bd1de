use crate::{
    math::max_abs_diff,
    model::{Evaluator, McmcError, Result},
    state::ModelState,
};

/// Tolerance for the cached log-likelihood and log-prior.
pub const DENSITY_TOLERANCE: f64 = 1e-6;
/// Tolerance for the advisory `beta_hat` comparison.
pub const BETA_HAT_TOLERANCE: f64 = 1e-4;

/// Debug check that the cached densities of a [`ModelState`] are current.
///
/// A mismatch in log-likelihood or log-prior is fatal. Drift of `beta_hat`
/// away from the value seen on the first check only produces a warning.
#[derive(Debug, Clone, Default)]
pub struct ValidityAuditor {
    stored_beta_hat: Option<Box<[f64]>>,
    drift_warnings: u64,
}

impl ValidityAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drift_warnings(&self) -> u64 {
        self.drift_warnings
    }

    /// Recompute the densities at the current parameters and compare.
    ///
    /// The evaluator is left at the parameter values of `state`.
    pub fn check_valid_state<E: Evaluator>(
        &mut self,
        evaluator: &mut E,
        state: &ModelState,
    ) -> Result<()> {
        let (log_likelihood, log_prior) = state.recompute(evaluator)?;
        compare("log-likelihood", state.log_likelihood(), log_likelihood)?;
        compare("log-prior", state.log_prior(), log_prior)?;

        let beta_hat = state.beta_hat().values();
        match self.stored_beta_hat.as_ref() {
            None => self.stored_beta_hat = Some(beta_hat.into()),
            Some(stored) => {
                let drift = if stored.len() == beta_hat.len() {
                    max_abs_diff(stored, beta_hat)
                } else {
                    f64::INFINITY
                };
                if !(drift <= BETA_HAT_TOLERANCE) {
                    self.drift_warnings += 1;
                    log::warn!(
                        "beta_hat moved by {} since the first state check",
                        drift
                    );
                }
            }
        }
        Ok(())
    }
}

fn compare(quantity: &'static str, stored: f64, recomputed: f64) -> Result<()> {
    let same = stored == recomputed || (stored - recomputed).abs() <= DENSITY_TOLERANCE;
    if same {
        Ok(())
    } else {
        Err(McmcError::StateCorruption {
            quantity,
            stored,
            recomputed,
        })
    }
}
