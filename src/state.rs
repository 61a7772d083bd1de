//! Parameter values of one chain, with a single checkpoint slot.
//!
//! Every sampler iteration is a small transaction: `store` saves the current
//! values, a kernel mutates them, and the driver either keeps the mutation
//! with `accept_changes` or rolls it back with `restore`.

use crate::{
    model::{Evaluator, McmcError, Result},
    parameter::Parameter,
    report::ParameterSnapshot,
};

pub const BETA: &str = "beta";
pub const SIGMA_SQUARED: &str = "sigma_squared";
pub const BETA_HAT: &str = "beta_hat";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Snapshot {
    pub(crate) beta: Parameter,
    pub(crate) sigma_squared: Parameter,
    pub(crate) log_likelihood: f64,
    pub(crate) log_prior: f64,
}

impl Snapshot {
    fn copy_from(&mut self, other: &Snapshot) {
        let Snapshot {
            beta,
            sigma_squared,
            log_likelihood,
            log_prior,
        } = self;

        beta.copy_from(&other.beta);
        sigma_squared.copy_from(&other.sigma_squared);
        *log_likelihood = other.log_likelihood;
        *log_prior = other.log_prior;
    }
}

#[derive(Debug, Clone)]
pub struct ModelState {
    current: Snapshot,
    checkpoint: Option<Snapshot>,
    beta_hat: Parameter,
    seed: u64,
}

impl ModelState {
    /// Read the parameters and log densities from the evaluator.
    ///
    /// The diagnostic `beta_hat` starts out as the evaluator's coefficients.
    pub fn initialize<E: Evaluator>(evaluator: &mut E, seed: u64) -> Result<Self> {
        let beta = Parameter::new(BETA, evaluator.beta());
        if beta.len() != evaluator.dim() {
            return Err(McmcError::DimensionMismatch {
                name: BETA.to_string(),
                expected: evaluator.dim(),
                found: beta.len(),
            });
        }
        let sigma_squared = Parameter::scalar(SIGMA_SQUARED, evaluator.prior_variance());
        let log_likelihood = evaluator.log_likelihood().map_err(McmcError::evaluator)?;
        let log_prior = evaluator.log_prior().map_err(McmcError::evaluator)?;
        let beta_hat = Parameter::new(BETA_HAT, beta.values());

        Ok(Self {
            current: Snapshot {
                beta,
                sigma_squared,
                log_likelihood,
                log_prior,
            },
            checkpoint: None,
            beta_hat,
            seed,
        })
    }

    /// Save all parameters and cached densities into the checkpoint.
    ///
    /// An existing checkpoint is overwritten.
    pub fn store(&mut self) {
        match self.checkpoint.as_mut() {
            Some(checkpoint) => checkpoint.copy_from(&self.current),
            None => self.checkpoint = Some(self.current.clone()),
        }
    }

    /// Keep the current values and discard the checkpoint.
    pub fn accept_changes(&mut self) -> Result<()> {
        match self.checkpoint.take() {
            Some(_) => Ok(()),
            None => Err(McmcError::InvalidSequence(
                "accept_changes called without a stored checkpoint",
            )),
        }
    }

    /// Overwrite the current values with the checkpoint.
    ///
    /// The checkpoint stays in place, so restoring twice gives the same state.
    pub fn restore(&mut self) -> Result<()> {
        let Some(checkpoint) = self.checkpoint.as_ref() else {
            return Err(McmcError::InvalidSequence(
                "restore called without a stored checkpoint",
            ));
        };
        self.current.copy_from(checkpoint);
        Ok(())
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint.is_some()
    }

    pub fn log_likelihood(&self) -> f64 {
        self.current.log_likelihood
    }

    pub fn log_prior(&self) -> f64 {
        self.current.log_prior
    }

    pub fn log_target(&self) -> f64 {
        self.current.log_likelihood + self.current.log_prior
    }

    pub fn beta(&self) -> &Parameter {
        &self.current.beta
    }

    pub fn sigma_squared(&self) -> f64 {
        self.current.sigma_squared.values()[0]
    }

    pub fn beta_hat(&self) -> &Parameter {
        &self.beta_hat
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn tentative(&mut self) -> Result<&mut Snapshot> {
        if self.checkpoint.is_none() {
            return Err(McmcError::InvalidSequence(
                "parameters modified without a stored checkpoint",
            ));
        }
        Ok(&mut self.current)
    }

    pub fn set_beta(&mut self, beta: &[f64]) -> Result<()> {
        self.tentative()?.beta.set(beta)
    }

    pub fn set_sigma_squared(&mut self, sigma_squared: f64) -> Result<()> {
        self.tentative()?.sigma_squared.set(&[sigma_squared])
    }

    pub fn set_cached(&mut self, log_likelihood: f64, log_prior: f64) -> Result<()> {
        let current = self.tentative()?;
        current.log_likelihood = log_likelihood;
        current.log_prior = log_prior;
        Ok(())
    }

    /// Publish a new point estimate. Not part of the checkpoint.
    pub fn set_beta_hat(&mut self, beta_hat: &[f64]) -> Result<()> {
        self.beta_hat.set(beta_hat)
    }

    /// Copy of the current values for a reporting sink.
    pub fn snapshot(&self, iteration: u64) -> ParameterSnapshot {
        ParameterSnapshot {
            iteration,
            log_likelihood: self.current.log_likelihood,
            log_prior: self.current.log_prior,
            beta: self.current.beta.values().into(),
            sigma_squared: self.sigma_squared(),
        }
    }

    pub fn log_parameters(&self) {
        self.current.sigma_squared.log_parameter();
        self.current.beta.log_parameter();
    }

    /// Write the current parameter values back into the evaluator.
    pub fn sync_evaluator<E: Evaluator>(&self, evaluator: &mut E) -> Result<()> {
        evaluator
            .set_beta(self.current.beta.values())
            .map_err(McmcError::evaluator)?;
        evaluator
            .set_prior_variance(self.sigma_squared())
            .map_err(McmcError::evaluator)
    }

    /// Log-likelihood and log-prior of the evaluator at the current values.
    pub(crate) fn recompute<E: Evaluator>(&self, evaluator: &mut E) -> Result<(f64, f64)> {
        self.sync_evaluator(evaluator)?;
        let log_likelihood = evaluator.log_likelihood().map_err(McmcError::evaluator)?;
        let log_prior = evaluator.log_prior().map_err(McmcError::evaluator)?;
        Ok((log_likelihood, log_prior))
    }

    /// The values saved by the last `store`.
    pub(crate) fn stored(&self) -> Result<&Snapshot> {
        self.checkpoint.as_ref().ok_or(McmcError::InvalidSequence(
            "proposal evaluated without a stored checkpoint",
        ))
    }
}
