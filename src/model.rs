//! Core abstractions for the regression model being sampled.
//!
//! Provides the `Evaluator` trait, through which the sampler reads and writes
//! the model parameters and computes log densities, and the crate error type.

use faer::Mat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McmcError {
    #[error("Invalid model state sequence: {0}")]
    InvalidSequence(&'static str),
    #[error(
        "Cached {quantity} does not match the model: stored {stored}, recomputed {recomputed}"
    )]
    StateCorruption {
        quantity: &'static str,
        stored: f64,
        recomputed: f64,
    },
    #[error("Evaluator returned unrecoverable error")]
    Evaluator(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Parameter {name} has length {expected}, got {found} values")]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Could not build proposal: {0}")]
    Proposal(String),
    #[error(transparent)]
    Report(#[from] anyhow::Error),
}

impl McmcError {
    pub(crate) fn evaluator<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        McmcError::Evaluator(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, McmcError>;

/// Gaussian approximation of the posterior used by the independence sampler.
///
/// `precision` is the curvature (negative Hessian of the log target) at `mode`
/// and has to be symmetric positive definite.
#[derive(Debug, Clone)]
pub struct ReferenceDistribution {
    pub mode: Box<[f64]>,
    pub precision: Mat<f64>,
}

impl ReferenceDistribution {
    pub fn dim(&self) -> usize {
        self.mode.len()
    }
}

/// Access to the model for one chain.
///
/// The evaluator holds the current coefficients `beta` and the prior
/// variance, and computes the log-likelihood and log-prior at these values.
/// It must be deterministic: the same values give the same densities.
///
/// Implementations may use [`crate::parallel`] to spread the work of a single
/// call over several threads, but every call has to finish its work before it
/// returns.
pub trait Evaluator {
    type Err: std::error::Error + Send + Sync + 'static;

    /// The number of regression coefficients.
    fn dim(&self) -> usize;

    fn beta(&self) -> &[f64];

    /// Replace the current coefficients. `beta.len()` equals `self.dim()`.
    fn set_beta(&mut self, beta: &[f64]) -> std::result::Result<(), Self::Err>;

    fn prior_variance(&self) -> f64;

    fn set_prior_variance(&mut self, sigma_squared: f64) -> std::result::Result<(), Self::Err>;

    /// Log-likelihood at the current values, up to a constant.
    fn log_likelihood(&mut self) -> std::result::Result<f64, Self::Err>;

    /// Log-density of the coefficient prior at the current values, up to a constant.
    fn log_prior(&mut self) -> std::result::Result<f64, Self::Err>;

    /// The mode and curvature of the posterior over `beta`, for the current
    /// prior variance.
    fn reference(&mut self) -> std::result::Result<ReferenceDistribution, Self::Err>;
}
