//! Bayesian linear regression with a Normal prior on the coefficients.
//!
//! `y ~ N(X beta, noise_variance I)` and `beta ~ N(0, sigma_squared I)`. The
//! design `X` is stored sparse, in coordinate format.

use std::sync::Arc;

use faer::{linalg::solvers::Solve, ColMut, Mat, Scale};
use thiserror::Error;

use crate::{
    math::{cholesky, sum_of_squares},
    model::{Evaluator, ReferenceDistribution},
    parallel::{reduce, segmented_reduce, ExecutionPolicy},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("Design entry ({row}, {col}) is outside a {nrows}x{ncols} matrix")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("Expected {expected} values for {what}, got {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Variance must be positive and finite, got {0}")]
    InvalidVariance(f64),
    #[error("Posterior precision is not positive definite")]
    NotPositiveDefinite,
}

/// A sparse matrix in coordinate format.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseDesign {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl SparseDesign {
    /// Build from `(row, col, value)` triplets. Duplicate entries are summed.
    pub fn new(
        nrows: usize,
        ncols: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Result<Self, RegressionError> {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for (row, col, value) in entries {
            if row >= nrows || col >= ncols {
                return Err(RegressionError::IndexOutOfBounds {
                    row,
                    col,
                    nrows,
                    ncols,
                });
            }
            rows.push(row);
            cols.push(col);
            values.push(value);
        }
        Ok(Self {
            nrows,
            ncols,
            rows,
            cols,
            values,
        })
    }

    /// Build from a dense row-major matrix, skipping zeros.
    pub fn from_dense(nrows: usize, ncols: usize, data: &[f64]) -> Result<Self, RegressionError> {
        if data.len() != nrows * ncols {
            return Err(RegressionError::DimensionMismatch {
                what: "dense design",
                expected: nrows * ncols,
                found: data.len(),
            });
        }
        Self::new(
            nrows,
            ncols,
            data.iter()
                .enumerate()
                .filter(|(_, &v)| v != 0.)
                .map(|(i, &v)| (i / ncols, i % ncols, v)),
        )
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// `out = X x`
    pub fn multiply(&self, x: &[f64], out: &mut [f64]) {
        assert!(x.len() == self.ncols);
        assert!(out.len() == self.nrows);
        out.fill(0.);
        segmented_reduce(&self.rows, |n| self.values[n] * x[self.cols[n]], out);
    }

    /// `out = Xᵀ y`
    pub fn transpose_multiply(&self, y: &[f64], out: &mut [f64]) {
        assert!(y.len() == self.nrows);
        assert!(out.len() == self.ncols);
        out.fill(0.);
        segmented_reduce(&self.cols, |n| self.values[n] * y[self.rows[n]], out);
    }

    /// The dense `ncols x ncols` matrix `Xᵀ X`.
    pub fn gram(&self) -> Mat<f64> {
        let mut by_row: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.nrows];
        for ((&row, &col), &value) in self.rows.iter().zip(self.cols.iter()).zip(self.values.iter())
        {
            by_row[row].push((col, value));
        }
        let mut gram = Mat::zeros(self.ncols, self.ncols);
        for entries in by_row.iter() {
            for &(a, va) in entries.iter() {
                for &(b, vb) in entries.iter() {
                    gram[(a, b)] += va * vb;
                }
            }
        }
        gram
    }
}

fn check_variance(variance: f64) -> Result<f64, RegressionError> {
    if variance.is_finite() && variance > 0. {
        Ok(variance)
    } else {
        Err(RegressionError::InvalidVariance(variance))
    }
}

/// Gaussian linear regression evaluator.
#[derive(Debug, Clone)]
pub struct GaussianRegression {
    design: Arc<SparseDesign>,
    response: Arc<[f64]>,
    noise_variance: f64,
    prior_variance: f64,
    beta: Box<[f64]>,
    linear_predictor: Box<[f64]>,
    policy: ExecutionPolicy,
}

impl GaussianRegression {
    pub fn new(
        design: SparseDesign,
        response: &[f64],
        noise_variance: f64,
        prior_variance: f64,
    ) -> Result<Self, RegressionError> {
        if response.len() != design.nrows() {
            return Err(RegressionError::DimensionMismatch {
                what: "response",
                expected: design.nrows(),
                found: response.len(),
            });
        }
        let dim = design.ncols();
        Ok(Self {
            linear_predictor: vec![0.; design.nrows()].into(),
            design: Arc::new(design),
            response: response.into(),
            noise_variance: check_variance(noise_variance)?,
            prior_variance: check_variance(prior_variance)?,
            beta: vec![0.; dim].into(),
            policy: ExecutionPolicy::Serial,
        })
    }

    /// Use `policy` for the per-observation work.
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn design(&self) -> &SparseDesign {
        &self.design
    }

    pub fn noise_variance(&self) -> f64 {
        self.noise_variance
    }

    /// Gradient of the log posterior with respect to `beta`.
    pub fn gradient(&self) -> Vec<f64> {
        let residual: Vec<f64> = self
            .response
            .iter()
            .zip(self.linear_predictor.iter())
            .map(|(y, eta)| (y - eta) / self.noise_variance)
            .collect();
        let mut gradient = vec![0.; self.beta.len()];
        self.design.transpose_multiply(&residual, &mut gradient);
        gradient
            .iter_mut()
            .zip(self.beta.iter())
            .for_each(|(g, b)| *g -= b / self.prior_variance);
        gradient
    }

    /// Negative Hessian of the log posterior.
    pub fn precision(&self) -> Mat<f64> {
        let mut precision = self.design.gram();
        precision *= Scale(self.noise_variance.recip());
        for i in 0..precision.nrows() {
            precision[(i, i)] += self.prior_variance.recip();
        }
        precision
    }

    /// Move `beta` to the posterior mode for the current prior variance.
    pub fn fit_mode(&mut self) -> Result<(), RegressionError> {
        let reference = self.reference()?;
        self.set_beta(&reference.mode)
    }
}

impl Evaluator for GaussianRegression {
    type Err = RegressionError;

    fn dim(&self) -> usize {
        self.beta.len()
    }

    fn beta(&self) -> &[f64] {
        &self.beta
    }

    fn set_beta(&mut self, beta: &[f64]) -> Result<(), RegressionError> {
        if beta.len() != self.beta.len() {
            return Err(RegressionError::DimensionMismatch {
                what: "beta",
                expected: self.beta.len(),
                found: beta.len(),
            });
        }
        self.beta.copy_from_slice(beta);
        self.design.multiply(&self.beta, &mut self.linear_predictor);
        Ok(())
    }

    fn prior_variance(&self) -> f64 {
        self.prior_variance
    }

    fn set_prior_variance(&mut self, sigma_squared: f64) -> Result<(), RegressionError> {
        self.prior_variance = check_variance(sigma_squared)?;
        Ok(())
    }

    fn log_likelihood(&mut self) -> Result<f64, RegressionError> {
        let response = &self.response;
        let predictor = &self.linear_predictor;
        let squared_error = reduce(
            0..response.len(),
            0.,
            |i| {
                let residual = response[i] - predictor[i];
                residual * residual
            },
            |a, b| a + b,
            &self.policy,
        );
        Ok(-0.5 * squared_error / self.noise_variance)
    }

    fn log_prior(&mut self) -> Result<f64, RegressionError> {
        let dim = self.beta.len() as f64;
        Ok(-0.5 * dim * self.prior_variance.ln()
            - 0.5 * sum_of_squares(&self.beta) / self.prior_variance)
    }

    fn reference(&mut self) -> Result<ReferenceDistribution, RegressionError> {
        let precision = self.precision();
        let llt = cholesky(&precision).ok_or(RegressionError::NotPositiveDefinite)?;

        // one Newton step is exact for a Gaussian posterior
        let mut step = self.gradient();
        llt.solve_in_place(ColMut::from_slice_mut(&mut step));
        let mode = self
            .beta
            .iter()
            .zip(step.iter())
            .map(|(b, s)| b + s)
            .collect();

        Ok(ReferenceDistribution { mode, precision })
    }
}

/// Simple evaluators for tests and benchmarks.
pub mod test_models {
    use std::convert::Infallible;

    use faer::Mat;

    use crate::model::{Evaluator, ReferenceDistribution};

    /// Independent standard normal likelihood on every coefficient.
    ///
    /// The log-prior is always zero, and the prior variance is only stored.
    #[derive(Debug, Clone)]
    pub struct StandardNormal {
        beta: Vec<f64>,
        prior_variance: f64,
    }

    impl StandardNormal {
        pub fn new(beta: &[f64], prior_variance: f64) -> Self {
            Self {
                beta: beta.to_vec(),
                prior_variance,
            }
        }
    }

    impl Evaluator for StandardNormal {
        type Err = Infallible;

        fn dim(&self) -> usize {
            self.beta.len()
        }

        fn beta(&self) -> &[f64] {
            &self.beta
        }

        fn set_beta(&mut self, beta: &[f64]) -> Result<(), Infallible> {
            self.beta.copy_from_slice(beta);
            Ok(())
        }

        fn prior_variance(&self) -> f64 {
            self.prior_variance
        }

        fn set_prior_variance(&mut self, sigma_squared: f64) -> Result<(), Infallible> {
            self.prior_variance = sigma_squared;
            Ok(())
        }

        fn log_likelihood(&mut self) -> Result<f64, Infallible> {
            Ok(-0.5 * self.beta.iter().map(|b| b * b).sum::<f64>())
        }

        fn log_prior(&mut self) -> Result<f64, Infallible> {
            Ok(0.)
        }

        fn reference(&mut self) -> Result<ReferenceDistribution, Infallible> {
            let dim = self.beta.len();
            Ok(ReferenceDistribution {
                mode: vec![0.; dim].into(),
                precision: Mat::from_fn(dim, dim, |i, j| if i == j { 1. } else { 0. }),
            })
        }
    }
}
