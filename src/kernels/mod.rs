//! Transition kernels and the Metropolis–Hastings decision.
//!
//! A kernel first writes a candidate into the tentative values of the
//! [`ModelState`] with `sample`, and then decides with `evaluate_sample`
//! whether the candidate is kept. The driver owns the checkpoint: kernels never
//! call `store`, `restore` or `accept_changes`.

use std::{fmt, str::FromStr};

use rand::Rng;

use crate::{
    model::{Evaluator, McmcError, ReferenceDistribution, Result},
    state::ModelState,
};

mod independence;
mod random_walk;
mod sigma;

pub use independence::IndependenceSampler;
pub use random_walk::{RandomWalkSampler, RandomWalkSettings, StepDistribution};
pub use sigma::{SigmaSampler, SigmaSettings};

/// Outcome of `evaluate_sample`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub accepted: bool,
    /// Log-likelihood at the candidate.
    pub log_likelihood: f64,
    /// Log-prior at the candidate.
    pub log_prior: f64,
    pub log_ratio: f64,
}

/// Accept iff `ln(uniform) <= log_ratio`.
///
/// A non-negative ratio is always accepted, NaN and negative infinity never are.
#[inline]
pub fn metropolis_accept(log_ratio: f64, uniform: f64) -> bool {
    if log_ratio.is_nan() || log_ratio == f64::NEG_INFINITY {
        return false;
    }
    if log_ratio >= 0. {
        return true;
    }
    uniform.ln() <= log_ratio
}

/// Draw the uniform and make the Metropolis–Hastings decision.
pub(crate) fn metropolis_decision<R: Rng + ?Sized>(
    rng: &mut R,
    log_ratio: f64,
    log_likelihood: f64,
    log_prior: f64,
) -> Decision {
    let uniform: f64 = rng.random();
    Decision {
        accepted: metropolis_accept(log_ratio, uniform),
        log_likelihood,
        log_prior,
        log_ratio,
    }
}

pub trait TransitionKernel {
    fn kind(&self) -> KernelKind;

    /// Write a candidate into the tentative values of `state`.
    fn sample<R: Rng + ?Sized>(
        &mut self,
        state: &mut ModelState,
        tuning: f64,
        rng: &mut R,
    ) -> Result<()>;

    /// Decide whether to keep the candidate in `state`.
    ///
    /// The evaluator is left at the candidate values. `state` is not modified.
    fn evaluate_sample<E: Evaluator, R: Rng + ?Sized>(
        &mut self,
        state: &ModelState,
        tuning: f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<Decision>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    Independence,
    RandomWalk,
    Sigma,
}

impl KernelKind {
    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::Independence => "independence",
            KernelKind::RandomWalk => "random-walk",
            KernelKind::Sigma => "sigma",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelKind {
    type Err = McmcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "independence" => Ok(KernelKind::Independence),
            "random-walk" | "random_walk" | "rw" => Ok(KernelKind::RandomWalk),
            "sigma" => Ok(KernelKind::Sigma),
            other => Err(McmcError::Config(format!("Unknown kernel name '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Kernel {
    Independence(IndependenceSampler),
    RandomWalk(RandomWalkSampler),
    Sigma(SigmaSampler),
}

impl Kernel {
    /// Build the kernel of the given kind.
    ///
    /// `reference` is only used by the independence sampler.
    pub fn build(
        kind: KernelKind,
        reference: &ReferenceDistribution,
        random_walk: RandomWalkSettings,
        sigma: SigmaSettings,
    ) -> Result<Self> {
        Ok(match kind {
            KernelKind::Independence => {
                Kernel::Independence(IndependenceSampler::new(reference)?)
            }
            KernelKind::RandomWalk => Kernel::RandomWalk(RandomWalkSampler::new(random_walk)?),
            KernelKind::Sigma => Kernel::Sigma(SigmaSampler::new(sigma)?),
        })
    }
}

impl TransitionKernel for Kernel {
    fn kind(&self) -> KernelKind {
        match self {
            Kernel::Independence(kernel) => kernel.kind(),
            Kernel::RandomWalk(kernel) => kernel.kind(),
            Kernel::Sigma(kernel) => kernel.kind(),
        }
    }

    fn sample<R: Rng + ?Sized>(
        &mut self,
        state: &mut ModelState,
        tuning: f64,
        rng: &mut R,
    ) -> Result<()> {
        match self {
            Kernel::Independence(kernel) => kernel.sample(state, tuning, rng),
            Kernel::RandomWalk(kernel) => kernel.sample(state, tuning, rng),
            Kernel::Sigma(kernel) => kernel.sample(state, tuning, rng),
        }
    }

    fn evaluate_sample<E: Evaluator, R: Rng + ?Sized>(
        &mut self,
        state: &ModelState,
        tuning: f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<Decision> {
        match self {
            Kernel::Independence(kernel) => kernel.evaluate_sample(state, tuning, evaluator, rng),
            Kernel::RandomWalk(kernel) => kernel.evaluate_sample(state, tuning, evaluator, rng),
            Kernel::Sigma(kernel) => kernel.evaluate_sample(state, tuning, evaluator, rng),
        }
    }
}

/// Cumulative selection probabilities, one per kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSelection {
    weights: Box<[f64]>,
    cumulative: Box<[f64]>,
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

impl KernelSelection {
    pub fn new(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(McmcError::Config("Kernel list is empty".to_string()));
        }
        if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.)) {
            return Err(McmcError::Config(format!(
                "Kernel selection weight {} is not a non-negative number",
                w
            )));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(McmcError::Config(format!(
                "Kernel selection weights sum to {} instead of 1",
                total
            )));
        }
        let cumulative = weights
            .iter()
            .scan(0., |acc, w| {
                *acc += w;
                Some(*acc)
            })
            .collect();
        Ok(Self {
            weights: weights.into(),
            cumulative,
        })
    }

    /// `[mixture_weight, (1 - mixture_weight) / k, ...]` for the independence
    /// kernel followed by `k` other kernels.
    pub fn from_mixture(mixture_weight: f64, num_other: usize) -> Result<Self> {
        if !(0. ..=1.).contains(&mixture_weight) {
            return Err(McmcError::Config(format!(
                "Mixture weight {} is outside [0, 1]",
                mixture_weight
            )));
        }
        if num_other == 0 {
            if mixture_weight < 1. {
                return Err(McmcError::Config(
                    "Mixture weight below 1 needs at least one other kernel".to_string(),
                ));
            }
            return Self::new(&[1.]);
        }
        let rest = (1. - mixture_weight) / num_other as f64;
        let weights: Vec<f64> = std::iter::once(mixture_weight)
            .chain(std::iter::repeat(rest).take(num_other))
            .collect();
        Self::new(&weights)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// The first kernel with non-zero weight whose cumulative weight reaches `uniform`.
    ///
    /// Rounding in the cumulative sum can leave the total slightly below 1,
    /// in which case the last kernel with non-zero weight is used.
    pub fn select(&self, uniform: f64) -> usize {
        self.cumulative
            .iter()
            .zip(self.weights.iter())
            .position(|(&c, &w)| w > 0. && uniform <= c)
            .or_else(|| self.weights.iter().rposition(|&w| w > 0.))
            .unwrap_or(self.weights.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn zero_log_ratio_always_accepts() {
        let n = 100_000;
        for i in 0..n {
            let u = i as f64 / n as f64;
            assert!(metropolis_accept(0., u));
        }
        assert!(metropolis_accept(0., 0.));
        assert!(metropolis_accept(1e-300, 0.999_999));
    }

    #[test]
    fn degenerate_ratios_reject() {
        assert!(!metropolis_accept(f64::NAN, 0.));
        assert!(!metropolis_accept(f64::NEG_INFINITY, 0.));
        assert!(!metropolis_accept(f64::NEG_INFINITY, 0.5));
        assert!(metropolis_accept(f64::INFINITY, 0.5));
    }

    #[test]
    fn acceptance_matches_ratio() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let log_ratio = 0.25f64.ln();
        let n = 200_000;
        let accepted = (0..n)
            .filter(|_| metropolis_decision(&mut rng, log_ratio, 0., 0.).accepted)
            .count();
        let rate = accepted as f64 / n as f64;
        assert!((rate - 0.25).abs() < 0.01, "rate {}", rate);
    }

    #[test]
    fn selection_frequencies() {
        let selection = KernelSelection::new(&[0.3, 0.7]).unwrap();
        let n = 100_000;
        let first = (0..n)
            .filter(|&i| selection.select((i as f64 + 0.5) / n as f64) == 0)
            .count();
        assert_eq!(first, 30_000);
        assert_eq!(selection.select(0.), 0);
        assert_eq!(selection.select(0.3), 0);
        assert_eq!(selection.select(1.), 1);
    }

    #[test]
    fn selection_falls_back_to_last() {
        let selection = KernelSelection::new(&[0.5, 0.5 - 1e-12]).unwrap();
        assert_eq!(selection.select(1. - 1e-13), 1);
        assert_eq!(selection.select(1.), 1);
    }

    #[test]
    fn zero_weight_kernel_is_never_selected() {
        let selection = KernelSelection::new(&[0., 1.]).unwrap();
        assert_eq!(selection.select(0.), 1);
        assert_eq!(selection.select(1e-12), 1);
        let selection = KernelSelection::from_mixture(1., 2).unwrap();
        assert_eq!(selection.weights(), &[1., 0., 0.]);
        assert_eq!(selection.select(0.999), 0);
    }

    #[test]
    fn mixture_weights() {
        let selection = KernelSelection::from_mixture(0.4, 2).unwrap();
        assert_eq!(selection.weights(), &[0.4, 0.3, 0.3]);
        assert_eq!(selection.len(), 3);
        assert_eq!(KernelSelection::from_mixture(1., 0).unwrap().weights(), &[1.]);
    }

    #[test]
    fn invalid_selections() {
        for weight in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                KernelSelection::from_mixture(weight, 1),
                Err(McmcError::Config(_))
            ));
        }
        assert!(matches!(
            KernelSelection::from_mixture(0.5, 0),
            Err(McmcError::Config(_))
        ));
        assert!(matches!(KernelSelection::new(&[]), Err(McmcError::Config(_))));
        assert!(matches!(
            KernelSelection::new(&[0.5, 0.6]),
            Err(McmcError::Config(_))
        ));
        assert!(matches!(
            KernelSelection::new(&[1.5, -0.5]),
            Err(McmcError::Config(_))
        ));
    }

    #[test]
    fn kernel_names() {
        assert_eq!("independence".parse::<KernelKind>().unwrap(), KernelKind::Independence);
        assert_eq!("Random-Walk".parse::<KernelKind>().unwrap(), KernelKind::RandomWalk);
        assert_eq!("rw".parse::<KernelKind>().unwrap(), KernelKind::RandomWalk);
        assert_eq!(" sigma ".parse::<KernelKind>().unwrap(), KernelKind::Sigma);
        assert!(matches!(
            "hamiltonian".parse::<KernelKind>(),
            Err(McmcError::Config(_))
        ));
        assert_eq!(KernelKind::RandomWalk.to_string(), "random-walk");
    }
}
