//! The Metropolis–Hastings iteration loop for one chain.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    auditor::ValidityAuditor,
    kernels::{
        Kernel, KernelKind, KernelSelection, RandomWalkSettings, SigmaSettings, TransitionKernel,
    },
    model::{Evaluator, McmcError, Result},
    report::{ReportSink, TraceRecorder},
    state::ModelState,
    tuning::{AcceptanceCounter, AdaptiveTuning, DEFAULT_TARGET, DEFAULT_TUNING, TUNING_LIMIT},
};

/// Upper bound on the likelihood trace capacity reserved by `initialize`.
const TRACE_RESERVE: u64 = 1 << 16;

/// Settings for [`McmcDriver`]
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    /// The number of iterations of a chain.
    pub max_iterations: u64,
    /// Every `thinning_interval`-th iteration is passed to the report sink.
    pub thinning_interval: u64,
    /// Initial value of the tuning parameter. Proposal variances are
    /// multiplied by `exp(-acceptance_tuning_parameter)`.
    pub acceptance_tuning_parameter: f64,
    /// Acceptance rate of the independence sampler that adaptation aims for.
    pub target_acceptance_rate: f64,
    pub auto_adapt: bool,
    /// Number of iterations between two adaptation steps.
    pub adapt_interval: u64,
    /// The kernels that share the weight left over by the independence sampler.
    pub other_kernels: Vec<KernelKind>,
    pub random_walk: RandomWalkSettings,
    pub sigma: SigmaSettings,
    /// Run the validity auditor before every iteration.
    pub check_state: bool,
    /// Stream of the random number generator, so that chains with the same
    /// seed are independent.
    pub chain: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            thinning_interval: 1,
            acceptance_tuning_parameter: DEFAULT_TUNING,
            target_acceptance_rate: DEFAULT_TARGET,
            auto_adapt: false,
            adapt_interval: 50,
            other_kernels: vec![KernelKind::Sigma],
            random_walk: RandomWalkSettings::default(),
            sigma: SigmaSettings::default(),
            check_state: false,
            chain: 0,
        }
    }
}

impl DriverSettings {
    /// Replace the other kernels by the kernels with the given names.
    pub fn with_other_kernels<I, N>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        self.other_kernels = names
            .into_iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thinning_interval == 0 {
            return Err(McmcError::Config(
                "thinning_interval must be at least 1".to_string(),
            ));
        }
        if self.adapt_interval == 0 {
            return Err(McmcError::Config(
                "adapt_interval must be at least 1".to_string(),
            ));
        }
        if !(self.acceptance_tuning_parameter.abs() <= TUNING_LIMIT) {
            return Err(McmcError::Config(format!(
                "acceptance_tuning_parameter must be in [-{}, {}], got {}",
                TUNING_LIMIT, TUNING_LIMIT, self.acceptance_tuning_parameter
            )));
        }
        if !(self.target_acceptance_rate > 0. && self.target_acceptance_rate < 1.) {
            return Err(McmcError::Config(format!(
                "target_acceptance_rate must be in (0, 1), got {}",
                self.target_acceptance_rate
            )));
        }
        if self.other_kernels.contains(&KernelKind::Independence) {
            return Err(McmcError::Config(
                "the independence sampler is always kernel 0 and cannot be an other kernel"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// What happened in one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub iteration: u64,
    pub kernel: KernelKind,
    pub accepted: bool,
    pub log_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSummary {
    pub iterations: u64,
    pub accepted: u64,
    pub independence_proposals: u64,
    pub independence_accepted: u64,
    /// Acceptance rate of the independence sampler, if it was ever used.
    pub acceptance_rate: Option<f64>,
    pub final_tuning: f64,
}

struct ChainState {
    model: ModelState,
    kernels: Vec<Kernel>,
    selection: KernelSelection,
    rng: ChaCha8Rng,
    auditor: ValidityAuditor,
}

/// Runs a Metropolis–Hastings chain over the parameters of an [`Evaluator`].
///
/// The independence sampler is always kernel 0 and is selected with the
/// mixture weight; the configured other kernels share the rest.
pub struct McmcDriver<S: ReportSink = TraceRecorder> {
    settings: DriverSettings,
    sink: S,
    tuning: AdaptiveTuning,
    chain: Option<ChainState>,
    independence: AcceptanceCounter,
    window: AcceptanceCounter,
    accepted: u64,
    likelihood_trace: Vec<f64>,
    iterations: u64,
}

impl McmcDriver<TraceRecorder> {
    pub fn with_recorder(settings: DriverSettings) -> Self {
        Self::new(settings, TraceRecorder::new())
    }
}

impl<S: ReportSink> McmcDriver<S> {
    pub fn new(settings: DriverSettings, sink: S) -> Self {
        let tuning = AdaptiveTuning::new(
            settings.acceptance_tuning_parameter,
            settings.target_acceptance_rate,
        );
        Self {
            settings,
            sink,
            tuning,
            chain: None,
            independence: AcceptanceCounter::default(),
            window: AcceptanceCounter::default(),
            accepted: 0,
            likelihood_trace: Vec::new(),
            iterations: 0,
        }
    }

    /// Prepare a chain: read the starting state from the evaluator and build
    /// the kernels.
    ///
    /// The tuning parameter keeps its current value.
    pub fn initialize<E: Evaluator>(
        &mut self,
        mixture_weight: f64,
        evaluator: &mut E,
        seed: u64,
    ) -> Result<()> {
        self.chain = None;
        self.settings.validate()?;
        let selection =
            KernelSelection::from_mixture(mixture_weight, self.settings.other_kernels.len())?;

        let model = ModelState::initialize(evaluator, seed)?;
        let reference = evaluator.reference().map_err(McmcError::evaluator)?;
        if reference.dim() != model.beta().len() {
            return Err(McmcError::DimensionMismatch {
                name: "reference mode".to_string(),
                expected: model.beta().len(),
                found: reference.dim(),
            });
        }

        let kernels = std::iter::once(KernelKind::Independence)
            .chain(self.settings.other_kernels.iter().copied())
            .map(|kind| {
                Kernel::build(
                    kind,
                    &reference,
                    self.settings.random_walk,
                    self.settings.sigma,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(self.settings.chain);

        log::info!(
            "Initialized chain {} with {} coefficients, kernels {:?}, weights {:?}",
            self.settings.chain,
            model.beta().len(),
            kernels.iter().map(|k| k.kind()).collect::<Vec<_>>(),
            selection.weights(),
        );
        model.log_parameters();

        self.independence.reset();
        self.window.reset();
        self.accepted = 0;
        self.iterations = 0;
        self.likelihood_trace.clear();
        // the trace grows past this as needed
        let reserve = self.settings.max_iterations.min(TRACE_RESERVE) as usize;
        self.likelihood_trace.reserve(reserve);
        self.chain = Some(ChainState {
            model,
            kernels,
            selection,
            rng,
            auditor: ValidityAuditor::new(),
        });
        Ok(())
    }

    /// Initialize and run a full chain.
    pub fn drive<E: Evaluator>(
        &mut self,
        evaluator: &mut E,
        mixture_weight: f64,
        seed: u64,
    ) -> Result<ChainSummary> {
        self.initialize(mixture_weight, evaluator, seed)?;
        self.run(evaluator)
    }

    /// Run the remaining iterations of an initialized chain.
    pub fn run<E: Evaluator>(&mut self, evaluator: &mut E) -> Result<ChainSummary> {
        while self.iterations < self.settings.max_iterations {
            self.step(evaluator)?;
        }
        self.sink.finalize()?;

        let summary = self.summary();
        match summary.acceptance_rate {
            Some(rate) => log::info!(
                "Chain {} finished {} iterations, independence acceptance rate {:.4}",
                self.settings.chain,
                summary.iterations,
                rate
            ),
            None => log::info!(
                "Chain {} finished {} iterations without independence proposals",
                self.settings.chain,
                summary.iterations
            ),
        }
        Ok(summary)
    }

    /// Run a single iteration.
    ///
    /// Any error aborts the chain, and it has to be initialized again.
    pub fn step<E: Evaluator>(&mut self, evaluator: &mut E) -> Result<StepOutcome> {
        match self.try_step(evaluator) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if self.chain.take().is_some() {
                    log::error!(
                        "Chain {} aborted in iteration {}: {}",
                        self.settings.chain,
                        self.iterations,
                        err
                    );
                }
                Err(err)
            }
        }
    }

    fn try_step<E: Evaluator>(&mut self, evaluator: &mut E) -> Result<StepOutcome> {
        let chain = self.chain.as_mut().ok_or(McmcError::InvalidSequence(
            "driver stepped before initialize",
        ))?;
        let iteration = self.iterations;

        if self.settings.check_state {
            chain.auditor.check_valid_state(evaluator, &chain.model)?;
        }

        let uniform: f64 = chain.rng.random();
        chain.model.store();
        let index = chain.selection.select(uniform);
        let kernel = &mut chain.kernels[index];
        let tuning = self.tuning.value();

        kernel.sample(&mut chain.model, tuning, &mut chain.rng)?;
        let decision = kernel.evaluate_sample(&chain.model, tuning, evaluator, &mut chain.rng)?;
        let kind = kernel.kind();

        if index == 0 {
            self.independence.record(decision.accepted);
            self.window.record(decision.accepted);
        }

        if decision.accepted {
            self.accepted += 1;
            chain
                .model
                .set_cached(decision.log_likelihood, decision.log_prior)?;
            chain.model.accept_changes()?;
        } else {
            chain.model.restore()?;
            chain.model.sync_evaluator(evaluator)?;
        }
        log::debug!(
            "iteration {}: {} {} (log ratio {})",
            iteration,
            kind,
            if decision.accepted { "accepted" } else { "rejected" },
            decision.log_ratio
        );

        chain.model.log_parameters();
        self.likelihood_trace.push(chain.model.log_likelihood());
        if iteration % self.settings.thinning_interval == 0 {
            self.sink.record(&chain.model.snapshot(iteration))?;
        }

        self.iterations += 1;
        if self.settings.auto_adapt && self.iterations % self.settings.adapt_interval == 0 {
            if let Some(rate) = self.window.rate() {
                self.adaptive_kernel(self.iterations, rate);
            }
            self.window.reset();
        }

        Ok(StepOutcome {
            iteration,
            kernel: kind,
            accepted: decision.accepted,
            log_ratio: decision.log_ratio,
        })
    }

    /// Robbins–Monro step of the tuning parameter towards the target acceptance rate.
    ///
    /// Returns the change of the tuning parameter.
    pub fn adaptive_kernel(&mut self, iteration: u64, observed_rate: f64) -> f64 {
        let delta = self.tuning.adapt(iteration, observed_rate);
        log::debug!(
            "iteration {}: acceptance rate {}, tuning parameter {} ({:+})",
            iteration,
            observed_rate,
            self.tuning.value(),
            delta
        );
        delta
    }

    /// Acceptance rate of the independence sampler so far.
    pub fn acceptance_rate(&self) -> Option<f64> {
        self.independence.rate()
    }

    pub fn likelihood_trace(&self) -> &[f64] {
        &self.likelihood_trace
    }

    pub fn tuning_parameter(&self) -> f64 {
        self.tuning.value()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// The state of the current chain, if one is initialized.
    pub fn model_state(&self) -> Option<&ModelState> {
        self.chain.as_ref().map(|chain| &chain.model)
    }

    /// Publish a new point estimate for the advisory state check.
    pub fn set_beta_hat(&mut self, beta_hat: &[f64]) -> Result<()> {
        let chain = self.chain.as_mut().ok_or(McmcError::InvalidSequence(
            "beta_hat set before initialize",
        ))?;
        chain.model.set_beta_hat(beta_hat)
    }

    /// Number of `beta_hat` drift warnings raised by the state check.
    pub fn drift_warnings(&self) -> u64 {
        self.chain
            .as_ref()
            .map(|chain| chain.auditor.drift_warnings())
            .unwrap_or(0)
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            iterations: self.iterations,
            accepted: self.accepted,
            independence_proposals: self.independence.proposed,
            independence_accepted: self.independence.accepted,
            acceptance_rate: self.independence.rate(),
            final_tuning: self.tuning.value(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
