use pretty_assertions::assert_eq;
use regmcmc::{
    test_models::StandardNormal, DriverSettings, Evaluator, ExecutionPolicy, GaussianRegression,
    KernelKind, McmcDriver, McmcError, NullSink, ParameterSnapshot, ReferenceDistribution,
    ReportSink, SparseDesign, ThreadSettings, TraceRecorder,
};
use thiserror::Error;

fn regression(n: usize, policy: ExecutionPolicy) -> GaussianRegression {
    let design = SparseDesign::new(
        n,
        3,
        (0..n).flat_map(|i| {
            let x = i as f64 / n as f64 - 0.5;
            [(i, 0, 1.), (i, 1, x), (i, 2, (7. * x).sin())]
        }),
    )
    .unwrap();
    let response: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 / n as f64 - 0.5;
            0.5 - 2. * x + 0.3 * (7. * x).sin() + 0.2 * (((i * 31) % 17) as f64 / 8. - 1.)
        })
        .collect();
    GaussianRegression::new(design, &response, 0.25, 10.)
        .unwrap()
        .with_policy(policy)
}

#[test]
fn independence_sampler_on_exact_reference() {
    let mut model = regression(500, ExecutionPolicy::Serial);
    model.fit_mode().unwrap();
    let mode = model.beta().to_vec();

    let settings = DriverSettings {
        max_iterations: 4000,
        acceptance_tuning_parameter: 0.,
        other_kernels: vec![],
        ..Default::default()
    };
    let mut driver = McmcDriver::with_recorder(settings);
    let summary = driver.drive(&mut model, 1., 2024).unwrap();

    assert_eq!(summary.independence_proposals, 4000);
    assert!(summary.acceptance_rate.unwrap() > 0.99);

    let reference = model.reference().unwrap();
    let mean = driver.sink().beta_mean().unwrap();
    for j in 0..3 {
        let sd = (1. / reference.precision[(j, j)]).sqrt();
        assert!(
            (mean[j] - mode[j]).abs() < 0.3 * sd,
            "coefficient {}: mean {}, mode {}",
            j,
            mean[j],
            mode[j]
        );
    }
}

#[test]
fn mixture_chain_keeps_cache_consistent() {
    let policy = ExecutionPolicy::pool(ThreadSettings {
        num_threads: 3,
        min_size: 100,
    })
    .unwrap();
    let mut model = regression(2000, policy);
    model.fit_mode().unwrap();

    let settings = DriverSettings {
        max_iterations: 300,
        acceptance_tuning_parameter: 1.,
        auto_adapt: true,
        adapt_interval: 25,
        check_state: true,
        ..Default::default()
    }
    .with_other_kernels(["random-walk", "sigma"])
    .unwrap();
    let mut driver = McmcDriver::with_recorder(settings);
    let summary = driver.drive(&mut model, 0.4, 11).unwrap();
    assert_eq!(summary.iterations, 300);
    assert_eq!(driver.drift_warnings(), 0);

    let state = driver.model_state().unwrap();
    assert_eq!(model.beta(), state.beta().values());
    assert_eq!(model.prior_variance(), state.sigma_squared());
    assert_eq!(model.log_likelihood().unwrap(), state.log_likelihood());
    assert_eq!(model.log_prior().unwrap(), state.log_prior());

    let sigmas: Vec<f64> = driver
        .sink()
        .snapshots()
        .iter()
        .map(|s| s.sigma_squared)
        .collect();
    assert!(sigmas.iter().all(|&s| s > 0.));
    assert!(sigmas.windows(2).any(|w| w[0] != w[1]));
}

#[test]
fn beta_hat_refresh_is_advisory() {
    let mut model = StandardNormal::new(&[0.1, 0.2], 1.);
    let settings = DriverSettings {
        max_iterations: 20,
        acceptance_tuning_parameter: 0.,
        check_state: true,
        ..Default::default()
    };
    let mut driver = McmcDriver::new(settings, NullSink);
    driver.initialize(0.5, &mut model, 3).unwrap();
    driver.step(&mut model).unwrap();
    driver.set_beta_hat(&[5., 5.]).unwrap();
    let summary = driver.run(&mut model).unwrap();
    assert_eq!(summary.iterations, 20);
    assert_eq!(driver.drift_warnings(), 19);
}

#[derive(Debug, Error)]
#[error("likelihood unavailable after {0} calls")]
struct Unavailable(usize);

/// Standard normal model whose likelihood fails after a number of calls,
/// or drifts by a constant on every call.
struct Unreliable {
    inner: StandardNormal,
    calls: usize,
    fail_after: Option<usize>,
    drift: f64,
}

impl Unreliable {
    fn failing(fail_after: usize) -> Self {
        Self {
            inner: StandardNormal::new(&[0., 0.], 1.),
            calls: 0,
            fail_after: Some(fail_after),
            drift: 0.,
        }
    }

    fn drifting(drift: f64) -> Self {
        Self {
            inner: StandardNormal::new(&[0., 0.], 1.),
            calls: 0,
            fail_after: None,
            drift,
        }
    }
}

impl Evaluator for Unreliable {
    type Err = Unavailable;

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn beta(&self) -> &[f64] {
        self.inner.beta()
    }

    fn set_beta(&mut self, beta: &[f64]) -> Result<(), Unavailable> {
        self.inner.set_beta(beta).map_err(|never| match never {})
    }

    fn prior_variance(&self) -> f64 {
        self.inner.prior_variance()
    }

    fn set_prior_variance(&mut self, sigma_squared: f64) -> Result<(), Unavailable> {
        self.inner
            .set_prior_variance(sigma_squared)
            .map_err(|never| match never {})
    }

    fn log_likelihood(&mut self) -> Result<f64, Unavailable> {
        self.calls += 1;
        if let Some(limit) = self.fail_after {
            if self.calls > limit {
                return Err(Unavailable(self.calls));
            }
        }
        let value = self.inner.log_likelihood().map_err(|never| match never {})?;
        Ok(value + self.drift * self.calls as f64)
    }

    fn log_prior(&mut self) -> Result<f64, Unavailable> {
        self.inner.log_prior().map_err(|never| match never {})
    }

    fn reference(&mut self) -> Result<ReferenceDistribution, Unavailable> {
        self.inner.reference().map_err(|never| match never {})
    }
}

#[test]
fn evaluator_failure_aborts_chain() {
    let mut model = Unreliable::failing(5);
    let settings = DriverSettings {
        max_iterations: 100,
        acceptance_tuning_parameter: 0.,
        other_kernels: vec![KernelKind::RandomWalk],
        ..Default::default()
    };
    let mut driver = McmcDriver::with_recorder(settings);
    let err = driver.drive(&mut model, 0.5, 1).unwrap_err();
    match err {
        McmcError::Evaluator(source) => {
            assert_eq!(source.to_string(), "likelihood unavailable after 6 calls");
        }
        other => panic!("unexpected error {:?}", other),
    }
    // one call at initialization, then one per iteration
    assert_eq!(driver.iterations(), 4);
    assert_eq!(driver.likelihood_trace().len(), 4);
    assert!(driver.model_state().is_none());
    assert!(matches!(
        driver.step(&mut model),
        Err(McmcError::InvalidSequence(_))
    ));
    assert!(!driver.sink().is_finalized());
}

#[test]
fn stale_likelihood_is_state_corruption() {
    let mut model = Unreliable::drifting(1e-3);
    let settings = DriverSettings {
        max_iterations: 10,
        check_state: true,
        other_kernels: vec![KernelKind::RandomWalk],
        ..Default::default()
    };
    let mut driver = McmcDriver::new(settings, NullSink);
    let err = driver.drive(&mut model, 0.5, 1).unwrap_err();
    match err {
        McmcError::StateCorruption {
            quantity,
            stored,
            recomputed,
        } => {
            assert_eq!(quantity, "log-likelihood");
            assert!((recomputed - stored - 1e-3).abs() < 1e-12);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(driver.iterations(), 0);
}

struct BrokenSink;

impl ReportSink for BrokenSink {
    fn record(&mut self, snapshot: &ParameterSnapshot) -> anyhow::Result<()> {
        anyhow::bail!("disk full at iteration {}", snapshot.iteration)
    }
}

#[test]
fn sink_failure_is_reported() {
    let mut model = StandardNormal::new(&[0.], 1.);
    let mut driver = McmcDriver::new(DriverSettings::default(), BrokenSink);
    let err = driver.drive(&mut model, 0.5, 1).unwrap_err();
    assert!(matches!(err, McmcError::Report(_)));
    assert_eq!(err.to_string(), "disk full at iteration 0");
}

#[test]
fn recorder_sink_by_reference() {
    let mut recorder = TraceRecorder::new();
    {
        let settings = DriverSettings {
            max_iterations: 12,
            thinning_interval: 5,
            ..Default::default()
        };
        let mut model = StandardNormal::new(&[0.], 1.);
        let mut driver = McmcDriver::new(settings, &mut recorder);
        driver.drive(&mut model, 0.5, 8).unwrap();
    }
    let iterations: Vec<u64> = recorder.snapshots().iter().map(|s| s.iteration).collect();
    assert_eq!(iterations, vec![0, 5, 10]);
}
