pub(crate) mod auditor;
pub(crate) mod driver;
pub(crate) mod kernels;
pub(crate) mod math;
pub(crate) mod model;
pub mod parallel;
pub(crate) mod parameter;
pub(crate) mod regression;
pub(crate) mod report;
pub(crate) mod state;
pub(crate) mod tuning;

pub use auditor::{ValidityAuditor, BETA_HAT_TOLERANCE, DENSITY_TOLERANCE};
pub use driver::{ChainSummary, DriverSettings, McmcDriver, StepOutcome};
pub use kernels::{
    metropolis_accept, Decision, IndependenceSampler, Kernel, KernelKind, KernelSelection,
    RandomWalkSampler, RandomWalkSettings, SigmaSampler, SigmaSettings, StepDistribution,
    TransitionKernel,
};
pub use model::{Evaluator, McmcError, ReferenceDistribution, Result};
pub use parallel::{ExecutionPolicy, ParallelError, ThreadSettings, WorkerPool};
pub use parameter::Parameter;
pub use regression::{test_models, GaussianRegression, RegressionError, SparseDesign};
pub use report::{LogSink, NullSink, ParameterSnapshot, ReportSink, TraceRecorder};
pub use state::ModelState;
pub use tuning::{cooling_transform, AdaptiveTuning, TUNING_LIMIT};
