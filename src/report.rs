use anyhow::Result;

/// The values of one chain at a logged iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSnapshot {
    pub iteration: u64,
    pub log_likelihood: f64,
    pub log_prior: f64,
    pub beta: Box<[f64]>,
    pub sigma_squared: f64,
}

/// Receives the chain state every `thinning_interval` iterations.
pub trait ReportSink {
    /// Record one snapshot.
    fn record(&mut self, snapshot: &ParameterSnapshot) -> Result<()>;

    /// Called once after the last iteration of a chain.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn record(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        (**self).record(snapshot)
    }

    fn finalize(&mut self) -> Result<()> {
        (**self).finalize()
    }
}

/// Keeps all snapshots in memory.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    snapshots: Vec<ParameterSnapshot>,
    finalized: bool,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> &[ParameterSnapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<ParameterSnapshot> {
        self.snapshots
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Posterior mean of each coefficient over the recorded snapshots.
    pub fn beta_mean(&self) -> Option<Box<[f64]>> {
        let first = self.snapshots.first()?;
        let mut mean = vec![0f64; first.beta.len()];
        for snapshot in self.snapshots.iter() {
            for (m, &b) in mean.iter_mut().zip(snapshot.beta.iter()) {
                *m += b;
            }
        }
        let n = self.snapshots.len() as f64;
        mean.iter_mut().for_each(|m| *m /= n);
        Some(mean.into())
    }
}

impl ReportSink for TraceRecorder {
    fn record(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        if self.finalized {
            anyhow::bail!("Trace was already finalized");
        }
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finalized = true;
        Ok(())
    }
}

/// Writes every snapshot to the `log` facade at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn record(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        log::info!(
            "iteration {}: loglikelihood = {}, logprior = {}, sigma_squared = {}, beta = {:?}",
            snapshot.iteration,
            snapshot.log_likelihood,
            snapshot.log_prior,
            snapshot.sigma_squared,
            snapshot.beta,
        );
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn record(&mut self, _snapshot: &ParameterSnapshot) -> Result<()> {
        Ok(())
    }
}
