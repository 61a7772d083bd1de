//! Robbins–Monro adaptation of the shared acceptance tuning parameter.

pub const DEFAULT_TUNING: f64 = 10.;
pub const DEFAULT_TARGET: f64 = 0.3;
/// Largest magnitude of the tuning parameter. Keeps `exp(-t)` and `exp(t)`
/// finite and nonzero.
pub const TUNING_LIMIT: f64 = 500.;

/// Decay of the adaptation step size with the iteration index.
#[inline]
pub fn cooling_transform(iteration: u64) -> f64 {
    (iteration as f64).sqrt()
}

/// The tuning parameter `t` shared by all kernels.
///
/// Kernels scale their proposal variance by `exp(-t)`, so a larger value
/// gives smaller proposals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveTuning {
    value: f64,
    target: f64,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self::new(DEFAULT_TUNING, DEFAULT_TARGET)
    }
}

impl AdaptiveTuning {
    pub fn new(initial: f64, target: f64) -> Self {
        Self {
            value: initial,
            target,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Multiplier applied to the proposal variance.
    pub fn transformed_value(&self) -> f64 {
        transformed(self.value)
    }

    pub fn step_size(iteration: u64) -> f64 {
        1. / (1. + cooling_transform(iteration))
    }

    /// Move the tuning value towards the target acceptance rate and return the change.
    ///
    /// The value never leaves `[-TUNING_LIMIT, TUNING_LIMIT]`.
    pub fn adapt(&mut self, iteration: u64, observed_rate: f64) -> f64 {
        let step = Self::step_size(iteration) * (observed_rate - self.target);
        let previous = self.value;
        self.value = (previous + step).clamp(-TUNING_LIMIT, TUNING_LIMIT);
        self.value - previous
    }
}

#[inline]
pub(crate) fn transformed(tuning: f64) -> f64 {
    (-tuning).exp()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AcceptanceCounter {
    pub(crate) accepted: u64,
    pub(crate) proposed: u64,
}

impl AcceptanceCounter {
    pub(crate) fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    pub(crate) fn rate(&self) -> Option<f64> {
        if self.proposed == 0 {
            None
        } else {
            Some(self.accepted as f64 / self.proposed as f64)
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
