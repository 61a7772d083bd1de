use crate::model::{McmcError, Result};

/// A named vector of reals whose length is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    values: Box<[f64]>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, values: &[f64]) -> Self {
        Self {
            name: name.into(),
            values: values.into(),
        }
    }

    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, &[value])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Overwrite all values. The length must not change.
    pub fn set(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(McmcError::DimensionMismatch {
                name: self.name.clone(),
                expected: self.values.len(),
                found: values.len(),
            });
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    pub fn log_parameter(&self) {
        log::trace!("{} = {:?}", self.name, self.values);
    }

    pub(crate) fn copy_from(&mut self, other: &Parameter) {
        debug_assert!(other.len() == self.len());
        self.values.copy_from_slice(&other.values);
    }
}
