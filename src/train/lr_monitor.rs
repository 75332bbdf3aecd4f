//! Learning-rate history

use std::collections::BTreeMap;

/// Records the learning rate once per epoch, keyed `lr-<optimizer>`.
#[derive(Clone, Debug, Default)]
pub struct LearningRateMonitor {
    lrs: BTreeMap<String, Vec<f64>>,
}

impl LearningRateMonitor {
    /// Create an empty monitor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the current learning rate of `optimizer`.
    pub fn record(&mut self, optimizer: &str, lr: f64) {
        self.lrs.entry(format!("lr-{optimizer}")).or_default().push(lr);
    }

    /// History so far
    #[must_use]
    pub const fn lrs(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.lrs
    }
}
