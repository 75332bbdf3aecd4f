//! Models the trainer can fit
//!
//! A [`Model`] owns its parameters, optimizer and LR schedule. The trainer
//! only drives epochs, reads metrics and asks for serialized state.

mod classifier;
mod data;

use std::collections::BTreeMap;

use serde_json::Value;

pub use classifier::{Classifier, ClassifierConfig};
pub use data::{Dataset, Sample};

use crate::Result;

/// Metric name to value (`loss`, `acc`, or prefixed `train.loss` etc.)
pub type Metrics = BTreeMap<String, f64>;

/// A trainable model.
pub trait Model: Send {
    /// Model name for logs
    fn name(&self) -> &str;

    /// Hyperparameters stored in the experiment record's `config`
    fn hparams(&self) -> Value;

    /// Optimizer name used for LR history keys (`lr-<name>`)
    fn optimizer_name(&self) -> &str;

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// One pass over `data`, updating parameters. Returns unprefixed metrics.
    ///
    /// # Errors
    ///
    /// Returns error if `data` does not fit the model.
    fn train_epoch(&mut self, data: &Dataset) -> Result<Metrics>;

    /// Evaluate without updating parameters. Returns unprefixed metrics.
    ///
    /// # Errors
    ///
    /// Returns error if `data` does not fit the model.
    fn evaluate(&self, data: &Dataset) -> Result<Metrics>;

    /// Step the LR schedule at the end of an epoch
    fn step_scheduler(&mut self) {}

    /// Serialize parameters for a checkpoint
    ///
    /// # Errors
    ///
    /// Returns error on serialization failure.
    fn state_bytes(&self) -> Result<Vec<u8>>;

    /// Restore parameters from a checkpoint
    ///
    /// # Errors
    ///
    /// [`crate::Error::Checkpoint`] if the bytes do not match this model.
    fn load_state_bytes(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Prefix every key with `<prefix>.`
#[must_use]
pub fn prefixed(metrics: &Metrics, prefix: &str) -> Metrics {
    metrics
        .iter()
        .map(|(k, v)| (format!("{prefix}.{k}"), *v))
        .collect()
}
