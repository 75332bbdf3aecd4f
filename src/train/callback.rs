//! Core traits and types for the callback system
//!
//! - `CallbackContext` - State passed to callbacks
//! - `TrainerCallback` - The trait all callbacks implement

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::model::Metrics;
use crate::Result;

/// Context passed to callbacks with current training state
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Total epochs planned
    pub max_epochs: usize,
    /// Metrics logged so far this epoch (`train.*`, `val.*`)
    pub logged_metrics: Metrics,
    /// Reduced pipeline-validation run
    pub sanity_checking: bool,
    /// One-epoch dry run without checkpointing
    pub fast_dev_run: bool,
    /// Directory the checkpoint callback writes to
    pub checkpoint_dir: PathBuf,
    /// Best checkpoint so far
    pub best_model_path: Option<PathBuf>,
    /// Learning-rate history per optimizer (`lr-<name>`)
    pub learning_rates: BTreeMap<String, Vec<f64>>,
    /// Training duration in seconds
    pub elapsed_secs: f64,
}

impl CallbackContext {
    /// Whether any validation metric was logged.
    #[must_use]
    pub fn has_validation_metrics(&self) -> bool {
        self.logged_metrics.keys().any(|k| k.starts_with("val"))
    }
}

/// Trait for training callbacks
///
/// All methods have default no-op implementations. A returned error stops
/// training and surfaces from [`super::Trainer::fit`].
pub trait TrainerCallback: Send {
    /// Called once when the trainer is set up, before anything runs
    fn on_init_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called with the model's hyperparameters after init
    fn on_hyperparams(&mut self, _ctx: &CallbackContext, _hparams: &Value) -> Result<()> {
        Ok(())
    }

    /// Called before training starts
    fn on_train_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called before each epoch
    fn on_epoch_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called after each epoch, once train and validation metrics are logged
    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called after training ends
    fn on_train_end(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Get callback name for logging
    fn name(&self) -> &'static str {
        "TrainerCallback"
    }
}
