//! Epoch loop and callback dispatch

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::callback::{CallbackContext, TrainerCallback};
use super::checkpoint::{ModelCheckpoint, MonitorMode};
use super::lr_monitor::LearningRateMonitor;
use crate::model::{prefixed, Dataset, Metrics, Model};
use crate::{Error, Result};

/// Trainer options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Epochs for a full run
    pub max_epochs: usize,
    /// Validate every n epochs (the last epoch always validates)
    pub check_val_every_n_epoch: usize,
    /// One epoch, no checkpoint, no upload
    pub fast_dev_run: bool,
    /// Reduced run recorded in the sanity-check collection
    pub sanity_check: bool,
    /// Sample cap per split for sanity-check runs
    pub sanity_samples: usize,
    /// Run directory; checkpoints go to `<output_dir>/checkpoints`
    pub output_dir: PathBuf,
    /// Metric the checkpoint callback monitors
    pub monitor: String,
    /// Whether the monitored metric is minimized or maximized
    pub mode: MonitorMode,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            check_val_every_n_epoch: 1,
            fast_dev_run: false,
            sanity_check: false,
            sanity_samples: 64,
            output_dir: PathBuf::from("runs"),
            monitor: "val.acc".to_string(),
            mode: MonitorMode::Max,
        }
    }
}

impl TrainerConfig {
    /// Checkpoint directory
    #[must_use]
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_dir.join("checkpoints")
    }

    /// Epochs this configuration will actually run
    #[must_use]
    pub fn effective_epochs(&self) -> usize {
        if self.fast_dev_run || self.sanity_check {
            1
        } else {
            self.max_epochs
        }
    }

    /// Check ranges.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(Error::Config("max_epochs must be positive".to_string()));
        }
        if self.check_val_every_n_epoch == 0 {
            return Err(Error::Config(
                "check_val_every_n_epoch must be positive".to_string(),
            ));
        }
        if self.sanity_check && self.sanity_samples == 0 {
            return Err(Error::Config("sanity_samples must be positive".to_string()));
        }
        Ok(())
    }
}

/// Result of [`Trainer::fit`].
#[derive(Debug, Clone, Default)]
pub struct FitSummary {
    /// Epochs run
    pub epochs: usize,
    /// Best checkpoint written
    pub best_model_path: Option<PathBuf>,
    /// Monitored value of the best checkpoint
    pub best_model_score: Option<f64>,
    /// Metrics logged in the last epoch
    pub last_metrics: Metrics,
    /// Wall-clock training time
    pub duration_secs: f64,
}

/// Drives a [`Model`] through its epochs and notifies callbacks.
///
/// Checkpointing and learning-rate monitoring are built in; everything else
/// (the experiment logger) is passed to [`Trainer::fit`].
#[derive(Debug)]
pub struct Trainer {
    config: TrainerConfig,
    checkpoint: ModelCheckpoint,
    lr_monitor: LearningRateMonitor,
}

impl Trainer {
    /// Create a trainer.
    ///
    /// # Errors
    ///
    /// Invalid configuration.
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        let checkpoint = ModelCheckpoint::new(
            config.checkpoint_dir(),
            config.monitor.clone(),
            config.mode,
        )
        .enabled(!config.fast_dev_run);
        Ok(Self {
            config,
            checkpoint,
            lr_monitor: LearningRateMonitor::new(),
        })
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Checkpoint callback state
    #[must_use]
    pub const fn checkpoint(&self) -> &ModelCheckpoint {
        &self.checkpoint
    }

    /// Learning-rate history
    #[must_use]
    pub const fn lr_monitor(&self) -> &LearningRateMonitor {
        &self.lr_monitor
    }

    fn context(&self, epoch: usize, metrics: &Metrics, started: Option<Instant>) -> CallbackContext {
        CallbackContext {
            epoch,
            max_epochs: self.config.effective_epochs(),
            logged_metrics: metrics.clone(),
            sanity_checking: self.config.sanity_check,
            fast_dev_run: self.config.fast_dev_run,
            checkpoint_dir: self.checkpoint.dirpath().to_path_buf(),
            best_model_path: self.checkpoint.best_model_path().map(Into::into),
            learning_rates: self.lr_monitor.lrs().clone(),
            elapsed_secs: started.map_or(0.0, |s| s.elapsed().as_secs_f64()),
        }
    }

    fn validates_after(&self, epoch: usize, epochs: usize) -> bool {
        (epoch + 1) % self.config.check_val_every_n_epoch == 0 || epoch + 1 == epochs
    }

    /// Train `model` on `train`, validating on `val`.
    ///
    /// Each call is a separate run: the best checkpoint and learning-rate
    /// history of an earlier call are not carried over.
    ///
    /// Callbacks run in slice order for every event. The first callback
    /// error stops training and is returned.
    ///
    /// # Errors
    ///
    /// Model, checkpoint and callback failures.
    pub fn fit<M: Model + ?Sized>(
        &mut self,
        model: &mut M,
        train: &Dataset,
        val: &Dataset,
        callbacks: &mut [&mut dyn TrainerCallback],
    ) -> Result<FitSummary> {
        let (train, val) = if self.config.sanity_check {
            (
                train.head(self.config.sanity_samples),
                val.head(self.config.sanity_samples),
            )
        } else {
            (train.clone(), val.clone())
        };
        self.checkpoint.reset();
        self.lr_monitor = LearningRateMonitor::new();
        let epochs = self.config.effective_epochs();
        let mut metrics = Metrics::new();

        let ctx = self.context(0, &metrics, None);
        dispatch(callbacks, |cb| cb.on_init_start(&ctx))?;
        let hparams = model.hparams();
        dispatch(callbacks, |cb| cb.on_hyperparams(&ctx, &hparams))?;

        info!(
            model = model.name(),
            epochs,
            train_samples = train.len(),
            val_samples = val.len(),
            fast_dev_run = self.config.fast_dev_run,
            sanity_check = self.config.sanity_check,
            "training started"
        );
        let started = Instant::now();
        dispatch(callbacks, |cb| cb.on_train_start(&ctx))?;

        for epoch in 0..epochs {
            metrics.clear();
            let ctx = self.context(epoch, &metrics, Some(started));
            dispatch(callbacks, |cb| cb.on_epoch_start(&ctx))?;

            metrics.extend(prefixed(&model.train_epoch(&train)?, "train"));
            if self.validates_after(epoch, epochs) {
                metrics.extend(prefixed(&model.evaluate(&val)?, "val"));
            }

            self.checkpoint
                .update(epoch, &metrics, || model.state_bytes())?;
            self.lr_monitor
                .record(model.optimizer_name(), model.learning_rate());
            model.step_scheduler();

            info!(epoch, metrics = ?metrics, "epoch finished");
            let ctx = self.context(epoch, &metrics, Some(started));
            dispatch(callbacks, |cb| cb.on_epoch_end(&ctx))?;
        }

        let ctx = self.context(epochs.saturating_sub(1), &metrics, Some(started));
        dispatch(callbacks, |cb| cb.on_train_end(&ctx))?;

        Ok(FitSummary {
            epochs,
            best_model_path: self.checkpoint.best_model_path().map(Into::into),
            best_model_score: self.checkpoint.best_model_score(),
            last_metrics: metrics,
            duration_secs: ctx.elapsed_secs,
        })
    }

    /// Evaluate `model` on `data`; metrics are prefixed `test.`.
    ///
    /// # Errors
    ///
    /// Returns error if `data` does not fit the model.
    pub fn test<M: Model + ?Sized>(&self, model: &M, data: &Dataset) -> Result<Metrics> {
        let metrics = prefixed(&model.evaluate(data)?, "test");
        info!(model = model.name(), samples = data.len(), metrics = ?metrics, "test finished");
        Ok(metrics)
    }
}

fn dispatch<F>(callbacks: &mut [&mut dyn TrainerCallback], mut event: F) -> Result<()>
where
    F: FnMut(&mut dyn TrainerCallback) -> Result<()>,
{
    for cb in callbacks.iter_mut() {
        event(&mut **cb).inspect_err(|e| debug!(callback = cb.name(), error = %e, "callback failed"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classifier, ClassifierConfig};
    use serde_json::Value;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn push(&mut self, event: &str) -> Result<()> {
            self.events.push(event.to_string());
            if self.fail_on == Some(event) {
                return Err(Error::StorageError("boom".to_string()));
            }
            Ok(())
        }
    }

    impl TrainerCallback for Recorder {
        fn on_init_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
            self.push("init")
        }
        fn on_hyperparams(&mut self, _ctx: &CallbackContext, _h: &Value) -> Result<()> {
            self.push("hparams")
        }
        fn on_train_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
            self.push("train_start")
        }
        fn on_epoch_start(&mut self, ctx: &CallbackContext) -> Result<()> {
            self.push(&format!("epoch_start:{}", ctx.epoch))
        }
        fn on_epoch_end(&mut self, ctx: &CallbackContext) -> Result<()> {
            let tag = if ctx.has_validation_metrics() { "val" } else { "noval" };
            self.push(&format!("epoch_end:{}:{tag}", ctx.epoch))
        }
        fn on_train_end(&mut self, _ctx: &CallbackContext) -> Result<()> {
            self.push("train_end")
        }
    }

    fn setup(config: TrainerConfig) -> (Trainer, Classifier, Dataset) {
        let data = Dataset::synthetic(60, 4, 3, 2);
        let model = Classifier::new(ClassifierConfig {
            in_features: 4,
            output_size: 3,
            ..ClassifierConfig::default()
        })
        .unwrap();
        (Trainer::new(config).unwrap(), model, data)
    }

    #[test]
    fn test_event_order() {
        let dir = TempDir::new().unwrap();
        let (mut trainer, mut model, data) = setup(TrainerConfig {
            max_epochs: 3,
            check_val_every_n_epoch: 2,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        });
        let mut rec = Recorder::default();
        let summary = trainer.fit(&mut model, &data, &data, &mut [&mut rec]).unwrap();

        assert_eq!(
            rec.events,
            [
                "init",
                "hparams",
                "train_start",
                "epoch_start:0",
                "epoch_end:0:noval",
                "epoch_start:1",
                "epoch_end:1:val",
                "epoch_start:2",
                "epoch_end:2:val",
                "train_end",
            ]
        );
        assert_eq!(summary.epochs, 3);
        assert!(summary.best_model_path.unwrap().exists());
        assert_eq!(trainer.lr_monitor().lrs()["lr-SGD"].len(), 3);
    }

    #[test]
    fn test_second_fit_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let (mut trainer, mut model, data) = setup(TrainerConfig {
            max_epochs: 3,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        });
        trainer.fit(&mut model, &data, &data, &mut []).unwrap();

        let mut stalled = Classifier::new(ClassifierConfig {
            in_features: 4,
            output_size: 3,
            lr: 1e-9,
            seed: 9,
            ..ClassifierConfig::default()
        })
        .unwrap();
        let summary = trainer.fit(&mut stalled, &data, &data, &mut []).unwrap();

        assert_eq!(trainer.lr_monitor().lrs()["lr-SGD"].len(), 3);
        let best = summary.best_model_path.unwrap();
        let saved = Classifier::from_state_bytes(&std::fs::read(&best).unwrap()).unwrap();
        assert!(saved.learning_rate() < 1e-6);
        assert_eq!(saved.config().seed, 9);
    }

    #[test]
    fn test_fast_dev_run() {
        let dir = TempDir::new().unwrap();
        let (mut trainer, mut model, data) = setup(TrainerConfig {
            fast_dev_run: true,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        });
        let summary = trainer.fit(&mut model, &data, &data, &mut []).unwrap();
        assert_eq!(summary.epochs, 1);
        assert!(summary.best_model_path.is_none());
        assert!(!trainer.config().checkpoint_dir().exists());
    }

    #[test]
    fn test_sanity_check_caps_samples() {
        let dir = TempDir::new().unwrap();
        let (mut trainer, mut model, data) = setup(TrainerConfig {
            sanity_check: true,
            sanity_samples: 5,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        });
        let summary = trainer.fit(&mut model, &data, &data, &mut []).unwrap();
        assert_eq!(summary.epochs, 1);
        assert!(summary.last_metrics.contains_key("val.acc"));
    }

    #[test]
    fn test_callback_error_aborts() {
        let dir = TempDir::new().unwrap();
        let (mut trainer, mut model, data) = setup(TrainerConfig {
            max_epochs: 5,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        });
        let mut rec = Recorder {
            fail_on: Some("epoch_start:1"),
            ..Recorder::default()
        };
        let err = trainer
            .fit(&mut model, &data, &data, &mut [&mut rec])
            .unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
        assert_eq!(rec.events.last().map(String::as_str), Some("epoch_start:1"));
    }

    #[test]
    fn test_test_prefixes_metrics() {
        let (trainer, model, data) = setup(TrainerConfig::default());
        let metrics = trainer.test(&model, &data).unwrap();
        assert!(metrics.keys().all(|k| k.starts_with("test.")));
        assert!(metrics.contains_key("test.acc"));
    }

    #[test]
    fn test_invalid_config() {
        let config = TrainerConfig {
            check_val_every_n_epoch: 0,
            ..TrainerConfig::default()
        };
        assert!(matches!(Trainer::new(config), Err(Error::Config(_))));
    }
}
