//! Train and test entrypoints
//!
//! `train` builds the experiment database, datasets, model and trainer, runs
//! the fit with a [`DbLogger`] attached and optionally evaluates the best
//! checkpoint. `test` loads a checkpoint from disk or from the blob store and
//! evaluates it.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::experiment::ExperimentDb;
use crate::model::{Classifier, ClassifierConfig, Dataset, Metrics, Model};
use crate::train::{DbLogger, FitSummary, Trainer, TrainerConfig};
use crate::{Error, Result};

/// Where samples come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Seeded synthetic blobs
    Synthetic {
        /// Sample count
        samples: usize,
        /// Feature width
        features: usize,
        /// Class count
        classes: usize,
        /// Generator seed
        seed: u64,
    },
    /// JSON-lines file of `{"features": [..], "label": n}`
    Jsonl(PathBuf),
}

impl Default for DataSource {
    fn default() -> Self {
        Self::Synthetic {
            samples: 512,
            features: 16,
            classes: 10,
            seed: 7,
        }
    }
}

impl DataSource {
    /// Materialize the dataset.
    ///
    /// # Errors
    ///
    /// Read and parse failures for files.
    pub fn load(&self) -> Result<Dataset> {
        match self {
            Self::Synthetic {
                samples,
                features,
                classes,
                seed,
            } => Ok(Dataset::synthetic(*samples, *features, *classes, *seed)),
            Self::Jsonl(path) => Dataset::from_jsonl(path),
        }
    }
}

/// Options for [`train`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Trainer behavior
    pub trainer: TrainerConfig,
    /// Model hyperparameters; `in_features` is taken from the data
    pub model: ClassifierConfig,
    /// Training data, split into train and held-out parts
    pub data: DataSource,
    /// Held-out fraction
    pub val_fraction: f64,
    /// Split seed
    pub split_seed: u64,
    /// Evaluate the best checkpoint on the held-out split after fitting
    pub run_test: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            trainer: TrainerConfig::default(),
            model: ClassifierConfig::default(),
            data: DataSource::default(),
            val_fraction: 0.2,
            split_seed: 0,
            run_test: true,
        }
    }
}

/// Result of [`train`].
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    /// Experiment record id
    pub experiment_id: String,
    /// Fit summary
    pub fit: FitSummary,
    /// `test.` metrics of the best checkpoint, when requested and available
    pub test_metrics: Option<Metrics>,
}

/// Which checkpoint [`test`] evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Local checkpoint file
    Path(PathBuf),
    /// Blob stored under this experiment id
    Experiment(String),
    /// Most recently stored blob
    Latest,
}

/// Options for [`test`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
    /// Checkpoint to evaluate
    pub checkpoint: CheckpointSource,
    /// Evaluation data
    pub data: DataSource,
    /// Where downloaded checkpoints are written
    pub download_dir: PathBuf,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointSource::Latest,
            data: DataSource::default(),
            download_dir: PathBuf::from("runs/downloads"),
        }
    }
}

/// Connect to `store` and run [`train_with_db`].
///
/// # Errors
///
/// See [`train_with_db`].
pub fn train(options: &TrainOptions, store: &StoreConfig) -> Result<TrainOutcome> {
    let db = Arc::new(ExperimentDb::connect(store.clone())?);
    train_with_db(options, db)
}

/// Fit a classifier with experiment tracking in `db`.
///
/// # Errors
///
/// Invalid options, data errors and any storage failure during the run.
pub fn train_with_db(options: &TrainOptions, db: Arc<ExperimentDb>) -> Result<TrainOutcome> {
    let data = options.data.load()?;
    if data.len() < 2 {
        return Err(Error::Data(format!(
            "need at least 2 samples to split, got {}",
            data.len()
        )));
    }
    let (train_set, val_set) = data.split(options.val_fraction, options.split_seed);

    let mut model = Classifier::new(ClassifierConfig {
        in_features: data.num_features(),
        output_size: options.model.output_size.max(data.num_classes()),
        ..options.model.clone()
    })?;
    if model.config().output_size != options.model.output_size {
        warn!(
            requested = options.model.output_size,
            classes = data.num_classes(),
            "output_size widened to fit the labels"
        );
    }

    let mut trainer = Trainer::new(options.trainer.clone())?;
    let mut logger = DbLogger::new(Arc::clone(&db));
    let fit = trainer.fit(&mut model, &train_set, &val_set, &mut [&mut logger])?;
    let experiment_id = logger
        .experiment_id()
        .map(ToString::to_string)
        .ok_or(Error::ExperimentNotStarted)?;

    let test_metrics = match (&fit.best_model_path, options.run_test) {
        (Some(path), true) => {
            let best = Classifier::from_state_bytes(&std::fs::read(path)?)?;
            Some(trainer.test(&best, &val_set)?)
        }
        _ => None,
    };

    info!(
        experiment_id = %experiment_id,
        epochs = fit.epochs,
        best_score = ?fit.best_model_score,
        "training run complete"
    );
    Ok(TrainOutcome {
        experiment_id,
        fit,
        test_metrics,
    })
}

/// Connect to `store` and run [`test_with_db`].
///
/// # Errors
///
/// See [`test_with_db`].
pub fn test(options: &TestOptions, store: &StoreConfig) -> Result<Metrics> {
    let db = ExperimentDb::connect(store.clone())?;
    test_with_db(options, &db)
}

/// Evaluate a stored or local checkpoint; returns `test.` metrics.
///
/// # Errors
///
/// Missing checkpoints, shape mismatches and data errors.
pub fn test_with_db(options: &TestOptions, db: &ExperimentDb) -> Result<Metrics> {
    let path = match &options.checkpoint {
        CheckpointSource::Path(path) => path.clone(),
        CheckpointSource::Experiment(id) => {
            let dest = options.download_dir.join(format!("{id}.ckpt"));
            db.load_checkpoint(&dest, Some(id))?;
            dest
        }
        CheckpointSource::Latest => {
            let dest = options.download_dir.join("latest.ckpt");
            let info = db.load_checkpoint(&dest, None)?;
            info!(experiment_id = info.id(), "latest checkpoint downloaded");
            dest
        }
    };

    let model = Classifier::from_state_bytes(&std::fs::read(&path)?)?;
    let data = options.data.load()?;
    info!(checkpoint = %path.display(), model = model.name(), "evaluating checkpoint");
    Trainer::new(TrainerConfig::default())?.test(&model, &data)
}
