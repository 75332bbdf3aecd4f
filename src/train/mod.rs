//! Training loop with experiment tracking
//!
//! [`Trainer`] runs the epochs and owns the built-in [`ModelCheckpoint`] and
//! [`LearningRateMonitor`]; callbacks such as [`DbLogger`] observe it
//! through [`TrainerCallback`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dl_tracker::experiment::ExperimentDb;
//! use dl_tracker::model::{Classifier, ClassifierConfig, Dataset};
//! use dl_tracker::train::{DbLogger, Trainer, TrainerConfig};
//!
//! # fn main() -> dl_tracker::Result<()> {
//! let data = Dataset::synthetic(40, 4, 2, 0);
//! let mut model = Classifier::new(ClassifierConfig {
//!     in_features: 4,
//!     output_size: 2,
//!     ..ClassifierConfig::default()
//! })?;
//! let db = Arc::new(ExperimentDb::in_memory());
//! let mut logger = DbLogger::new(Arc::clone(&db));
//!
//! let mut trainer = Trainer::new(TrainerConfig {
//!     fast_dev_run: true,
//!     ..TrainerConfig::default()
//! })?;
//! trainer.fit(&mut model, &data, &data, &mut [&mut logger])?;
//!
//! let id = logger.experiment_id().expect("started").as_str();
//! let record = db.find_experiment(id, false)?.expect("record");
//! assert_eq!(record.epoch_results().len(), 1);
//! # Ok(())
//! # }
//! ```

mod callback;
mod checkpoint;
mod db_logger;
mod lr_monitor;
mod trainer;

pub use callback::{CallbackContext, TrainerCallback};
pub use checkpoint::{ModelCheckpoint, MonitorMode};
pub use db_logger::DbLogger;
pub use lr_monitor::LearningRateMonitor;
pub use trainer::{FitSummary, Trainer, TrainerConfig};
