//! Experiment Tracking
//!
//! One record per training run, plus the run's best checkpoint as a blob
//! keyed by the same id.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord { _id, checkpoints_path, config, learning_rates,
//!                    experiment_duration, trained_model_path,
//!                    epoch_results: { "<epoch>": EpochResult } }
//!        │
//!        └── checkpoint blob (<bucket>.files/_id == ExperimentRecord._id)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::path::Path;
//! use dl_tracker::experiment::{ExperimentDb, ExperimentId};
//! use serde_json::json;
//!
//! # fn main() -> dl_tracker::Result<()> {
//! let db = ExperimentDb::in_memory();
//! let id = ExperimentId::now();
//!
//! db.setup_experiment_entry(Path::new("runs/checkpoints"), id.as_str(), false)?;
//! db.set_field(id.as_str(), "config", json!({"lr": 0.01}), false)?;
//!
//! let record = db.find_experiment(id.as_str(), false)?.expect("record");
//! assert_eq!(record.config(), Some(&json!({"lr": 0.01})));
//! # Ok(())
//! # }
//! ```

mod db;
mod experiment_record;
mod id;

pub use db::ExperimentDb;
pub use experiment_record::{EpochResult, ExperimentRecord};
pub use id::{to_hms, ExperimentId, ID_FORMAT};
