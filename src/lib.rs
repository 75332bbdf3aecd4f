//! # dl-tracker: Experiment Tracking for Training Runs
//!
//! **Version**: 0.1.0
//!
//! dl-tracker records every training run in a document database and keeps the
//! run's best checkpoint in a chunked blob store, keyed by the same
//! timestamp-derived experiment id.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Genchi Genbutsu**: Every epoch with validation results lands in the record
//! - **Poka-Yoke safety**: Duplicate ids and corrupt blobs are errors, not surprises
//! - **Jidoka**: Storage failures stop the run instead of silently losing data
//!
//! ## Layout
//!
//! - [`store`]: document backends (memory, file, MongoDB)
//! - [`blob`]: GridFS-style chunked checkpoint storage
//! - [`experiment`]: experiment records and the database facade
//! - [`train`]: trainer, callbacks and the [`train::DbLogger`]
//! - [`model`]: the classifier and datasets it trains on
//! - [`pipeline`]: train and test entrypoints
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dl_tracker::config::StoreConfig;
//! use dl_tracker::pipeline::{self, TrainOptions};
//!
//! // Connection string from MONGODB_CONNECTION_STR
//! let store = StoreConfig::from_env()?;
//! let outcome = pipeline::train(&TrainOptions::default(), &store)?;
//! println!("experiment {}", outcome.experiment_id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod blob;
pub mod config;
pub mod error;
pub mod experiment;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod train;

pub use error::{Error, Result};
