//! Experiment-database logging callback

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::callback::{CallbackContext, TrainerCallback};
use crate::experiment::{to_hms, ExperimentDb, ExperimentId};
use crate::model::Metrics;
use crate::store::Document;
use crate::{Error, Result};

/// Writes one experiment record per run and uploads its best checkpoint.
///
/// - init: generates the id and creates `{_id, checkpoints_path, epoch_results: {}}`
/// - hyperparams: merges `config`
/// - epoch end: merges `epoch_results.<epoch>` when validation ran
/// - train end: merges duration, learning rates and the trained model path,
///   then uploads the checkpoint (skipped for fast dev runs)
///
/// Sanity-check runs go to the sanity collection.
pub struct DbLogger {
    db: Arc<ExperimentDb>,
    experiment_id: Option<ExperimentId>,
    sanity_check: bool,
    train_started: Option<Instant>,
    epoch_started: Option<Instant>,
}

impl DbLogger {
    /// Create a logger writing to `db`
    #[must_use]
    pub const fn new(db: Arc<ExperimentDb>) -> Self {
        Self {
            db,
            experiment_id: None,
            sanity_check: false,
            train_started: None,
            epoch_started: None,
        }
    }

    /// Id of the current run, once `on_init_start` ran
    #[must_use]
    pub const fn experiment_id(&self) -> Option<&ExperimentId> {
        self.experiment_id.as_ref()
    }

    /// Shared database handle
    #[must_use]
    pub fn db(&self) -> &Arc<ExperimentDb> {
        &self.db
    }

    fn id(&self) -> Result<&str> {
        self.experiment_id
            .as_ref()
            .map(ExperimentId::as_str)
            .ok_or(Error::ExperimentNotStarted)
    }

    fn merge(&self, fields: Document) -> Result<()> {
        let id = self.id()?;
        if !self.db.insert_dict(id, fields, self.sanity_check)? {
            warn!(experiment_id = id, "experiment record missing, update dropped");
        }
        Ok(())
    }
}

/// Keys starting with `prefix`, with a leading `<prefix>.` removed.
///
/// `val.acc` becomes `acc`; `val_acc` is kept as is. Non-finite values
/// cannot be stored.
fn strip_prefixed(metrics: &Metrics, prefix: &str) -> BTreeMap<String, f64> {
    let dotted = format!("{prefix}.");
    metrics
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .filter_map(|(key, &value)| {
            let name = key.strip_prefix(&dotted).unwrap_or(key);
            if value.is_finite() {
                Some((name.to_string(), value))
            } else {
                warn!(metric = %key, value, "non-finite metric not logged");
                None
            }
        })
        .collect()
}

impl TrainerCallback for DbLogger {
    fn on_init_start(&mut self, ctx: &CallbackContext) -> Result<()> {
        let id = ExperimentId::now();
        self.sanity_check = ctx.sanity_checking;
        self.db
            .setup_experiment_entry(&ctx.checkpoint_dir, id.as_str(), self.sanity_check)?;
        info!(experiment_id = %id, sanity_check = self.sanity_check, "experiment started");
        self.experiment_id = Some(id);
        Ok(())
    }

    fn on_hyperparams(&mut self, _ctx: &CallbackContext, hparams: &Value) -> Result<()> {
        let mut fields = Document::new();
        fields.insert("config".to_string(), hparams.clone());
        self.merge(fields)
    }

    fn on_train_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
        self.train_started = Some(Instant::now());
        Ok(())
    }

    fn on_epoch_start(&mut self, _ctx: &CallbackContext) -> Result<()> {
        self.epoch_started = Some(Instant::now());
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> Result<()> {
        if !ctx.has_validation_metrics() {
            return Ok(());
        }
        let epoch_time = self
            .epoch_started
            .map_or(0.0, |start| start.elapsed().as_secs_f64());
        let result = json!({
            "train_results": strip_prefixed(&ctx.logged_metrics, "train"),
            "eval_results": strip_prefixed(&ctx.logged_metrics, "val"),
            "epoch_time": epoch_time,
        });

        let mut fields = Document::new();
        fields.insert(format!("epoch_results.{}", ctx.epoch), result);
        self.merge(fields)
    }

    fn on_train_end(&mut self, ctx: &CallbackContext) -> Result<()> {
        let duration = self
            .train_started
            .map_or(ctx.elapsed_secs, |start| start.elapsed().as_secs_f64());
        info!("Execution finished in: {}", to_hms(duration));

        let mut fields = Document::new();
        fields.insert("experiment_duration".to_string(), json!(duration));
        fields.insert(
            "learning_rates".to_string(),
            serde_json::to_value(&ctx.learning_rates)?,
        );
        let model_path = ctx
            .best_model_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        fields.insert("trained_model_path".to_string(), json!(model_path));
        self.merge(fields)?;

        if ctx.fast_dev_run {
            return Ok(());
        }
        let id = self.id()?;
        match &ctx.best_model_path {
            Some(path) => {
                if let Some(info) = self.db.save_checkpoint(id, path)? {
                    info!(
                        experiment_id = id,
                        bytes = info.length(),
                        chunks = info.chunk_count(),
                        "checkpoint uploaded"
                    );
                }
            }
            None => warn!(experiment_id = id, "no checkpoint was written, nothing uploaded"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DbLogger"
    }
}
