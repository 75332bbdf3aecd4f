//! Experiment Record - one training run's configuration, metrics and artifacts

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;
use crate::{Error, Result};

/// Train and eval metrics of one epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpochResult {
    /// Training metrics, `train.` prefix stripped
    pub train_results: BTreeMap<String, f64>,
    /// Validation metrics, `val.` prefix stripped
    pub eval_results: BTreeMap<String, f64>,
    /// Wall-clock seconds spent in the epoch
    pub epoch_time: f64,
}

impl EpochResult {
    /// Eval metric by name.
    #[must_use]
    pub fn eval(&self, key: &str) -> Option<f64> {
        self.eval_results.get(key).copied()
    }

    /// Train metric by name.
    #[must_use]
    pub fn train(&self, key: &str) -> Option<f64> {
        self.train_results.get(key).copied()
    }
}

/// Typed view of an experiment document.
///
/// The store keeps documents schemaless; this view reads the fields the
/// training logger writes. Only the skeleton fields are mandatory, since a
/// record is updated incrementally while training runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    #[serde(rename = "_id")]
    experiment_id: String,
    checkpoints_path: String,
    #[serde(default)]
    epoch_results: BTreeMap<u64, EpochResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    experiment_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    learning_rates: BTreeMap<String, Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trained_model_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<Value>,
}

impl ExperimentRecord {
    /// Create the skeleton record written when training starts.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Unique id of the run
    /// * `checkpoints_path` - Directory the checkpoint callback writes to
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, checkpoints_path: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            checkpoints_path: checkpoints_path.into(),
            epoch_results: BTreeMap::new(),
            experiment_duration: None,
            learning_rates: BTreeMap::new(),
            trained_model_path: None,
            config: None,
        }
    }

    /// Parse a stored document.
    ///
    /// # Errors
    ///
    /// Returns error if the skeleton fields are missing or mistyped.
    pub fn from_document(document: Document) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }

    /// Serialize into a document.
    ///
    /// # Errors
    ///
    /// Returns error if serialization does not produce an object.
    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::Other(format!("record serialized to {other}"))),
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the checkpoint directory.
    #[must_use]
    pub fn checkpoints_path(&self) -> &str {
        &self.checkpoints_path
    }

    /// Get per-epoch results, ordered by epoch.
    #[must_use]
    pub const fn epoch_results(&self) -> &BTreeMap<u64, EpochResult> {
        &self.epoch_results
    }

    /// Get the total training duration in seconds, once training ended.
    #[must_use]
    pub const fn experiment_duration(&self) -> Option<f64> {
        self.experiment_duration
    }

    /// Get the learning-rate history per optimizer.
    #[must_use]
    pub const fn learning_rates(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.learning_rates
    }

    /// Get the best checkpoint path, once training ended.
    #[must_use]
    pub fn trained_model_path(&self) -> Option<&str> {
        self.trained_model_path.as_deref()
    }

    /// Get the submitted hyperparameters, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Epoch whose eval metric `key` is best (`maximize` selects the direction).
    #[must_use]
    pub fn best_epoch(&self, key: &str, maximize: bool) -> Option<(u64, f64)> {
        self.epoch_results
            .iter()
            .filter_map(|(epoch, result)| result.eval(key).map(|v| (*epoch, v)))
            .reduce(|best, candidate| {
                let better = if maximize {
                    candidate.1 > best.1
                } else {
                    candidate.1 < best.1
                };
                if better {
                    candidate
                } else {
                    best
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_skeleton_document() {
        let record = ExperimentRecord::new("id-1", "/runs/ckpt");
        let doc = record.to_document().unwrap();
        assert_eq!(
            Value::Object(doc),
            json!({"_id": "id-1", "checkpoints_path": "/runs/ckpt", "epoch_results": {}})
        );
    }

    #[test]
    fn test_from_full_document() {
        let doc = json!({
            "_id": "id-1",
            "checkpoints_path": "/runs/ckpt",
            "epoch_results": {
                "0": {"train_results": {"loss": 1.0}, "eval_results": {"acc": 0.5}, "epoch_time": 2.0},
                "10": {"train_results": {"loss": 0.2}, "eval_results": {"acc": 0.9}, "epoch_time": 2.5},
                "2": {"train_results": {"loss": 0.5}, "eval_results": {"acc": 0.7}, "epoch_time": 2.1}
            },
            "experiment_duration": 12.5,
            "learning_rates": {"lr-SGD": [0.1, 0.09]},
            "trained_model_path": "/runs/ckpt/epoch_010.ckpt",
            "config": {"lr": 0.1}
        });
        let Value::Object(map) = doc else { unreachable!() };
        let record = ExperimentRecord::from_document(map).unwrap();

        let epochs: Vec<u64> = record.epoch_results().keys().copied().collect();
        assert_eq!(epochs, vec![0, 2, 10]);
        assert_eq!(record.experiment_duration(), Some(12.5));
        assert_eq!(record.learning_rates()["lr-SGD"], vec![0.1, 0.09]);
        assert_eq!(record.trained_model_path(), Some("/runs/ckpt/epoch_010.ckpt"));
        assert_eq!(record.config(), Some(&json!({"lr": 0.1})));
        assert_eq!(record.best_epoch("acc", true), Some((10, 0.9)));
        assert_eq!(record.best_epoch("acc", false), Some((0, 0.5)));
        assert_eq!(record.best_epoch("missing", true), None);
    }

    #[test]
    fn test_missing_skeleton_field_fails() {
        let Value::Object(map) = json!({"_id": "id-1"}) else { unreachable!() };
        assert!(ExperimentRecord::from_document(map).is_err());
    }
}
