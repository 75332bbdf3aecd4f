//! Best-checkpoint tracking

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::Metrics;
use crate::{Error, Result};

/// Whether a lower or higher monitored value is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Lower is better (losses)
    Min,
    /// Higher is better (accuracy)
    #[default]
    Max,
}

impl MonitorMode {
    /// Whether `candidate` beats `best`.
    #[must_use]
    pub fn improves(self, candidate: f64, best: Option<f64>) -> bool {
        if !candidate.is_finite() {
            return false;
        }
        match (self, best) {
            (_, None) => true,
            (Self::Min, Some(best)) => candidate < best,
            (Self::Max, Some(best)) => candidate > best,
        }
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Min => "min",
            Self::Max => "max",
        })
    }
}

impl FromStr for MonitorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(Error::Config(format!("monitor mode must be min or max, got '{other}'"))),
        }
    }
}

/// Keeps the single best checkpoint of a run on disk.
///
/// After each epoch the monitored metric is compared with the best so far;
/// on improvement the model state is written to `epoch_NNN.ckpt` and the
/// previous best file is removed.
#[derive(Clone, Debug)]
pub struct ModelCheckpoint {
    dirpath: PathBuf,
    monitor: String,
    mode: MonitorMode,
    enabled: bool,
    best_model_path: Option<PathBuf>,
    best_model_score: Option<f64>,
}

impl ModelCheckpoint {
    /// Create checkpoint tracking saving to `dirpath`
    #[must_use]
    pub fn new(dirpath: impl Into<PathBuf>, monitor: impl Into<String>, mode: MonitorMode) -> Self {
        Self {
            dirpath: dirpath.into(),
            monitor: monitor.into(),
            mode,
            enabled: true,
            best_model_path: None,
            best_model_score: None,
        }
    }

    /// Turn saving on or off (fast dev runs save nothing).
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checkpoint directory
    #[must_use]
    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    /// Monitored metric name
    #[must_use]
    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    /// Best checkpoint written so far
    #[must_use]
    pub fn best_model_path(&self) -> Option<&Path> {
        self.best_model_path.as_deref()
    }

    /// Monitored value of the best checkpoint
    #[must_use]
    pub const fn best_model_score(&self) -> Option<f64> {
        self.best_model_score
    }

    /// Forget the best checkpoint so the next run starts from scratch.
    ///
    /// Files already written stay on disk.
    pub fn reset(&mut self) {
        self.best_model_path = None;
        self.best_model_score = None;
    }

    /// Checkpoint path for epoch
    #[must_use]
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.dirpath.join(format!("epoch_{epoch:03}.ckpt"))
    }

    /// Save a new best checkpoint if `metrics` improves the monitored value.
    ///
    /// `state` is only called when something is written. Returns whether a
    /// checkpoint was saved.
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be produced or written.
    pub fn update<F>(&mut self, epoch: usize, metrics: &Metrics, state: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if !self.enabled {
            return Ok(false);
        }
        let Some(&value) = metrics.get(&self.monitor) else {
            debug!(monitor = %self.monitor, epoch, "monitored metric not logged, no checkpoint");
            return Ok(false);
        };
        if !self.mode.improves(value, self.best_model_score) {
            return Ok(false);
        }

        fs::create_dir_all(&self.dirpath)?;
        let path = self.checkpoint_path(epoch);
        fs::write(&path, state()?)?;

        if let Some(previous) = self.best_model_path.replace(path.clone()) {
            if previous != path {
                if let Err(e) = fs::remove_file(&previous) {
                    warn!(
                        path = %previous.display(),
                        error = %e,
                        "could not remove previous checkpoint"
                    );
                }
            }
        }
        self.best_model_score = Some(value);
        info!(
            epoch,
            monitor = %self.monitor,
            value,
            path = %path.display(),
            "new best checkpoint"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(acc: f64) -> Metrics {
        let mut m = Metrics::new();
        m.insert("val.acc".to_string(), acc);
        m
    }

    #[test]
    fn test_monitor_mode() {
        assert!(MonitorMode::Max.improves(0.5, None));
        assert!(MonitorMode::Max.improves(0.6, Some(0.5)));
        assert!(!MonitorMode::Max.improves(0.5, Some(0.5)));
        assert!(MonitorMode::Min.improves(0.4, Some(0.5)));
        assert!(!MonitorMode::Min.improves(f64::NAN, None));
        assert_eq!("MIN".parse::<MonitorMode>().unwrap(), MonitorMode::Min);
        assert!("avg".parse::<MonitorMode>().is_err());
    }

    #[test]
    fn test_keeps_only_best() {
        let dir = TempDir::new().unwrap();
        let mut ckpt = ModelCheckpoint::new(dir.path(), "val.acc", MonitorMode::Max);

        assert!(ckpt.update(0, &metrics(0.5), || Ok(b"e0".to_vec())).unwrap());
        assert!(ckpt.update(1, &metrics(0.7), || Ok(b"e1".to_vec())).unwrap());
        assert!(!ckpt.update(2, &metrics(0.6), || Ok(b"e2".to_vec())).unwrap());

        assert_eq!(ckpt.best_model_path(), Some(ckpt.checkpoint_path(1).as_path()));
        assert_eq!(ckpt.best_model_score(), Some(0.7));
        assert!(!ckpt.checkpoint_path(0).exists());
        assert!(!ckpt.checkpoint_path(2).exists());
        assert_eq!(fs::read(ckpt.checkpoint_path(1)).unwrap(), b"e1");
    }

    #[test]
    fn test_missing_metric_or_disabled() {
        let dir = TempDir::new().unwrap();
        let mut ckpt = ModelCheckpoint::new(dir.path(), "val.loss", MonitorMode::Min);
        assert!(!ckpt.update(0, &metrics(0.5), || Ok(Vec::new())).unwrap());

        let mut off = ModelCheckpoint::new(dir.path(), "val.acc", MonitorMode::Max).enabled(false);
        assert!(!off.update(0, &metrics(0.5), || Ok(Vec::new())).unwrap());
        assert!(off.best_model_path().is_none());
    }

    #[test]
    fn test_state_not_built_without_improvement() {
        let dir = TempDir::new().unwrap();
        let mut ckpt = ModelCheckpoint::new(dir.path(), "val.acc", MonitorMode::Max);
        ckpt.update(0, &metrics(0.9), || Ok(Vec::new())).unwrap();
        let saved = ckpt
            .update(1, &metrics(0.1), || Err(Error::Other("must not run".to_string())))
            .unwrap();
        assert!(!saved);
    }

    #[test]
    fn test_reset_forgets_best() {
        let dir = TempDir::new().unwrap();
        let mut ckpt = ModelCheckpoint::new(dir.path(), "val.acc", MonitorMode::Max);
        ckpt.update(2, &metrics(0.9), || Ok(b"run1".to_vec())).unwrap();

        ckpt.reset();
        assert!(ckpt.best_model_path().is_none());
        assert!(ckpt.update(0, &metrics(0.2), || Ok(b"run2".to_vec())).unwrap());
        assert_eq!(ckpt.best_model_path(), Some(ckpt.checkpoint_path(0).as_path()));
        assert!(ckpt.checkpoint_path(2).exists());
    }

    #[test]
    fn test_removed_previous_best_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut ckpt = ModelCheckpoint::new(dir.path(), "val.acc", MonitorMode::Max);
        ckpt.update(0, &metrics(0.5), || Ok(b"e0".to_vec())).unwrap();
        fs::remove_file(ckpt.checkpoint_path(0)).unwrap();

        assert!(ckpt.update(1, &metrics(0.6), || Ok(b"e1".to_vec())).unwrap());
        assert_eq!(ckpt.best_model_score(), Some(0.6));
    }
}
