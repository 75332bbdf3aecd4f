//! Softmax classification head

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde_json::{json, Value};
use tracing::debug;

use super::{Dataset, Metrics, Model};
use crate::{Error, Result};

/// Hyperparameters for [`Classifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Input feature width (backbone output)
    pub in_features: usize,
    /// Number of classes the head predicts
    pub output_size: usize,
    /// Input dropout probability during training
    pub dropout: f64,
    /// Initial SGD learning rate
    pub lr: f64,
    /// Exponential LR decay per epoch
    pub gamma: f64,
    /// Samples per gradient step
    pub batch_size: usize,
    /// Weight init, shuffling and dropout seed
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            in_features: 16,
            output_size: 10,
            dropout: 0.2,
            lr: 0.1,
            gamma: 0.95,
            batch_size: 32,
            seed: 42,
        }
    }
}

impl ClassifierConfig {
    /// Check ranges.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.in_features == 0 || self.output_size == 0 {
            return Err(Error::Config(
                "in_features and output_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::Config(format!("lr must be positive, got {}", self.lr)));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(Error::Config(format!("gamma must be positive, got {}", self.gamma)));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// What a checkpoint file holds.
#[derive(Serialize, Deserialize)]
struct ClassifierState {
    config: ClassifierConfig,
    /// Row-major `[output_size, in_features]`
    weights: Vec<f32>,
    bias: Vec<f32>,
    lr: f64,
}

/// Dropout + linear head over pre-extracted backbone features.
///
/// The backbone is frozen, so only this head trains. Optimized with plain
/// SGD on softmax cross-entropy; the learning rate decays by `gamma` each
/// epoch.
pub struct Classifier {
    config: ClassifierConfig,
    /// `[output_size, in_features]`
    weights: Array2<f32>,
    bias: Array1<f32>,
    lr: f64,
    rng: StdRng,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("config", &self.config)
            .field("lr", &self.lr)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Fresh head with small random weights.
    ///
    /// # Errors
    ///
    /// Invalid configuration.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (config.in_features as f32).sqrt();
        let weights = Array2::from_shape_simple_fn((config.output_size, config.in_features), || {
            rng.gen_range(-scale..scale)
        });
        Ok(Self {
            bias: Array1::zeros(config.output_size),
            lr: config.lr,
            weights,
            rng,
            config,
        })
    }

    /// Rebuild from checkpoint bytes.
    ///
    /// # Errors
    ///
    /// [`Error::Checkpoint`] on malformed bytes.
    pub fn from_state_bytes(bytes: &[u8]) -> Result<Self> {
        let state: ClassifierState = serde_json::from_slice(bytes)
            .map_err(|e| Error::Checkpoint(format!("not a classifier checkpoint: {e}")))?;
        let mut model = Self::new(state.config.clone())?;
        model.apply_state(state)?;
        Ok(model)
    }

    /// Replace the head with a fresh one predicting `output_size` classes.
    ///
    /// # Errors
    ///
    /// `output_size` of zero.
    pub fn replace_head(&mut self, output_size: usize) -> Result<()> {
        let config = ClassifierConfig {
            output_size,
            ..self.config.clone()
        };
        *self = Self::new(config)?;
        Ok(())
    }

    /// Hyperparameters
    #[must_use]
    pub const fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Predicted class for one feature vector
    #[must_use]
    pub fn predict(&self, features: &[f32]) -> usize {
        let logits = self.weights.dot(&ArrayView1::from(features)) + &self.bias;
        argmax(logits.view())
    }

    fn apply_state(&mut self, state: ClassifierState) -> Result<()> {
        let shape = (self.config.output_size, self.config.in_features);
        let mismatch = || {
            Error::Checkpoint(format!(
                "checkpoint shape [{}, {}] does not match model [{}, {}]",
                state.config.output_size, state.config.in_features, shape.0, shape.1
            ))
        };
        if state.config.in_features != shape.1
            || state.config.output_size != shape.0
            || state.bias.len() != shape.0
        {
            return Err(mismatch());
        }
        let weights = Array2::from_shape_vec(shape, state.weights).map_err(|_| mismatch())?;
        self.weights = weights;
        self.bias = Array1::from(state.bias);
        self.lr = state.lr;
        Ok(())
    }

    fn check(&self, data: &Dataset) -> Result<()> {
        if !data.is_empty() && data.num_features() != self.config.in_features {
            return Err(Error::Data(format!(
                "dataset has {} features, model expects {}",
                data.num_features(),
                self.config.in_features
            )));
        }
        if let Some(sample) = data
            .samples()
            .iter()
            .find(|s| s.label >= self.config.output_size)
        {
            return Err(Error::Data(format!(
                "label {} out of range for {} classes",
                sample.label, self.config.output_size
            )));
        }
        Ok(())
    }

    /// Class probabilities, one row per input row.
    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut probs = x.dot(&self.weights.t()) + &self.bias;
        softmax_rows(&mut probs);
        probs
    }
}

/// Stack the selected samples' features into `[rows, width]`.
fn batch_matrix(data: &Dataset, rows: &[usize], width: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows.len(), width), |(r, c)| {
        data.samples()[rows[r]].features[c]
    })
}

fn softmax_rows(logits: &mut Array2<f32>) {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
}

fn argmax(values: ArrayView1<'_, f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Summed cross-entropy and correct count over a batch.
fn score(probs: &Array2<f32>, labels: &[usize]) -> (f64, usize) {
    probs
        .axis_iter(Axis(0))
        .zip(labels)
        .fold((0.0, 0), |(loss, correct), (row, &label)| {
            (
                loss - f64::from(row[label].max(1e-12)).ln(),
                correct + usize::from(argmax(row) == label),
            )
        })
}

#[allow(clippy::cast_precision_loss)]
fn summarize(loss: f64, correct: usize, n: usize) -> Metrics {
    let mut metrics = Metrics::new();
    if n > 0 {
        metrics.insert("loss".to_string(), loss / n as f64);
        metrics.insert("acc".to_string(), correct as f64 / n as f64);
    }
    metrics
}

impl Model for Classifier {
    fn name(&self) -> &str {
        "Classifier"
    }

    fn hparams(&self) -> Value {
        let c = &self.config;
        json!({
            "in_features": c.in_features,
            "output_size": c.output_size,
            "dropout": c.dropout,
            "lr": c.lr,
            "gamma": c.gamma,
            "batch_size": c.batch_size,
            "seed": c.seed,
        })
    }

    fn optimizer_name(&self) -> &str {
        "SGD"
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn train_epoch(&mut self, data: &Dataset) -> Result<Metrics> {
        self.check(data)?;
        let keep = 1.0 - self.config.dropout as f32;

        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(&mut self.rng);

        let (mut loss, mut correct) = (0.0, 0);
        for batch in order.chunks(self.config.batch_size) {
            let mut x = batch_matrix(data, batch, self.config.in_features);
            let rng = &mut self.rng;
            x.mapv_inplace(|f| if rng.gen::<f32>() < keep { f / keep } else { 0.0 });

            let labels: Vec<usize> = batch.iter().map(|&i| data.samples()[i].label).collect();
            let mut grad = self.forward(&x);
            let (batch_loss, batch_correct) = score(&grad, &labels);
            loss += batch_loss;
            correct += batch_correct;

            // d(loss)/d(logits) = probs - one_hot(label)
            for (mut row, &label) in grad.axis_iter_mut(Axis(0)).zip(&labels) {
                row[label] -= 1.0;
            }
            let step = (self.lr / batch.len() as f64) as f32;
            self.weights.scaled_add(-step, &grad.t().dot(&x));
            self.bias.scaled_add(-step, &grad.sum_axis(Axis(0)));
        }
        Ok(summarize(loss, correct, data.len()))
    }

    fn evaluate(&self, data: &Dataset) -> Result<Metrics> {
        self.check(data)?;
        let rows: Vec<usize> = (0..data.len()).collect();
        let labels: Vec<usize> = data.samples().iter().map(|s| s.label).collect();
        let (loss, correct) = score(&self.forward(&batch_matrix(data, &rows, self.config.in_features)), &labels);
        Ok(summarize(loss, correct, data.len()))
    }

    fn step_scheduler(&mut self) {
        self.lr *= self.config.gamma;
        debug!(lr = self.lr, "learning rate decayed");
    }

    fn state_bytes(&self) -> Result<Vec<u8>> {
        let state = ClassifierState {
            config: self.config.clone(),
            weights: self.weights.iter().copied().collect(),
            bias: self.bias.to_vec(),
            lr: self.lr,
        };
        Ok(serde_json::to_vec(&state)?)
    }

    fn load_state_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let state: ClassifierState = serde_json::from_slice(bytes)
            .map_err(|e| Error::Checkpoint(format!("not a classifier checkpoint: {e}")))?;
        self.apply_state(state)
    }
}
