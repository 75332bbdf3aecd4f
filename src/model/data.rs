//! In-memory classification datasets

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// One labelled example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Feature vector
    pub features: Vec<f32>,
    /// Class index
    pub label: usize,
}

/// Labelled samples with a fixed feature width.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    samples: Vec<Sample>,
    num_features: usize,
    num_classes: usize,
}

impl Dataset {
    /// Build from samples; all feature vectors must share one width.
    ///
    /// # Errors
    ///
    /// [`Error::Data`] on mixed widths.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        let num_features = samples.first().map_or(0, |s| s.features.len());
        if let Some((i, s)) = samples
            .iter()
            .enumerate()
            .find(|(_, s)| s.features.len() != num_features)
        {
            return Err(Error::Data(format!(
                "sample {i} has {} features, expected {num_features}",
                s.features.len()
            )));
        }
        let num_classes = samples.iter().map(|s| s.label + 1).max().unwrap_or(0);
        Ok(Self {
            samples,
            num_features,
            num_classes,
        })
    }

    /// Load one JSON sample (`{"features": [..], "label": n}`) per line.
    ///
    /// # Errors
    ///
    /// IO errors, malformed lines, mixed widths.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut samples = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(&line).map_err(|e| {
                Error::Data(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
            samples.push(sample);
        }
        debug!(path = %path.display(), samples = samples.len(), "dataset loaded");
        Self::new(samples)
    }

    /// Separable blobs: one random center per class, uniform noise around it.
    #[must_use]
    pub fn synthetic(samples: usize, num_features: usize, num_classes: usize, seed: u64) -> Self {
        let num_classes = num_classes.max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let centers: Vec<Vec<f32>> = (0..num_classes)
            .map(|_| (0..num_features).map(|_| rng.gen_range(-2.0_f32..2.0)).collect())
            .collect();
        let samples = (0..samples)
            .map(|i| {
                let label = i % num_classes;
                let features = centers[label]
                    .iter()
                    .map(|c| *c + rng.gen_range(-0.5_f32..0.5))
                    .collect();
                Sample { features, label }
            })
            .collect();
        Self {
            samples,
            num_features,
            num_classes,
        }
    }

    /// Shuffle with `seed` and split off `fraction` of the samples (at least
    /// one when there are two or more). Returns `(rest, split)`.
    #[must_use]
    pub fn split(&self, fraction: f64, seed: u64) -> (Self, Self) {
        let mut samples = self.samples.clone();
        samples.shuffle(&mut StdRng::seed_from_u64(seed));

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let mut n_split = (samples.len() as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
        if fraction > 0.0 && n_split == 0 && samples.len() > 1 {
            n_split = 1;
        }
        let split = samples.split_off(samples.len() - n_split);
        (self.with_samples(samples), self.with_samples(split))
    }

    /// First `n` samples.
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        self.with_samples(self.samples.iter().take(n).cloned().collect())
    }

    /// Widen the class count (labels absent from a small split).
    #[must_use]
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = self.num_classes.max(num_classes);
        self
    }

    fn with_samples(&self, samples: Vec<Sample>) -> Self {
        Self {
            samples,
            num_features: self.num_features,
            num_classes: self.num_classes,
        }
    }

    /// Samples
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Feature width
    #[must_use]
    pub const fn num_features(&self) -> usize {
        self.num_features
    }

    /// Number of classes (highest label + 1)
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }
}
