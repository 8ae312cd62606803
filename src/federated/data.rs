//! Partition helpers for simulations.
//!
//! Provides a labeled dataset container, a stratified train/test split,
//! feature standardization and an IID split across clients.

use crate::core::{Error, Result};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::BTreeMap;

/// Features and class labels for one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    /// Row-per-sample features
    pub features: Array2<f32>,
    /// Class index per sample
    pub labels: Vec<usize>,
}

impl Dataset {
    /// Create a dataset, checking that rows and labels line up.
    pub fn new(features: Array2<f32>, labels: Vec<usize>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(Error::Configuration(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of features per sample.
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// Number of classes (largest label + 1).
    pub fn num_classes(&self) -> usize {
        self.labels.iter().max().map(|m| m + 1).unwrap_or(0)
    }

    /// Select rows by index.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Split into train and test partitions, preserving class proportions.
pub fn train_test_split(data: &Dataset, test_fraction: f32, seed: u64) -> Result<(Dataset, Dataset)> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(Error::Configuration(format!(
            "test fraction must be in [0, 1), got {}",
            test_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &y) in data.labels.iter().enumerate() {
        by_class.entry(y).or_default().push(i);
    }

    let mut train_idx = Vec::new();
    let mut test_idx = Vec::new();
    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        let n_test = (indices.len() as f32 * test_fraction).round() as usize;
        test_idx.extend_from_slice(&indices[..n_test]);
        train_idx.extend_from_slice(&indices[n_test..]);
    }
    train_idx.shuffle(&mut rng);
    test_idx.sort_unstable();

    Ok((data.select(&train_idx), data.select(&test_idx)))
}

/// Split into `num_clients` IID shards of near-equal size.
///
/// The first `len % num_clients` shards receive one extra sample.
pub fn split_iid(data: &Dataset, num_clients: usize, seed: u64) -> Result<Vec<Dataset>> {
    if num_clients == 0 {
        return Err(Error::Configuration("num_clients must be at least 1".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut idx: Vec<usize> = (0..data.len()).collect();
    idx.shuffle(&mut rng);

    let base = data.len() / num_clients;
    let extra = data.len() % num_clients;
    let mut shards = Vec::with_capacity(num_clients);
    let mut start = 0;
    for k in 0..num_clients {
        let len = base + usize::from(k < extra);
        shards.push(data.select(&idx[start..start + len]));
        start += len;
    }
    Ok(shards)
}

/// Per-feature standardization fitted on training data.
#[derive(Clone, Debug)]
pub struct StandardScaler {
    mean: Array1<f32>,
    scale: Array1<f32>,
}

impl StandardScaler {
    /// Fit means and standard deviations on `features`.
    pub fn fit(features: &Array2<f32>) -> Result<Self> {
        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::Configuration("cannot fit scaler on empty data".to_string()))?;
        // Constant columns keep unit scale.
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// Standardize `features` with the fitted statistics.
    pub fn transform(&self, features: &Array2<f32>) -> Array2<f32> {
        (features - &self.mean) / &self.scale
    }

    /// Standardize a dataset's features in place.
    pub fn transform_dataset(&self, data: &mut Dataset) {
        data.features = self.transform(&data.features);
    }
}

/// Generate two Gaussian blobs, one per binary class.
///
/// Class 0 is centered at `-separation / 2`, class 1 at `+separation / 2` on
/// every feature.
pub fn synthetic_binary(samples: usize, num_features: usize, separation: f32, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut features = Array2::<f32>::zeros((samples, num_features));
    let mut labels = Vec::with_capacity(samples);

    for (i, mut row) in features.rows_mut().into_iter().enumerate() {
        let y = i % 2;
        let center = if y == 1 { separation / 2.0 } else { -separation / 2.0 };
        for v in row.iter_mut() {
            *v = center + rng.sample::<f32, _>(StandardNormal);
        }
        labels.push(y);
    }

    Dataset { features, labels }
}
