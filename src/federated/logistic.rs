//! In-process logistic regression learner.
//!
//! A linear softmax classifier with parameters `[weight (classes x
//! features), bias (classes)]`, trained with mini-batch SGD on cross-entropy.

use crate::core::{metrics, Error, Result};
use crate::federated::adversary::flip_binary_labels;
use crate::federated::data::Dataset;
use crate::federated::learner::{EvaluateRes, FitConfig, FitRes, LocalLearner};
use crate::federated::params::ParameterSet;
use async_trait::async_trait;
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Mini-batch size used for local SGD.
pub const BATCH_SIZE: usize = 32;

/// Dense linear model.
#[derive(Clone, Debug)]
pub struct LogisticModel {
    /// Shape: [classes, features]
    pub weights: Array2<f32>,
    /// Shape: [classes]
    pub bias: Array1<f32>,
}

impl LogisticModel {
    /// Small random initialization.
    pub fn new(num_features: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = (2.0 / num_features.max(1) as f32).sqrt();
        let weights = Array2::from_shape_fn((num_classes, num_features), |_| {
            rng.gen::<f32>() * scale - scale / 2.0
        });
        Self {
            weights,
            bias: Array1::zeros(num_classes),
        }
    }

    /// Load from a parameter set with tensors `[weight, bias]`.
    pub fn from_parameters(params: &ParameterSet) -> Result<Self> {
        let tensors = params.tensors();
        if tensors.len() != 2 {
            return Err(Error::ShapeMismatch {
                expected: vec![vec![0, 0], vec![0]],
                actual: params.shapes(),
            });
        }
        let weights = tensors[0].clone().into_dimensionality::<Ix2>()?;
        let bias = tensors[1].clone().into_dimensionality::<Ix1>()?;
        if weights.nrows() != bias.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![vec![bias.len(), weights.ncols()], vec![bias.len()]],
                actual: params.shapes(),
            });
        }
        Ok(Self { weights, bias })
    }

    /// Export as `[weight, bias]`.
    pub fn to_parameters(&self) -> ParameterSet {
        ParameterSet::new(vec![
            self.weights.clone().into_dyn(),
            self.bias.clone().into_dyn(),
        ])
    }

    /// Logits for a batch: [batch, classes].
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weights.t()) + &self.bias
    }

    /// One SGD step on a batch; returns the batch loss.
    fn step(&mut self, x: &Array2<f32>, y: &[usize], lr: f32) -> f32 {
        let probs = softmax(&self.forward(x));
        let loss = cross_entropy(&probs, y);

        let mut grad = probs;
        for (i, &label) in y.iter().enumerate() {
            grad[[i, label]] -= 1.0;
        }
        let n = x.nrows().max(1) as f32;
        let grad_w = grad.t().dot(x);
        let grad_b = grad.sum_axis(Axis(0));

        self.weights.scaled_add(-lr / n, &grad_w);
        self.bias.scaled_add(-lr / n, &grad_b);
        loss
    }
}

/// Row-wise softmax.
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Mean cross-entropy of `probs` against `labels`.
pub fn cross_entropy(probs: &Array2<f32>, labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f32 = labels
        .iter()
        .enumerate()
        .map(|(i, &y)| -probs[[i, y]].max(1e-15).ln())
        .sum();
    total / labels.len() as f32
}

/// Fraction of rows whose argmax matches the label.
pub fn accuracy(logits: &Array2<f32>, labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = logits
        .rows()
        .into_iter()
        .zip(labels.iter())
        .filter(|(row, y)| argmax(row.iter().copied()) == **y)
        .count();
    correct as f32 / labels.len() as f32
}

fn argmax<I: Iterator<Item = f32>>(values: I) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

/// Learner holding one client's training shard and the shared test set.
pub struct LogisticLearner {
    /// Training partition
    train: Dataset,
    /// Held-out partition
    test: Dataset,
    /// Number of output classes
    num_classes: usize,
    /// Seed for initialization and batch shuffling
    seed: u64,
}

impl LogisticLearner {
    /// Create a learner for a binary task.
    pub fn new(train: Dataset, test: Dataset) -> Self {
        Self {
            train,
            test,
            num_classes: 2,
            seed: 42,
        }
    }

    /// Set number of classes.
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Set RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Training sample count.
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    fn train_model(&self, model: &mut LogisticModel, config: &FitConfig) -> f32 {
        let mut labels = self.train.labels.clone();
        if config.poison_labels {
            flip_binary_labels(&mut labels);
        }

        let mut rng = StdRng::seed_from_u64(self.seed ^ u64::from(config.round));
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        let mut last_loss = 0.0;

        for _ in 0..config.local_epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            let mut batches = 0;
            for chunk in order.chunks(BATCH_SIZE) {
                let x = self.train.features.select(Axis(0), chunk);
                let y: Vec<usize> = chunk.iter().map(|&i| labels[i]).collect();
                epoch_loss += model.step(&x, &y, config.lr);
                batches += 1;
            }
            last_loss = if batches > 0 { epoch_loss / batches as f32 } else { 0.0 };
        }
        last_loss
    }
}

#[async_trait]
impl LocalLearner for LogisticLearner {
    async fn get_parameters(&self) -> Result<ParameterSet> {
        let model = LogisticModel::new(self.train.num_features(), self.num_classes, self.seed);
        Ok(model.to_parameters())
    }

    async fn fit(&self, parameters: ParameterSet, config: FitConfig) -> Result<FitRes> {
        let mut model = LogisticModel::from_parameters(&parameters)?;
        let train_loss = self.train_model(&mut model, &config);

        Ok(FitRes {
            parameters: model.to_parameters(),
            num_examples: self.train.len() as u64,
            metrics: metrics([
                ("malicious", if config.poison_labels { 1.0 } else { 0.0 }),
                ("train_loss", f64::from(train_loss)),
            ]),
        })
    }

    async fn evaluate(&self, parameters: ParameterSet) -> Result<EvaluateRes> {
        let model = LogisticModel::from_parameters(&parameters)?;
        let logits = model.forward(&self.test.features);
        let loss = cross_entropy(&softmax(&logits), &self.test.labels);
        let acc = accuracy(&logits, &self.test.labels);

        Ok(EvaluateRes {
            loss: f64::from(loss),
            num_examples: self.test.len() as u64,
            metrics: metrics([("accuracy", f64::from(acc))]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated::data::{synthetic_binary, train_test_split};
    use ndarray::array;

    fn learner() -> LogisticLearner {
        let data = synthetic_binary(200, 4, 4.0, 5);
        let (train, test) = train_test_split(&data, 0.25, 42).unwrap();
        LogisticLearner::new(train, test)
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let probs = softmax(&array![[1.0f32, 2.0], [0.0, 0.0]]);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!((probs[[1, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_accuracy() {
        let logits = array![[2.0f32, 1.0], [0.0, 3.0], [1.0, 0.0]];
        assert!((accuracy(&logits, &[0, 1, 1]) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_parameter_roundtrip_shapes() {
        let model = LogisticModel::new(4, 2, 1);
        let params = model.to_parameters();
        assert_eq!(params.shapes(), vec![vec![2, 4], vec![2]]);
        let restored = LogisticModel::from_parameters(&params).unwrap();
        assert_eq!(restored.weights, model.weights);
    }

    #[test]
    fn test_from_parameters_rejects_wrong_layout() {
        let params = ParameterSet::zeros(&[vec![2, 4]]);
        assert!(LogisticModel::from_parameters(&params).is_err());
    }

    #[tokio::test]
    async fn test_fit_preserves_shapes_and_learns() {
        let learner = learner();
        let initial = learner.get_parameters().await.unwrap();

        let before = learner.evaluate(initial.clone()).await.unwrap();
        let fit = learner
            .fit(initial.clone(), FitConfig::new(1, 0.1, 5))
            .await
            .unwrap();
        assert_eq!(fit.parameters.shapes(), initial.shapes());
        assert_eq!(fit.num_examples, 150);
        assert_eq!(fit.metrics["malicious"], 0.0);

        let after = learner.evaluate(fit.parameters).await.unwrap();
        assert!(after.loss < before.loss);
        assert!(after.metrics["accuracy"] > 0.9);
    }

    #[tokio::test]
    async fn test_poisoned_fit_degrades_accuracy() {
        let learner = learner();
        let initial = learner.get_parameters().await.unwrap();

        let poisoned = learner
            .fit(initial, FitConfig::new(1, 0.1, 5).with_poison_labels(true))
            .await
            .unwrap();
        assert_eq!(poisoned.metrics["malicious"], 1.0);

        // Evaluation labels stay clean, so the flipped model scores badly
        let eval = learner.evaluate(poisoned.parameters).await.unwrap();
        assert!(eval.metrics["accuracy"] < 0.1);
    }
}
