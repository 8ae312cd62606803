//! Client selection and aggregation policies.
//!
//! [`FedAvg`] weights every client's contribution by the number of samples
//! it trained or evaluated on.

use crate::core::{Error, Metrics, Result};
use crate::federated::learner::FitConfig;
use crate::federated::params::ParameterSet;
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Participation and local-training settings for a strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Fraction of the pool sampled for fit, in (0, 1]
    pub fraction_fit: f64,
    /// Fraction of the pool sampled for evaluation, in [0, 1]
    pub fraction_evaluate: f64,
    /// Minimum clients sampled and responding in fit
    pub min_fit_clients: usize,
    /// Minimum clients sampled and responding in evaluation
    pub min_evaluate_clients: usize,
    /// Minimum registered clients before round 1
    pub min_available_clients: usize,
    /// Local learning rate sent every round
    pub learning_rate: f32,
    /// Local epochs sent every round
    pub local_epochs: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fraction_fit: 1.0,
            fraction_evaluate: 1.0,
            min_fit_clients: 2,
            min_evaluate_clients: 2,
            min_available_clients: 2,
            learning_rate: 1e-3,
            local_epochs: 1,
        }
    }
}

impl StrategyConfig {
    /// Set fit and evaluation fractions.
    pub fn with_fractions(mut self, fit: f64, evaluate: f64) -> Self {
        self.fraction_fit = fit;
        self.fraction_evaluate = evaluate;
        self
    }

    /// Set the three minimums.
    pub fn with_minimums(mut self, fit: usize, evaluate: usize, available: usize) -> Self {
        self.min_fit_clients = fit;
        self.min_evaluate_clients = evaluate;
        self.min_available_clients = available;
        self
    }

    /// Set local training hyperparameters.
    pub fn with_local_training(mut self, learning_rate: f32, local_epochs: usize) -> Self {
        self.learning_rate = learning_rate;
        self.local_epochs = local_epochs;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.fraction_fit > 0.0 && self.fraction_fit <= 1.0) {
            return Err(Error::Configuration(format!(
                "fraction_fit must be in (0, 1], got {}",
                self.fraction_fit
            )));
        }
        if !(0.0..=1.0).contains(&self.fraction_evaluate) {
            return Err(Error::Configuration(format!(
                "fraction_evaluate must be in [0, 1], got {}",
                self.fraction_evaluate
            )));
        }
        if self.min_fit_clients < 1 || self.min_evaluate_clients < 1 || self.min_available_clients < 1 {
            return Err(Error::Configuration(
                "client minimums must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.local_epochs < 1 {
            return Err(Error::Configuration("local_epochs must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Selection and aggregation policy driven by the coordinator.
pub trait AggregationStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// Participation settings.
    fn config(&self) -> &StrategyConfig;

    /// Fit instructions for a round. Pure in `round`.
    fn configure_fit(&self, round: u32) -> FitConfig;

    /// Combine fit results into a new global parameter set.
    fn aggregate_fit(&self, results: &[(ParameterSet, u64)]) -> Result<ParameterSet>;

    /// Combine evaluation metrics.
    fn aggregate_evaluate(&self, results: &[(Metrics, u64)]) -> Result<Metrics>;

    /// Number of clients to sample for fit from a pool.
    fn num_fit_clients(&self, pool_size: usize) -> Result<usize> {
        let cfg = self.config();
        sample_size(cfg.fraction_fit, cfg.min_fit_clients, pool_size, "fit")
    }

    /// Number of clients to sample for evaluation; 0 disables evaluation.
    fn num_evaluate_clients(&self, pool_size: usize) -> Result<usize> {
        let cfg = self.config();
        if cfg.fraction_evaluate <= 0.0 {
            return Ok(0);
        }
        sample_size(cfg.fraction_evaluate, cfg.min_evaluate_clients, pool_size, "evaluate")
    }
}

/// `max(ceil(fraction * pool), min)`, failing when the pool is smaller
/// than `min`.
pub fn sample_size(fraction: f64, min_clients: usize, pool_size: usize, phase: &str) -> Result<usize> {
    if pool_size < min_clients {
        return Err(Error::quorum(phase, min_clients, pool_size));
    }
    let wanted = (fraction * pool_size as f64).ceil() as usize;
    Ok(wanted.max(min_clients).min(pool_size))
}

/// Pick `count` distinct pool indices uniformly at random, sorted.
pub fn select_clients<R: Rng + ?Sized>(rng: &mut R, pool_size: usize, count: usize) -> Vec<usize> {
    let mut picked = index::sample(rng, pool_size, count.min(pool_size)).into_vec();
    picked.sort_unstable();
    picked
}

/// Sum of sample counts. Widened so client-reported counts cannot overflow.
pub fn total_examples<I>(counts: I) -> u128
where
    I: IntoIterator<Item = u64>,
{
    counts.into_iter().map(u128::from).sum()
}

/// Sample-count-weighted mean of `(value, n)` pairs.
pub fn weighted_mean<I>(values: I) -> Result<f64>
where
    I: IntoIterator<Item = (f64, u64)>,
{
    let (sum, total) = values
        .into_iter()
        .fold((0.0f64, 0u128), |(s, t), (v, n)| (s + v * n as f64, t + u128::from(n)));
    if total == 0 {
        return Err(Error::EmptyResults);
    }
    Ok(sum / total as f64)
}

/// Sample-count-weighted mean of evaluation losses.
pub fn weighted_loss_avg(results: &[(f64, u64)]) -> Result<f64> {
    weighted_mean(results.iter().copied())
}

/// Federated averaging.
#[derive(Clone, Debug)]
pub struct FedAvg {
    config: StrategyConfig,
}

impl FedAvg {
    /// Create a FedAvg strategy, validating its settings.
    pub fn new(config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Default for FedAvg {
    fn default() -> Self {
        Self {
            config: StrategyConfig::default(),
        }
    }
}

impl AggregationStrategy for FedAvg {
    fn name(&self) -> &str {
        "fedavg"
    }

    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn configure_fit(&self, round: u32) -> FitConfig {
        FitConfig::new(round, self.config.learning_rate, self.config.local_epochs)
    }

    /// For each tensor: `sum_k(n_k * t_k) / sum_k(n_k)`.
    fn aggregate_fit(&self, results: &[(ParameterSet, u64)]) -> Result<ParameterSet> {
        let (first, _) = results.first().ok_or(Error::EmptyResults)?;
        let total = total_examples(results.iter().map(|(_, n)| *n));
        if total == 0 {
            return Err(Error::EmptyResults);
        }

        let mut acc = first.zeros_like();
        for (params, n) in results {
            acc.add_scaled_assign(params, (*n as f64 / total as f64) as f32)?;
        }
        Ok(acc)
    }

    /// Weighted mean of every metric key present in all results.
    fn aggregate_evaluate(&self, results: &[(Metrics, u64)]) -> Result<Metrics> {
        let (first, _) = results.first().ok_or(Error::EmptyResults)?;

        let mut out = Metrics::new();
        for key in first.keys() {
            if !results.iter().all(|(m, _)| m.contains_key(key)) {
                continue;
            }
            let value = weighted_mean(results.iter().map(|(m, n)| (m[key], *n)))?;
            out.insert(key.clone(), value);
        }
        Ok(out)
    }
}
