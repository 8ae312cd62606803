//! Local learner capability.
//!
//! A learner trains and evaluates a model on data that never leaves the
//! client. The coordinator only ever sees parameters, sample counts and
//! scalar metrics.

use crate::core::{Metrics, Result};
use crate::federated::params::ParameterSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-round instructions sent with a fit request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Round number (1-based)
    pub round: u32,
    /// Learning rate for local optimization
    pub lr: f32,
    /// Local epochs over the client's partition
    pub local_epochs: usize,
    /// Flip training labels before computing gradients
    pub poison_labels: bool,
}

impl FitConfig {
    /// Create a fit configuration for a round.
    pub fn new(round: u32, lr: f32, local_epochs: usize) -> Self {
        Self {
            round,
            lr,
            local_epochs,
            poison_labels: false,
        }
    }

    /// Enable or disable training-label poisoning.
    pub fn with_poison_labels(mut self, poison: bool) -> Self {
        self.poison_labels = poison;
        self
    }
}

/// Output of a local fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitRes {
    /// Updated parameters (same shapes as the input)
    pub parameters: ParameterSet,
    /// Number of training samples used
    pub num_examples: u64,
    /// Client-reported metrics
    pub metrics: Metrics,
}

/// Output of a local evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluateRes {
    /// Loss on the evaluation partition
    pub loss: f64,
    /// Number of evaluation samples
    pub num_examples: u64,
    /// Client-reported metrics (e.g. accuracy)
    pub metrics: Metrics,
}

/// Training and evaluation on a client's private partition.
///
/// Implementations must return parameters with the same tensor shapes they
/// received.
#[async_trait]
pub trait LocalLearner: Send + Sync {
    /// Current local parameters, used to seed the global model.
    async fn get_parameters(&self) -> Result<ParameterSet>;

    /// Train from `parameters` and return the updated set.
    async fn fit(&self, parameters: ParameterSet, config: FitConfig) -> Result<FitRes>;

    /// Evaluate `parameters` on local held-out data.
    async fn evaluate(&self, parameters: ParameterSet) -> Result<EvaluateRes>;
}
