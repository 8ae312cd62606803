//! Append-only record of completed rounds.

use crate::core::{now, Metrics, Result, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregated outcome of one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number (1-based)
    pub round: u32,
    /// Clients whose fit results were aggregated
    pub fit_clients: usize,
    /// Selected clients excluded from fit aggregation
    pub fit_failures: usize,
    /// Weighted evaluation loss, if evaluation ran
    pub loss: Option<f64>,
    /// Weighted evaluation metrics (e.g. accuracy)
    pub metrics: Metrics,
    /// Completion time
    pub completed_at: Timestamp,
}

impl RoundRecord {
    /// Create a record for a round without evaluation.
    pub fn new(round: u32, fit_clients: usize, fit_failures: usize) -> Self {
        Self {
            round,
            fit_clients,
            fit_failures,
            loss: None,
            metrics: Metrics::new(),
            completed_at: now(),
        }
    }

    /// Attach evaluation results.
    pub fn with_evaluation(mut self, loss: f64, metrics: Metrics) -> Self {
        self.loss = Some(loss);
        self.metrics = metrics;
        self
    }

    /// Aggregated accuracy, if reported.
    pub fn accuracy(&self) -> Option<f64> {
        self.metrics.get("accuracy").copied()
    }
}

/// Ordered history of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundHistory {
    run_id: Uuid,
    rounds: Vec<RoundRecord>,
}

impl RoundHistory {
    /// Create an empty history with a fresh run id.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            rounds: Vec::new(),
        }
    }

    /// Run identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append a completed round. Only the coordinator writes history.
    pub(crate) fn push(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    /// All recorded rounds.
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    /// Most recent round.
    pub fn last(&self) -> Option<&RoundRecord> {
        self.rounds.last()
    }

    /// Number of completed rounds.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Whether no round has completed.
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// `(round, value)` series for a metric.
    pub fn metric_series(&self, key: &str) -> Vec<(u32, f64)> {
        self.rounds
            .iter()
            .filter_map(|r| r.metrics.get(key).map(|v| (r.round, *v)))
            .collect()
    }

    /// `(round, loss)` series for rounds that evaluated.
    pub fn loss_series(&self) -> Vec<(u32, f64)> {
        self.rounds
            .iter()
            .filter_map(|r| r.loss.map(|l| (r.round, l)))
            .collect()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for RoundHistory {
    fn default() -> Self {
        Self::new()
    }
}
