//! Coordinator-side handles to clients.
//!
//! A [`ClientProxy`] pairs a client's immutable [`ClientRecord`] with the
//! learner that serves it, in-process or behind a transport, and tags every
//! result with the client's identity.

use crate::core::{Error, Metrics, Result};
use crate::federated::defense::ClipDefense;
use crate::federated::learner::{FitConfig, LocalLearner};
use crate::federated::params::ParameterSet;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Per-client local configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Train on flipped labels
    pub malicious: bool,
    /// Clip returned parameters before aggregation
    pub use_clip: bool,
    /// L2 bound per tensor when clipping
    pub clip_norm: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            malicious: false,
            use_clip: false,
            clip_norm: 1.0,
        }
    }
}

impl ClientConfig {
    /// Honest client without clipping.
    pub fn honest() -> Self {
        Self::default()
    }

    /// Label-flipping client.
    pub fn malicious() -> Self {
        Self {
            malicious: true,
            ..Self::default()
        }
    }

    /// Enable clipping with the given bound.
    pub fn with_clip(mut self, clip_norm: f32) -> Self {
        self.use_clip = true;
        self.clip_norm = clip_norm;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.use_clip {
            ClipDefense::new(self.clip_norm)?;
        }
        Ok(())
    }
}

/// Identity and local configuration of one client. Fixed for the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Client identifier
    pub client_id: String,
    /// Local configuration
    pub config: ClientConfig,
}

impl ClientRecord {
    /// Create a record.
    pub fn new(client_id: &str, config: ClientConfig) -> Self {
        Self {
            client_id: client_id.to_string(),
            config,
        }
    }
}

/// A fit result tagged with its client.
#[derive(Clone, Debug)]
pub struct FitResult {
    /// Client identifier
    pub client_id: String,
    /// Returned parameters
    pub parameters: ParameterSet,
    /// Training samples used
    pub num_examples: u64,
    /// Client metrics
    pub metrics: Metrics,
}

/// An evaluation result tagged with its client.
#[derive(Clone, Debug)]
pub struct EvalResult {
    /// Client identifier
    pub client_id: String,
    /// Evaluation loss
    pub loss: f64,
    /// Evaluation samples
    pub num_examples: u64,
    /// Client metrics
    pub metrics: Metrics,
}

/// Handle the coordinator uses to reach one client.
#[derive(Clone)]
pub struct ClientProxy {
    record: ClientRecord,
    learner: Arc<dyn LocalLearner>,
}

impl ClientProxy {
    /// Create a proxy, validating the client's configuration.
    pub fn new(record: ClientRecord, learner: Arc<dyn LocalLearner>) -> Result<Self> {
        record.config.validate()?;
        Ok(Self { record, learner })
    }

    /// Client identifier.
    pub fn client_id(&self) -> &str {
        &self.record.client_id
    }

    /// Client record.
    pub fn record(&self) -> &ClientRecord {
        &self.record
    }

    /// Clipping policy for this client, if enabled.
    pub fn defense(&self) -> Option<ClipDefense> {
        if self.record.config.use_clip {
            ClipDefense::new(self.record.config.clip_norm).ok()
        } else {
            None
        }
    }

    /// Fetch the client's current parameters.
    pub async fn get_parameters(&self, timeout: Option<Duration>) -> Result<ParameterSet> {
        self.invoke(timeout, self.learner.get_parameters()).await
    }

    /// Run a local fit.
    ///
    /// The client's `malicious` flag is overlaid on the round configuration.
    pub async fn fit(
        &self,
        parameters: ParameterSet,
        config: FitConfig,
        timeout: Option<Duration>,
    ) -> Result<FitResult> {
        let config = config.with_poison_labels(self.record.config.malicious);
        let res = self.invoke(timeout, self.learner.fit(parameters, config)).await?;

        let mut metrics = res.metrics;
        metrics.insert(
            "clip".to_string(),
            if self.record.config.use_clip { 1.0 } else { 0.0 },
        );

        Ok(FitResult {
            client_id: self.record.client_id.clone(),
            parameters: res.parameters,
            num_examples: res.num_examples,
            metrics,
        })
    }

    /// Run a local evaluation. Never poisoned.
    pub async fn evaluate(
        &self,
        parameters: ParameterSet,
        timeout: Option<Duration>,
    ) -> Result<EvalResult> {
        let res = self.invoke(timeout, self.learner.evaluate(parameters)).await?;
        Ok(EvalResult {
            client_id: self.record.client_id.clone(),
            loss: res.loss,
            num_examples: res.num_examples,
            metrics: res.metrics,
        })
    }

    /// Await a learner call, mapping timeouts and failures to client errors.
    async fn invoke<T, F>(&self, timeout: Option<Duration>, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                Error::ClientInvocation {
                    client_id: self.record.client_id.clone(),
                    reason: format!("timed out after {:?}", limit),
                }
            })?,
            None => call.await,
        };

        outcome.map_err(|e| match e {
            Error::ShapeMismatch { .. } | Error::ClientInvocation { .. } => e,
            other => Error::ClientInvocation {
                client_id: self.record.client_id.clone(),
                reason: other.to_string(),
            },
        })
    }
}

impl std::fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProxy")
            .field("record", &self.record)
            .finish()
    }
}
