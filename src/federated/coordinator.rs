//! Round-based federated training loop.
//!
//! The [`Coordinator`] owns the global parameters and the run history. Each
//! round it samples a fit cohort, broadcasts a copy of the global model,
//! waits for every selected client (the per-round barrier), clips the
//! updates of clients that opted in, aggregates, and then evaluates the new
//! model on an evaluation cohort.
//!
//! Client failures (errors, timeouts, bad shapes) only exclude that client
//! from the round. Falling below a configured minimum aborts the run; rounds
//! completed before the abort stay in [`Coordinator::history`].

use crate::core::{Error, Metrics, Result};
use crate::federated::config::CoordinatorConfig;
use crate::federated::learner::{FitConfig, LocalLearner};
use crate::federated::params::ParameterSet;
use crate::federated::phase::{PhaseTracker, RoundPhase};
use crate::federated::history::{RoundHistory, RoundRecord};
use crate::federated::proxy::{ClientConfig, ClientProxy, ClientRecord, EvalResult, FitResult};
use crate::federated::strategy::{select_clients, weighted_loss_avg, AggregationStrategy, FedAvg};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives federated rounds over a pool of registered clients.
pub struct Coordinator<S: AggregationStrategy = FedAvg> {
    strategy: S,
    config: CoordinatorConfig,
    clients: Vec<ClientProxy>,
    parameters: Option<ParameterSet>,
    history: RoundHistory,
    phase: PhaseTracker,
    rng: StdRng,
}

impl Coordinator<FedAvg> {
    /// Create a FedAvg coordinator from configuration.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let strategy = FedAvg::new(config.strategy.clone())?;
        Self::with_strategy(strategy, config)
    }

    /// Run with explicit round count and participation settings.
    ///
    /// Replaces the configured rounds, fractions and minimums (local
    /// training settings are kept) and then behaves like [`Coordinator::run`].
    /// Invalid values fail with `Configuration` before any client is called.
    pub async fn run_with(
        &mut self,
        num_rounds: u32,
        fraction_fit: f64,
        fraction_evaluate: f64,
        min_fit_clients: usize,
        min_evaluate_clients: usize,
        min_available_clients: usize,
    ) -> Result<RoundHistory> {
        let strategy = self
            .config
            .strategy
            .clone()
            .with_fractions(fraction_fit, fraction_evaluate)
            .with_minimums(min_fit_clients, min_evaluate_clients, min_available_clients);
        let config = self
            .config
            .clone()
            .with_rounds(num_rounds)
            .with_strategy(strategy);
        config.validate()?;

        self.strategy = FedAvg::new(config.strategy.clone())?;
        self.config = config;
        self.run().await
    }
}

impl<S: AggregationStrategy> Coordinator<S> {
    /// Create a coordinator with a custom strategy.
    ///
    /// Selection minimums and fractions are read from the strategy;
    /// `config.strategy` is only used by [`Coordinator::new`].
    pub fn with_strategy(strategy: S, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        strategy.config().validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            strategy,
            config,
            clients: Vec::new(),
            parameters: None,
            history: RoundHistory::new(),
            phase: PhaseTracker::new(),
            rng,
        })
    }

    /// Start from these parameters instead of asking a client.
    pub fn with_initial_parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Add a client to the pool. Client ids must be unique.
    pub fn register_client(&mut self, proxy: ClientProxy) -> Result<()> {
        if self.clients.iter().any(|c| c.client_id() == proxy.client_id()) {
            return Err(Error::Configuration(format!(
                "client {} already registered",
                proxy.client_id()
            )));
        }
        info!(client_id = proxy.client_id(), malicious = proxy.record().config.malicious, "client registered");
        self.clients.push(proxy);
        Ok(())
    }

    /// Wrap a learner in a proxy and register it.
    pub fn register(
        &mut self,
        client_id: &str,
        config: ClientConfig,
        learner: Arc<dyn LocalLearner>,
    ) -> Result<()> {
        let proxy = ClientProxy::new(ClientRecord::new(client_id, config), learner)?;
        self.register_client(proxy)
    }

    /// Registered clients.
    pub fn clients(&self) -> &[ClientProxy] {
        &self.clients
    }

    /// Aggregation strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Current global parameters.
    pub fn parameters(&self) -> Option<&ParameterSet> {
        self.parameters.as_ref()
    }

    /// Completed rounds, including those before a fatal error.
    pub fn history(&self) -> &RoundHistory {
        &self.history
    }

    /// Current round phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase.current()
    }

    /// Run `num_rounds` rounds and return the history.
    ///
    /// Round numbers continue from previously completed rounds.
    pub async fn run(&mut self) -> Result<RoundHistory> {
        self.check_pool()?;

        if self.parameters.is_none() {
            self.parameters = Some(self.initial_parameters().await?);
        }

        let first = self.history.len() as u32 + 1;
        let last = first + self.config.num_rounds - 1;
        info!(
            run_id = %self.history.run_id(),
            strategy = self.strategy.name(),
            clients = self.clients.len(),
            rounds = self.config.num_rounds,
            "federated run started"
        );

        for round in first..=last {
            let record = self.run_round(round).await?;
            info!(
                round,
                fit_clients = record.fit_clients,
                fit_failures = record.fit_failures,
                loss = ?record.loss,
                accuracy = ?record.accuracy(),
                "round complete"
            );
        }

        info!(run_id = %self.history.run_id(), rounds = self.history.len(), "federated run finished");
        Ok(self.history.clone())
    }

    /// Pre-run checks against the registered pool.
    fn check_pool(&self) -> Result<()> {
        let cfg = self.strategy.config();
        let pool = self.clients.len();

        if pool < cfg.min_available_clients {
            return Err(Error::InsufficientClients {
                needed: cfg.min_available_clients,
                available: pool,
            });
        }
        if cfg.min_fit_clients > pool {
            return Err(Error::Configuration(format!(
                "min_fit_clients ({}) exceeds pool size ({})",
                cfg.min_fit_clients, pool
            )));
        }
        if cfg.fraction_evaluate > 0.0 && cfg.min_evaluate_clients > pool {
            return Err(Error::Configuration(format!(
                "min_evaluate_clients ({}) exceeds pool size ({})",
                cfg.min_evaluate_clients, pool
            )));
        }
        Ok(())
    }

    /// Ask registered clients in order until one returns parameters.
    async fn initial_parameters(&self) -> Result<ParameterSet> {
        let timeout = self.config.client_timeout();
        let mut last_err = Error::InsufficientClients {
            needed: 1,
            available: 0,
        };
        for proxy in &self.clients {
            match proxy.get_parameters(timeout).await {
                Ok(params) => {
                    info!(client_id = proxy.client_id(), tensors = params.len(), "initial parameters received");
                    return Ok(params);
                }
                Err(e) => {
                    warn!(client_id = proxy.client_id(), error = %e, "initial parameter request failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn run_round(&mut self, round: u32) -> Result<RoundRecord> {
        let pool = self.clients.len();

        self.phase.advance(RoundPhase::Selecting)?;
        let count = match self.strategy.num_fit_clients(pool) {
            Ok(count) => count,
            Err(e) => return self.abort(round, e),
        };
        let selected = select_clients(&mut self.rng, pool, count);
        debug!(round, selected = ?selected, "fit cohort selected");

        self.phase.advance(RoundPhase::Broadcasting)?;
        let fit_config = self.strategy.configure_fit(round);
        let global = self
            .parameters
            .clone()
            .ok_or_else(|| Error::Configuration("global parameters not initialized".to_string()))?;

        self.phase.advance(RoundPhase::Collecting)?;
        let (results, fit_failures) = self.collect_fit(round, &selected, &global, &fit_config).await;
        let min_fit = self.strategy.config().min_fit_clients;
        if results.len() < min_fit {
            return self.abort(round, Error::quorum("fit", min_fit, results.len()));
        }

        self.phase.advance(RoundPhase::Aggregating)?;
        let fit_clients = results.len();
        let inputs: Vec<(ParameterSet, u64)> = results
            .into_iter()
            .map(|r| (r.parameters, r.num_examples))
            .collect();
        match self.strategy.aggregate_fit(&inputs) {
            Ok(aggregated) => self.parameters = Some(aggregated),
            Err(e) => return self.reset(round, e),
        }
        debug!(round, n_results = fit_clients, "fit results aggregated");

        self.phase.advance(RoundPhase::Reporting)?;
        let mut record = RoundRecord::new(round, fit_clients, fit_failures);
        let eval_count = match self.strategy.num_evaluate_clients(pool) {
            Ok(count) => count,
            Err(e) => return self.abort(round, e),
        };
        if eval_count > 0 {
            let selected = select_clients(&mut self.rng, pool, eval_count);
            let global = self
                .parameters
                .clone()
                .ok_or_else(|| Error::Configuration("global parameters not initialized".to_string()))?;
            let results = self.collect_evaluate(round, &selected, &global).await;

            let min_eval = self.strategy.config().min_evaluate_clients;
            if results.len() < min_eval {
                return self.abort(round, Error::quorum("evaluate", min_eval, results.len()));
            }
            let (loss, metrics) = match self.aggregate_evaluation(&results) {
                Ok(aggregated) => aggregated,
                Err(e) => return self.abort(round, e),
            };
            record = record.with_evaluation(loss, metrics);
        }

        self.history.push(record.clone());
        self.phase.advance(RoundPhase::Idle)?;
        Ok(record)
    }

    /// Fit on every selected client concurrently and wait for all of them.
    ///
    /// Returns the accepted results (clipped where configured) and the
    /// number of excluded clients.
    async fn collect_fit(
        &self,
        round: u32,
        selected: &[usize],
        global: &ParameterSet,
        config: &FitConfig,
    ) -> (Vec<FitResult>, usize) {
        let timeout = self.config.client_timeout();
        let calls = selected.iter().map(|&i| {
            let proxy = &self.clients[i];
            async move {
                let outcome = proxy
                    .fit(global.clone(), config.clone(), timeout)
                    .await
                    .and_then(|res| {
                        global.check_compatible(&res.parameters)?;
                        if !res.parameters.is_finite() {
                            return Err(Error::ClientInvocation {
                                client_id: proxy.client_id().to_string(),
                                reason: "returned non-finite parameters".to_string(),
                            });
                        }
                        Ok(res)
                    });
                (proxy, outcome)
            }
        });

        let mut accepted = Vec::with_capacity(selected.len());
        let mut failures = 0;
        let mut total: u64 = 0;
        for (proxy, outcome) in join_all(calls).await {
            match outcome {
                Ok(res) if res.num_examples == 0 => {
                    warn!(round, client_id = proxy.client_id(), "fit returned no samples; client excluded");
                    failures += 1;
                }
                Ok(res) if total.checked_add(res.num_examples).is_none() => {
                    warn!(
                        round,
                        client_id = proxy.client_id(),
                        num_examples = res.num_examples,
                        "fit sample count overflows round total; client excluded"
                    );
                    failures += 1;
                }
                Ok(mut res) => {
                    total += res.num_examples;
                    if let Some(defense) = proxy.defense() {
                        debug!(
                            round,
                            client_id = proxy.client_id(),
                            norms = ?res.parameters.tensor_norms(),
                            max_norm = defense.max_norm(),
                            "clipping update"
                        );
                        res.parameters = defense.apply(&res.parameters);
                    }
                    accepted.push(res);
                }
                Err(e) => {
                    warn!(round, client_id = proxy.client_id(), error = %e, "fit failed; client excluded");
                    failures += 1;
                }
            }
        }
        (accepted, failures)
    }

    /// Evaluate on every selected client concurrently and wait for all.
    async fn collect_evaluate(
        &self,
        round: u32,
        selected: &[usize],
        global: &ParameterSet,
    ) -> Vec<EvalResult> {
        let timeout = self.config.client_timeout();
        let calls = selected.iter().map(|&i| {
            let proxy = &self.clients[i];
            async move { (proxy, proxy.evaluate(global.clone(), timeout).await) }
        });

        let mut accepted = Vec::with_capacity(selected.len());
        for (proxy, outcome) in join_all(calls).await {
            match outcome {
                Ok(res) if res.num_examples == 0 => {
                    warn!(round, client_id = proxy.client_id(), "evaluate returned no samples; client excluded");
                }
                Ok(res) if !res.loss.is_finite() || res.metrics.values().any(|v| !v.is_finite()) => {
                    warn!(round, client_id = proxy.client_id(), "evaluate returned non-finite values; client excluded");
                }
                Ok(res) => accepted.push(res),
                Err(e) => {
                    warn!(round, client_id = proxy.client_id(), error = %e, "evaluate failed; client excluded");
                }
            }
        }
        accepted
    }

    fn aggregate_evaluation(&self, results: &[EvalResult]) -> Result<(f64, Metrics)> {
        let losses: Vec<(f64, u64)> = results.iter().map(|r| (r.loss, r.num_examples)).collect();
        let metrics: Vec<(Metrics, u64)> = results
            .iter()
            .map(|r| (r.metrics.clone(), r.num_examples))
            .collect();
        Ok((weighted_loss_avg(&losses)?, self.strategy.aggregate_evaluate(&metrics)?))
    }

    /// Return to `Idle` and report `err`; the global model is left as it
    /// was before the round.
    fn reset<T>(&mut self, round: u32, err: Error) -> Result<T> {
        warn!(round, phase = %self.phase.current(), error = %err, "round failed");
        self.phase.reset()?;
        Err(err)
    }

    /// Move to `Aborted` and return `err`.
    fn abort<T>(&mut self, round: u32, err: Error) -> Result<T> {
        warn!(round, phase = %self.phase.current(), error = %err, "round aborted");
        self.phase.abort()?;
        Err(err)
    }
}

impl<S: AggregationStrategy> std::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("strategy", &self.strategy.name())
            .field("config", &self.config)
            .field("clients", &self.clients)
            .field("phase", &self.phase.current())
            .field("rounds", &self.history.len())
            .finish()
    }
}
