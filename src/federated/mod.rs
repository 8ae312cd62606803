//! Federated Learning Module
//!
//! Round-based training over clients that keep their data local:
//! - FedAvg aggregation weighted by sample count
//! - Quorum enforcement and seeded client sampling
//! - Per-tensor norm clipping of client updates
//! - Label-flip poisoning for exercising the defense

pub mod adversary;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod defense;
pub mod history;
pub mod learner;
pub mod logistic;
pub mod params;
pub mod phase;
pub mod proxy;
pub mod strategy;

pub use adversary::flip_binary_labels;
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use data::{split_iid, synthetic_binary, train_test_split, Dataset, StandardScaler};
pub use defense::{clip, ClipDefense};
pub use history::{RoundHistory, RoundRecord};
pub use learner::{EvaluateRes, FitConfig, FitRes, LocalLearner};
pub use logistic::{LogisticLearner, LogisticModel};
pub use params::ParameterSet;
pub use phase::{PhaseTracker, RoundPhase};
pub use proxy::{ClientConfig, ClientProxy, ClientRecord, EvalResult, FitResult};
pub use strategy::{AggregationStrategy, FedAvg, StrategyConfig};
