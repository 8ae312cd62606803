//! # fedguard - round-based federated learning with update clipping
//!
//! A coordinator that trains a shared model across clients whose data never
//! leaves them:
//! - **Coordinator**: seeded client sampling, per-round barrier, quorum checks
//! - **FedAvg**: sample-count weighted aggregation of parameters and metrics
//! - **ClipDefense**: per-tensor L2 clipping of client updates
//! - **Transport**: learners served over TCP with compressed frames
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedguard::federated::{
//!     split_iid, synthetic_binary, train_test_split, ClientConfig, Coordinator,
//!     CoordinatorConfig, LogisticLearner,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> fedguard::Result<()> {
//!     let data = synthetic_binary(600, 4, 2.0, 42);
//!     let (train, test) = train_test_split(&data, 0.2, 42)?;
//!
//!     let mut coordinator = Coordinator::new(CoordinatorConfig::default().with_rounds(5))?;
//!     for (i, shard) in split_iid(&train, 2, 42)?.into_iter().enumerate() {
//!         let config = if i == 1 { ClientConfig::malicious().with_clip(1.0) } else { ClientConfig::honest() };
//!         let learner = LogisticLearner::new(shard, test.clone());
//!         coordinator.register(&format!("client-{}", i), config, Arc::new(learner))?;
//!     }
//!
//!     let history = coordinator.run().await?;
//!     println!("{}", history.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod federated;
pub mod monitoring;
pub mod transport;

pub use core::error::{Error, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
