//! End-to-end federated runs over in-process and TCP learners

use fedguard::core::metrics;
use fedguard::federated::{
    split_iid, synthetic_binary, train_test_split, AggregationStrategy, ClientConfig,
    Coordinator, CoordinatorConfig, Dataset, FedAvg, LogisticLearner, ParameterSet,
    RoundHistory, RoundPhase, StandardScaler, StrategyConfig,
};
use fedguard::transport::{serve_learner, RemoteLearner};
use fedguard::Error;
use ndarray::array;
use std::sync::Arc;
use tokio::net::TcpListener;

fn partitions(num_clients: usize) -> (Vec<Dataset>, Dataset) {
    let data = synthetic_binary(480, 4, 4.0, 11);
    let (mut train, mut test) = train_test_split(&data, 0.25, 42).unwrap();
    let scaler = StandardScaler::fit(&train.features).unwrap();
    scaler.transform_dataset(&mut train);
    scaler.transform_dataset(&mut test);
    (split_iid(&train, num_clients, 42).unwrap(), test)
}

fn config(rounds: u32, min_clients: usize) -> CoordinatorConfig {
    CoordinatorConfig::default().with_rounds(rounds).with_strategy(
        StrategyConfig::default()
            .with_minimums(min_clients, min_clients, min_clients)
            .with_local_training(0.1, 2),
    )
}

async fn run_simulation(clients: &[ClientConfig], rounds: u32) -> RoundHistory {
    let (shards, test) = partitions(clients.len());
    let mut coordinator = Coordinator::new(config(rounds, clients.len())).unwrap();
    for (i, (shard, client)) in shards.into_iter().zip(clients).enumerate() {
        let learner = LogisticLearner::new(shard, test.clone());
        coordinator
            .register(&format!("client-{}", i), client.clone(), Arc::new(learner))
            .unwrap();
    }
    coordinator.run().await.unwrap()
}

fn final_accuracy(history: &RoundHistory) -> f64 {
    history.last().and_then(|r| r.accuracy()).unwrap()
}

#[tokio::test]
async fn test_honest_federation_converges() {
    let history = run_simulation(&vec![ClientConfig::honest(); 3], 5).await;

    assert_eq!(history.len(), 5);
    assert!(final_accuracy(&history) > 0.9);
    let losses = history.loss_series();
    assert!(losses.last().unwrap().1 < losses[0].1);
}

#[tokio::test]
async fn test_poisoning_majority_degrades_unclipped_model() {
    let clients = [
        ClientConfig::honest(),
        ClientConfig::malicious(),
        ClientConfig::malicious(),
    ];
    let history = run_simulation(&clients, 5).await;

    assert!(final_accuracy(&history) < 0.5);
}

#[tokio::test]
async fn test_clipping_limits_poisoned_updates() {
    let unclipped = run_simulation(
        &[
            ClientConfig::honest(),
            ClientConfig::malicious(),
            ClientConfig::malicious(),
        ],
        5,
    )
    .await;
    let clipped = run_simulation(
        &[
            ClientConfig::honest(),
            ClientConfig::malicious().with_clip(0.1),
            ClientConfig::malicious().with_clip(0.1),
        ],
        5,
    )
    .await;

    assert!(final_accuracy(&clipped) > final_accuracy(&unclipped));
    assert!(final_accuracy(&clipped) > 0.8);
}

#[tokio::test]
async fn test_remote_learners_over_tcp() {
    let (shards, test) = partitions(2);
    let mut coordinator = Coordinator::new(config(3, 2)).unwrap();

    for (i, shard) in shards.into_iter().enumerate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_learner(
            listener,
            Arc::new(LogisticLearner::new(shard, test.clone())),
        ));
        coordinator
            .register(
                &format!("remote-{}", i),
                ClientConfig::honest(),
                Arc::new(RemoteLearner::new(addr.to_string())),
            )
            .unwrap();
    }

    let history = coordinator.run().await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(final_accuracy(&history) > 0.9);
    assert_eq!(coordinator.parameters().unwrap().shapes(), vec![vec![2, 4], vec![2]]);
}

#[tokio::test]
async fn test_unreachable_client_breaks_quorum() {
    let (shards, test) = partitions(2);
    let mut coordinator = Coordinator::new(config(3, 3)).unwrap();
    for (i, shard) in shards.into_iter().enumerate() {
        coordinator
            .register(
                &format!("client-{}", i),
                ClientConfig::honest(),
                Arc::new(LogisticLearner::new(shard, test.clone())),
            )
            .unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    coordinator
        .register("gone", ClientConfig::honest(), Arc::new(RemoteLearner::new(dead.to_string())))
        .unwrap();

    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(err, Error::Quorum { needed: 3, actual: 2, .. }));
    assert!(coordinator.history().is_empty());
    assert_eq!(coordinator.phase(), RoundPhase::Aborted);
}

#[test]
fn test_weighted_evaluation_metrics() {
    let strategy = FedAvg::default();
    let agg = strategy
        .aggregate_evaluate(&[
            (metrics([("accuracy", 0.80)]), 100),
            (metrics([("accuracy", 0.90)]), 300),
        ])
        .unwrap();
    assert!((agg["accuracy"] - 0.875).abs() < 1e-12);
}

#[test]
fn test_fedavg_weights_by_sample_count() {
    let strategy = FedAvg::default();
    let small = ParameterSet::new(vec![array![100.0f32].into_dyn()]);
    let large = ParameterSet::new(vec![array![1.0f32].into_dyn()]);

    let agg = strategy.aggregate_fit(&[(small, 1), (large, 99)]).unwrap();
    assert!((agg.tensors()[0][[0]] - 1.99).abs() < 1e-4);
}
