use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fedguard::federated::{clip, AggregationStrategy, FedAvg, ParameterSet};
use ndarray::ArrayD;

fn client_update(seed: usize, n_params: usize) -> ParameterSet {
    let weights = ArrayD::from_shape_fn(vec![n_params / 100, 100], |ix| {
        ((seed * n_params + ix[0] * 100 + ix[1]) as f32).sin()
    });
    let bias = ArrayD::from_shape_fn(vec![100], |ix| (seed + ix[0]) as f32 * 0.01);
    ParameterSet::new(vec![weights, bias])
}

fn bench_aggregation(c: &mut Criterion) {
    let strategy = FedAvg::default();
    let mut group = c.benchmark_group("aggregation");

    for &n_clients in &[10, 50] {
        for &n_params in &[1_000usize, 100_000] {
            let results: Vec<(ParameterSet, u64)> = (0..n_clients)
                .map(|i| (client_update(i, n_params), 100 + i as u64))
                .collect();
            let id = format!("{}c_{}p", n_clients, n_params);

            group.bench_with_input(BenchmarkId::new("fedavg", &id), &results, |b, results| {
                b.iter(|| strategy.aggregate_fit(results).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_clip(c: &mut Criterion) {
    let mut group = c.benchmark_group("clip");

    for &n_params in &[1_000usize, 100_000, 1_000_000] {
        let update = client_update(1, n_params);
        group.bench_with_input(BenchmarkId::new("l2", n_params), &update, |b, update| {
            b.iter(|| clip(update, 1.0))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregation, bench_clip);
criterion_main!(benches);
