#[macro_use]
extern crate criterion;

use std::collections::HashMap;

use criterion::Criterion;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use eventrec::data::{Dataset, IdMapping};
use eventrec::models::factorization::HybridFactorizationModel;
use eventrec::recommender::RecommenderAssets;

fn mapping(prefix: &str, len: usize) -> IdMapping {
    let forward: HashMap<String, usize> = (0..len)
        .map(|idx| (format!("{}-{}", prefix, idx), idx))
        .collect();

    IdMapping::new(forward).unwrap()
}

fn random_assets(num_users: usize, num_items: usize, latent_dim: usize) -> RecommenderAssets {
    let mut rng = StdRng::seed_from_u64(42);

    let model = HybridFactorizationModel::new(
        Array2::from_shape_fn((num_users, latent_dim), |_| rng.gen_range(-1.0..1.0)),
        Array2::from_shape_fn((num_items, latent_dim), |_| rng.gen_range(-1.0..1.0)),
        Array1::from_shape_fn(num_users, |_| rng.gen_range(-1.0..1.0)),
        Array1::from_shape_fn(num_items, |_| rng.gen_range(-1.0..1.0)),
    )
    .unwrap();

    RecommenderAssets::new(
        model,
        Dataset::new(mapping("user", num_users), mapping("event", num_items)),
        Array2::eye(num_users),
        Array2::eye(num_items),
    )
    .unwrap()
}

fn bench_recommend(c: &mut Criterion) {
    c.bench_function("recommend", |b| {
        let assets = random_assets(200, 1000, 32);

        b.iter(|| {
            assets.recommend("user-17", 10).unwrap();
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_recommend
}
criterion_main!(benches);
