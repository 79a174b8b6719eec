use criterion::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sgm::*;

fn circle(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, 2), |(i, j)| {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
        if j == 0 {
            angle.cos()
        } else {
            angle.sin()
        }
    })
}

fn discretize_forward(sde: &VariancePreserving) {
    let x = dvector![0.3, -0.7];
    for t in sde.schedule().iter() {
        black_box(sde.discretize(&x, t));
    }
}

fn discretize_reverse(sde: &VariancePreserving, score: &EmpiricalScore<'_, VariancePreserving>) {
    let reverse = sde.reverse(score);
    let x = dvector![0.3, -0.7];
    for t in sde.schedule().iter() {
        black_box(reverse.discretize(&x, t));
    }
}

fn sample(sde: &VariancePreserving, score: &EmpiricalScore<'_, VariancePreserving>) {
    let sampler = Sampler::builder()
        .solver(EulerMaruyama::new(sde.reverse(score)))
        .dim(2)
        .nsamples(64)
        .build()
        .unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    black_box(sampler.sample(&mut rng).unwrap());
}

fn criterion_benchmark(c: &mut Criterion) {
    let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
    let data = circle(32);
    let score = EmpiricalScore::from_rows(&sde, &data).unwrap();

    c.bench_function("discretize_forward", |b| b.iter(|| discretize_forward(&sde)));
    c.bench_function("discretize_reverse", |b| {
        b.iter(|| discretize_reverse(&sde, &score))
    });

    let mut group = c.benchmark_group("sampling");
    group.sample_size(10);
    group.bench_function("empirical_circle", |b| b.iter(|| sample(&sde, &score)));
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
