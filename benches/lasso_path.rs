use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ndarray::{Array1, Array2};
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use saob::lasso::{LassoSettings, lasso_cv};
use saob::preprocess::FactorMatrix;

// Sized like a meta-analysis: a few dozen observations, a few dozen factor columns.
fn random_problem(n: usize, p: usize) -> (FactorMatrix, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(0x5EED + n as u64);
    let values: Array2<f64> = Array2::from_shape_fn((n, p), |_| rng.sample(Standard));
    let y = Array1::from_shape_fn(n, |i| {
        values[[i, 0]] - 0.5 * values[[i, 1]] + 0.1 * rng.sample::<f64, _>(Standard)
    });
    let names = (0..p).map(|j| format!("factor{j}")).collect();
    (FactorMatrix { names, values }, y)
}

fn benchmark_lasso_cv(c: &mut Criterion) {
    let settings = LassoSettings::default();
    let mut group = c.benchmark_group("lasso_cv_loo");
    group.sample_size(10);
    for (n, p) in [(30_usize, 10_usize), (60, 30)] {
        let (x, y) = random_problem(n, p);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n}x{p}")),
            &(x, y),
            |b, (x, y)| {
                b.iter(|| {
                    let result = lasso_cv(black_box(x), black_box(y), &settings);
                    black_box(result.map(|r| r.alpha).unwrap_or(f64::NAN));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark_lasso_cv);
criterion_main!(benches);
