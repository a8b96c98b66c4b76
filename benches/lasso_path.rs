use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use knockbench::selection::construction::{KnockoffMethod, KnockoffSampler, MvrOptions};
use knockbench::selection::covariance::toeplitz_correlation;
use knockbench::selection::CvLasso;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

fn sparse_problem(n: usize, p: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(0x1A55_0 + (n * p) as u64);
    let x = Array2::from_shape_simple_fn((n, p), || rng.sample::<f64, _>(StandardNormal));
    let beta = Array1::from_shape_fn(p, |j| if j % 10 == 0 { 1.5 } else { 0.0 });
    let noise = Array1::from_shape_simple_fn(n, || rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&beta) + noise;
    (x, y)
}

fn benchmark_cv_lasso(c: &mut Criterion) {
    let shapes = [(200_usize, 50_usize), (200, 200), (500, 400)];
    let problems: Vec<_> = shapes
        .iter()
        .map(|&(n, p)| ((n, p), sparse_problem(n, p)))
        .collect();

    let lasso = CvLasso::with_folds(5);
    let mut group = c.benchmark_group("cv_lasso");
    group.sample_size(10);
    for ((n, p), (x, y)) in problems.iter() {
        group.throughput(Throughput::Elements((*n * *p) as u64));
        group.bench_with_input(
            BenchmarkId::new("fit_cv", format!("{n}x{p}")),
            &(x, y),
            |b, (x, y)| {
                b.iter(|| {
                    let mut rng = StdRng::seed_from_u64(7);
                    let fit = lasso.fit_cv(black_box(x.view()), black_box(y.view()), &mut rng);
                    black_box(fit.is_ok());
                });
            },
        );
    }
    group.finish();
}

fn benchmark_knockoff_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("knockoff_s");
    group.sample_size(10);
    for p in [50_usize, 200] {
        let sigma = toeplitz_correlation(p, 0.4);
        for method in [KnockoffMethod::Equi, KnockoffMethod::Mvr] {
            group.bench_with_input(
                BenchmarkId::new(format!("{method:?}"), p),
                &sigma,
                |b, sigma| {
                    b.iter(|| {
                        let sampler =
                            KnockoffSampler::build(black_box(sigma), method, &MvrOptions::default());
                        black_box(sampler.is_ok());
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(lasso_path, benchmark_cv_lasso, benchmark_knockoff_construction);
criterion_main!(lasso_path);
