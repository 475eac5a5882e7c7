use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BenchmarkId;
use criterion::Criterion;
use efficient_frontier::portfolio::CovarianceMatrix;
use efficient_frontier::portfolio::EfficientFrontier;
use efficient_frontier::portfolio::ExpectedReturns;
use efficient_frontier::portfolio::SolverConfig;
use efficient_frontier::portfolio::SolverMethod;
use nalgebra::DMatrix;
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

fn random_universe(n: usize) -> (ExpectedReturns, CovarianceMatrix) {
  let mut rng = StdRng::seed_from_u64(42);
  let a = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-0.3..0.3));
  let cov = &a * a.transpose() / n as f64 + DMatrix::identity(n, n) * 0.01;
  let mu = DVector::from_fn(n, |_, _| rng.gen_range(0.02..0.25));
  (ExpectedReturns::from(mu), CovarianceMatrix::new(cov))
}

fn frontier(n: usize, method: SolverMethod) -> EfficientFrontier {
  let (mu, cov) = random_universe(n);
  EfficientFrontier::new(Some(mu), cov, (0.0, 1.0), 0.0)
    .unwrap()
    .with_solver(SolverConfig::default().with_method(method))
}

fn bench_min_volatility(c: &mut Criterion) {
  let mut group = c.benchmark_group("min_volatility");

  for &n in &[5, 10, 25, 50] {
    group.bench_with_input(BenchmarkId::new("spg", n), &n, |b, &n| {
      let mut ef = frontier(n, SolverMethod::AugmentedLagrangian);
      b.iter(|| black_box(ef.min_volatility().unwrap()));
    });
  }

  group.finish();
}

fn bench_modes(c: &mut Criterion) {
  let mut group = c.benchmark_group("modes_n10");
  let n = 10usize;

  group.bench_function("max_sharpe", |b| {
    let mut ef = frontier(n, SolverMethod::AugmentedLagrangian);
    b.iter(|| black_box(ef.max_sharpe(0.02).unwrap()));
  });

  group.bench_function("efficient_return", |b| {
    let mut ef = frontier(n, SolverMethod::AugmentedLagrangian);
    ef.min_volatility().unwrap();
    let base = ef.portfolio_performance(false, 0.0).unwrap().expected_return;
    b.iter(|| black_box(ef.efficient_return(base + 0.01, false).ok()));
  });

  group.bench_function("max_unconstrained_utility", |b| {
    let mut ef = frontier(n, SolverMethod::AugmentedLagrangian);
    b.iter(|| black_box(ef.max_unconstrained_utility(2.0).unwrap()));
  });

  group.finish();
}

fn bench_solver_methods(c: &mut Criterion) {
  let mut group = c.benchmark_group("solver_method_n5");
  group.sample_size(10);

  for method in [SolverMethod::AugmentedLagrangian, SolverMethod::NelderMead] {
    group.bench_function(method.to_string(), |b| {
      let mut ef = frontier(5, method);
      b.iter(|| black_box(ef.min_volatility().unwrap()));
    });
  }

  group.finish();
}

criterion_group!(benches, bench_min_volatility, bench_modes, bench_solver_methods);
criterion_main!(benches);
