use efficient_frontier::portfolio::report::weights_table;
use efficient_frontier::portfolio::CovarianceMatrix;
use efficient_frontier::portfolio::EfficientFrontier;
use efficient_frontier::portfolio::ExpectedReturns;
use efficient_frontier::portfolio::SolverConfig;
use efficient_frontier::portfolio::SolverMethod;
use efficient_frontier::FrontierError;
use nalgebra::DMatrix;
use tracing_subscriber::EnvFilter;

const TICKERS: [&str; 5] = ["GOOG", "AAPL", "FB", "BABA", "AMZN"];

fn sample_universe() -> (ExpectedReturns, CovarianceMatrix) {
  let mu = ExpectedReturns::labeled(TICKERS.iter().copied().zip([0.12, 0.18, 0.15, 0.09, 0.21]));

  let vols = [0.22, 0.28, 0.31, 0.35, 0.30];
  let corr = DMatrix::from_row_slice(
    5,
    5,
    &[
      1.00, 0.45, 0.50, 0.30, 0.55, //
      0.45, 1.00, 0.40, 0.25, 0.50, //
      0.50, 0.40, 1.00, 0.35, 0.45, //
      0.30, 0.25, 0.35, 1.00, 0.30, //
      0.55, 0.50, 0.45, 0.30, 1.00,
    ],
  );
  let cov = DMatrix::from_fn(5, 5, |i, j| corr[(i, j)] * vols[i] * vols[j]);
  (mu, CovarianceMatrix::labeled(TICKERS, cov))
}

fn frontier(method: SolverMethod) -> anyhow::Result<EfficientFrontier> {
  let (mu, cov) = sample_universe();
  Ok(
    EfficientFrontier::new(Some(mu), cov, (0.0, 1.0), 0.0)?
      .with_solver(SolverConfig::default().with_method(method)),
  )
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let method = std::env::args()
    .nth(1)
    .map(|m| m.parse::<SolverMethod>())
    .transpose()?
    .unwrap_or_default();
  println!("solver: {method}");

  let mut ef = frontier(method)?;

  println!("\nMaximum Sharpe ratio");
  let alloc = ef.max_sharpe(0.02)?;
  weights_table(&ef.clean_weights(1e-4, Some(5))?).printstd();
  ef.portfolio_performance(true, 0.02)?;
  if let Some(report) = alloc.report {
    println!(
      "outer {} / inner {} iterations, violation {:.2e}",
      report.outer_iterations, report.inner_iterations, report.constraint_violation
    );
  }

  println!("\nMinimum volatility");
  ef.min_volatility()?;
  weights_table(&ef.clean_weights(1e-4, Some(5))?).printstd();
  ef.portfolio_performance(true, 0.02)?;

  println!("\nEfficient return (target 15%)");
  ef.efficient_return(0.15, false)?;
  weights_table(&ef.clean_weights(1e-4, Some(5))?).printstd();
  ef.portfolio_performance(true, 0.02)?;

  println!("\nEfficient risk (target 25%)");
  ef.efficient_risk(0.25, 0.02, false)?;
  weights_table(&ef.clean_weights(1e-4, Some(5))?).printstd();
  ef.portfolio_performance(true, 0.02)?;

  println!("\nMarket neutral efficient risk (target 25%)");
  let mut neutral = frontier(method)?;
  let alloc = neutral.efficient_risk(0.25, 0.02, true)?;
  for diag in &alloc.diagnostics {
    println!("note: {diag}");
  }
  weights_table(&neutral.clean_weights(1e-4, Some(5))?).printstd();

  println!("\nUnconstrained utility (risk aversion 3)");
  ef.max_unconstrained_utility(3.0)?;
  weights_table(&ef.clean_weights(1e-4, Some(5))?).printstd();

  match ef.efficient_return(5.0, false) {
    Err(FrontierError::Infeasible(msg)) => println!("\nTarget 500% rejected: {msg}"),
    other => println!("\nTarget 500% unexpectedly returned {:?}", other.map(|a| a.weights)),
  }

  Ok(())
}
