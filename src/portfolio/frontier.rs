//! # Efficient Frontier
//!
//! $$
//! \max_{\mathbf{w}} \ \mathbf{w}^\top\mu
//! \quad \text{s.t.} \quad \mathbf{w}^\top \Sigma \mathbf{w} = \sigma^{\*2},\
//! \mathbf{1}^\top \mathbf{w} = 1,\ \ell \le \mathbf{w} \le u
//! $$
//!
//! Owns the problem data and exposes the optimisation modes: tangency,
//! minimum volatility, closed-form utility, custom objectives and the two
//! efficient frontier targets. Target modes are validated after the solve.

use std::path::Path;

use nalgebra::DMatrix;
use nalgebra::DVector;

use super::analytic;
use super::bounds::Bounds;
use super::bounds::BoundsNormalizer;
use super::bounds::WeightBounds;
use super::constraints::Constraint;
use super::constraints::ConstraintBuilder;
use super::constraints::Target;
use super::objectives::portfolio_return;
use super::objectives::portfolio_variance;
use super::objectives::NegativeMeanReturn;
use super::objectives::NegativeSharpe;
use super::objectives::Objective;
use super::objectives::ObjectiveContext;
use super::objectives::Volatility;
use super::performance;
use super::report;
use super::solver::minimize;
use super::solver::SolveReport;
use super::solver::SolverConfig;
use super::types::resolve_tickers;
use super::types::Allocation;
use super::types::CovarianceMatrix;
use super::types::Diagnostic;
use super::types::DiagnosticKind;
use super::types::ExpectedReturns;
use super::types::PortfolioPerformance;
use super::weights::save_weights;
use super::weights::WeightMapper;
use super::weights::Weights;
use crate::error::FrontierError;
use crate::error::Result;

/// Largest constraint violation a custom objective may leave without a diagnostic.
const KKT_FEASIBILITY: f64 = 1e-8;
/// Largest projected Lagrangian gradient a custom objective may leave without a diagnostic.
const KKT_STATIONARITY: f64 = 1e-6;

/// Closeness test used for post-solve validation: `|a - b| <= absolute + relative * |b|`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
  pub relative: f64,
  pub absolute: f64,
}

impl Default for Tolerance {
  fn default() -> Self {
    Self {
      relative: 1e-5,
      absolute: 1e-8,
    }
  }
}

impl Tolerance {
  pub fn is_close(&self, a: f64, b: f64) -> bool {
    (a - b).abs() <= self.absolute + self.relative * b.abs()
  }
}

/// Mean-variance optimiser over a fixed asset universe.
#[derive(Debug)]
pub struct EfficientFrontier {
  mapper: WeightMapper,
  expected_returns: Option<DVector<f64>>,
  cov_matrix: DMatrix<f64>,
  bounds: Bounds,
  gamma: f64,
  solver: SolverConfig,
  initial_guess: Vec<f64>,
  tolerance: Tolerance,
  constraints: Vec<Constraint>,
  setup_diagnostics: Vec<Diagnostic>,
  diagnostics: Vec<Diagnostic>,
  weights: Option<Vec<f64>>,
  last_report: Option<SolveReport>,
}

impl EfficientFrontier {
  /// Validates shapes and bounds eagerly. A negative `gamma` is accepted with a
  /// [`DiagnosticKind::NegativeGamma`] advisory.
  pub fn new(
    expected_returns: Option<ExpectedReturns>,
    cov_matrix: CovarianceMatrix,
    weight_bounds: impl Into<WeightBounds>,
    gamma: f64,
  ) -> Result<Self> {
    let n = cov_matrix.n_assets();
    let values = cov_matrix.values();
    if n == 0 {
      return Err(FrontierError::config("cov_matrix", "at least one asset is required"));
    }
    if !values.is_square() {
      return Err(FrontierError::config(
        "cov_matrix",
        format!("expected a square matrix, got {}x{}", values.nrows(), values.ncols()),
      ));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(FrontierError::config("cov_matrix", "entries must be finite"));
    }
    if let Some(mu) = &expected_returns {
      if mu.len() != n {
        return Err(FrontierError::config(
          "expected_returns",
          format!("{} returns for {n} assets", mu.len()),
        ));
      }
      if mu.values().iter().any(|v| !v.is_finite()) {
        return Err(FrontierError::config("expected_returns", "entries must be finite"));
      }
    }
    if !gamma.is_finite() {
      return Err(FrontierError::config("gamma", "must be a finite number"));
    }

    let tickers = resolve_tickers(expected_returns.as_ref(), &cov_matrix)?;
    let bounds = BoundsNormalizer::new(n).normalize(&weight_bounds.into())?;

    let mut setup_diagnostics = Vec::new();
    if gamma < 0.0 {
      tracing::warn!(gamma, "in most cases, gamma should be positive");
      setup_diagnostics.push(Diagnostic::new(
        DiagnosticKind::NegativeGamma,
        format!("gamma = {gamma}; in most cases gamma should be positive"),
      ));
    }

    Ok(Self {
      mapper: WeightMapper::new(tickers),
      expected_returns: expected_returns.map(|r| r.values().clone()),
      cov_matrix: values.clone(),
      bounds,
      gamma,
      solver: SolverConfig::default(),
      initial_guess: vec![1.0 / n as f64; n],
      tolerance: Tolerance::default(),
      constraints: Vec::new(),
      diagnostics: setup_diagnostics.clone(),
      setup_diagnostics,
      weights: None,
      last_report: None,
    })
  }

  pub fn with_solver(mut self, solver: SolverConfig) -> Self {
    self.solver = solver;
    self
  }

  /// Starting point of the iterative modes; defaults to `1/N` per asset.
  pub fn with_initial_guess(mut self, initial_guess: Vec<f64>) -> Result<Self> {
    if initial_guess.len() != self.n_assets() {
      return Err(FrontierError::config(
        "initial_guess",
        format!("{} values for {} assets", initial_guess.len(), self.n_assets()),
      ));
    }
    if initial_guess.iter().any(|v| !v.is_finite()) {
      return Err(FrontierError::config("initial_guess", "entries must be finite"));
    }
    self.initial_guess = initial_guess;
    Ok(self)
  }

  pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
    self.tolerance = tolerance;
    self
  }

  /// Extra constraint applied to every iterative mode.
  pub fn add_constraint(&mut self, constraint: Constraint) {
    self.constraints.push(constraint);
  }

  pub fn n_assets(&self) -> usize {
    self.mapper.tickers().len()
  }

  pub fn tickers(&self) -> &[String] {
    self.mapper.tickers()
  }

  /// Current bounds, including any market-neutral widening.
  pub fn bounds(&self) -> &Bounds {
    &self.bounds
  }

  pub fn gamma(&self) -> f64 {
    self.gamma
  }

  /// Construction advisories followed by those of the last optimisation.
  pub fn diagnostics(&self) -> &[Diagnostic] {
    &self.diagnostics
  }

  pub fn last_report(&self) -> Option<&SolveReport> {
    self.last_report.as_ref()
  }

  /// Weights of the last optimisation or [`EfficientFrontier::set_weights`] call.
  pub fn weights(&self) -> Result<Weights> {
    self
      .weights
      .as_deref()
      .map(|w| self.mapper.to_weights(w))
      .ok_or(FrontierError::NotOptimized)
  }

  /// Replace the stored weights; every ticker must be present.
  pub fn set_weights(&mut self, weights: &Weights) -> Result<()> {
    let values = self.mapper.from_map(&weights.to_map())?;
    self.weights = Some(values);
    self.last_report = None;
    Ok(())
  }

  /// Tangency portfolio.
  pub fn max_sharpe(&mut self, risk_free_rate: f64) -> Result<Allocation> {
    self.require_returns("max_sharpe")?;
    if !risk_free_rate.is_finite() {
      return Err(FrontierError::config("risk_free_rate", "must be a finite number"));
    }
    let constraints = self.builder().build(false, Target::None);
    let bounds = self.bounds.clone();
    self.run(&NegativeSharpe { risk_free_rate }, &bounds, &constraints, Vec::new())
  }

  pub fn min_volatility(&mut self) -> Result<Allocation> {
    let constraints = self.builder().build(false, Target::None);
    let bounds = self.bounds.clone();
    self.run(&Volatility, &bounds, &constraints, Vec::new())
  }

  /// Closed form `(delta * Sigma)^-1 mu`; bounds, gamma and constraints are ignored.
  pub fn max_unconstrained_utility(&mut self, risk_aversion: f64) -> Result<Allocation> {
    let mu = self.require_returns("max_unconstrained_utility")?;
    let w = analytic::max_unconstrained_utility(mu, &self.cov_matrix, risk_aversion)?;
    tracing::debug!(risk_aversion, "solved unconstrained utility");

    self.weights = Some(w.as_slice().to_vec());
    self.last_report = None;
    self.diagnostics = self.setup_diagnostics.clone();
    Ok(Allocation {
      weights: self.mapper.to_weights(w.as_slice()),
      diagnostics: self.diagnostics.clone(),
      report: None,
    })
  }

  /// Minimise any [`Objective`] under the budget, bounds and added constraints.
  ///
  /// Nothing guarantees the objective suits a gradient-based solver. The result
  /// carries a [`DiagnosticKind::SolverNotConverged`] advisory when the KKT
  /// residual of the returned point is large, but it is never an error.
  pub fn custom_objective<O>(&mut self, objective: &O) -> Result<Allocation>
  where
    O: Objective + ?Sized,
  {
    let constraints = self.builder().build(false, Target::None);
    let bounds = self.bounds.clone();
    let mut allocation = self.run(objective, &bounds, &constraints, Vec::new())?;

    if let Some(report) = &allocation.report {
      if report.constraint_violation > KKT_FEASIBILITY || report.stationarity > KKT_STATIONARITY {
        tracing::warn!(
          objective = objective.name(),
          violation = report.constraint_violation,
          stationarity = report.stationarity,
          "custom objective did not reach a KKT point"
        );
        let diag = Diagnostic::new(
          DiagnosticKind::SolverNotConverged,
          format!(
            "constraint violation {:.3e}, stationarity {:.3e}",
            report.constraint_violation, report.stationarity
          ),
        );
        self.diagnostics.push(diag.clone());
        allocation.diagnostics.push(diag);
      }
    }
    Ok(allocation)
  }

  /// Maximum return for a volatility of `target_risk`.
  ///
  /// `risk_free_rate` is validated for parity with [`EfficientFrontier::max_sharpe`]
  /// but does not enter the problem.
  pub fn efficient_risk(
    &mut self,
    target_risk: f64,
    risk_free_rate: f64,
    market_neutral: bool,
  ) -> Result<Allocation> {
    self.require_returns("efficient_risk")?;
    if !target_risk.is_finite() || target_risk < 0.0 {
      return Err(FrontierError::config(
        "target_risk",
        "must be a non-negative finite number",
      ));
    }
    if !risk_free_rate.is_finite() {
      return Err(FrontierError::config("risk_free_rate", "must be a finite number"));
    }

    let diagnostics = self.apply_market_neutral(market_neutral)?;
    let builder = self.builder();
    let constraints = builder.build(
      market_neutral,
      Target::Risk {
        cov: &self.cov_matrix,
        target_volatility: target_risk,
      },
    );
    let bounds = self.bounds.clone();
    let allocation = self.run(&NegativeMeanReturn, &bounds, &constraints, diagnostics)?;

    let variance = portfolio_variance(allocation.weights.values(), &self.cov_matrix);
    if !self.tolerance.is_close(variance, target_risk.powi(2)) {
      tracing::debug!(variance, target = target_risk.powi(2), "target risk missed");
      return Err(FrontierError::Infeasible(
        "please increase target_risk".to_string(),
      ));
    }
    Ok(allocation)
  }

  /// Minimum volatility for an expected return of `target_return`.
  pub fn efficient_return(&mut self, target_return: f64, market_neutral: bool) -> Result<Allocation> {
    self.require_returns("efficient_return")?;
    if !target_return.is_finite() || target_return < 0.0 {
      return Err(FrontierError::config(
        "target_return",
        "must be a non-negative finite number",
      ));
    }

    let diagnostics = self.apply_market_neutral(market_neutral)?;
    let constraints = match &self.expected_returns {
      Some(mu) => self.builder().build(
        market_neutral,
        Target::Return {
          mu,
          target_return,
        },
      ),
      None => return Err(FrontierError::config("expected_returns", "required")),
    };
    let bounds = self.bounds.clone();
    let allocation = self.run(&Volatility, &bounds, &constraints, diagnostics)?;

    let achieved = self
      .expected_returns
      .as_ref()
      .map(|mu| portfolio_return(allocation.weights.values(), mu))
      .unwrap_or(f64::NAN);
    if !self.tolerance.is_close(achieved, target_return) {
      tracing::debug!(achieved, target = target_return, "target return missed");
      return Err(FrontierError::Infeasible(
        "please reduce target_return".to_string(),
      ));
    }
    Ok(allocation)
  }

  /// Expected return, volatility and Sharpe ratio of the stored weights.
  pub fn portfolio_performance(
    &self,
    verbose: bool,
    risk_free_rate: f64,
  ) -> Result<PortfolioPerformance> {
    let w = self.weights.as_deref().ok_or(FrontierError::NotOptimized)?;
    let mu = self.require_returns("portfolio_performance")?;
    let perf = performance::portfolio_performance(w, mu, &self.cov_matrix, risk_free_rate);
    if verbose {
      report::performance_table(&perf).printstd();
    }
    Ok(perf)
  }

  /// Stored weights with tiny entries zeroed and the rest rounded.
  pub fn clean_weights(&self, cutoff: f64, rounding: Option<u32>) -> Result<Weights> {
    self.weights()?.clean(cutoff, rounding)
  }

  /// Cleaned weights written as csv, json or txt depending on the extension.
  pub fn save_weights_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
    let cleaned = self.clean_weights(1e-4, Some(5))?;
    save_weights(&cleaned, path)
  }

  fn builder(&self) -> ConstraintBuilder {
    ConstraintBuilder::new(self.n_assets()).with_constraints(&self.constraints)
  }

  fn require_returns(&self, mode: &str) -> Result<&DVector<f64>> {
    self
      .expected_returns
      .as_ref()
      .ok_or_else(|| FrontierError::config("expected_returns", format!("required for {mode}")))
  }

  /// Widen the stored bounds when a market-neutral solve could not short anything.
  fn apply_market_neutral(&mut self, market_neutral: bool) -> Result<Vec<Diagnostic>> {
    if !market_neutral {
      return Ok(Vec::new());
    }
    let adjustment = self.builder().market_neutral_bounds(&self.bounds)?;
    if !adjustment.widened {
      return Ok(Vec::new());
    }
    tracing::warn!("market neutrality requires shorting, bounds have been amended to (-1, 1)");
    self.bounds = adjustment.bounds;
    Ok(vec![Diagnostic::new(
      DiagnosticKind::BoundsWidened,
      "market neutrality requires shorting; bounds amended to (-1, 1)",
    )])
  }

  fn run<O>(
    &mut self,
    objective: &O,
    bounds: &Bounds,
    constraints: &[Constraint],
    call_diagnostics: Vec<Diagnostic>,
  ) -> Result<Allocation>
  where
    O: Objective + ?Sized,
  {
    let ctx = ObjectiveContext {
      expected_returns: self.expected_returns.as_ref(),
      cov_matrix: &self.cov_matrix,
      gamma: self.gamma,
    };
    let solution = minimize(
      &ObjectiveRef(objective),
      ctx,
      &self.initial_guess,
      bounds,
      constraints,
      &self.solver,
    )?;
    tracing::debug!(
      objective = objective.name(),
      converged = solution.report.converged,
      outer = solution.report.outer_iterations,
      inner = solution.report.inner_iterations,
      "optimisation finished"
    );

    let mut diagnostics = self.setup_diagnostics.clone();
    diagnostics.extend(call_diagnostics);
    let weights = self.mapper.to_weights(&solution.weights);
    self.weights = Some(solution.weights);
    self.last_report = Some(solution.report.clone());
    self.diagnostics = diagnostics.clone();

    Ok(Allocation {
      weights,
      diagnostics,
      report: Some(solution.report),
    })
  }
}

/// Sized wrapper so unsized objectives can be passed as `&dyn Objective`.
struct ObjectiveRef<'a, O: ?Sized>(&'a O);

impl<O: Objective + ?Sized> Objective for ObjectiveRef<'_, O> {
  fn evaluate(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
    self.0.evaluate(w, ctx)
  }

  fn gradient(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> Vec<f64> {
    self.0.gradient(w, ctx)
  }

  fn name(&self) -> &str {
    self.0.name()
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use tracing_test::traced_test;

  use super::*;
  use crate::portfolio::objectives::mat_vec_mul;
  use crate::portfolio::solver::SolverMethod;

  fn diagonal_frontier() -> EfficientFrontier {
    let mu = ExpectedReturns::labeled([("AAA", 0.10), ("BBB", 0.20), ("CCC", 0.15)]);
    let cov = CovarianceMatrix::new(DMatrix::from_diagonal(&DVector::from_vec(vec![
      0.04, 0.09, 0.06,
    ])));
    EfficientFrontier::new(Some(mu), cov, WeightBounds::default(), 0.0).unwrap()
  }

  fn random_problem(n: usize, seed: u64) -> (DVector<f64>, DMatrix<f64>) {
    random_problem_with_ridge(n, seed, 0.01)
  }

  fn random_problem_with_ridge(n: usize, seed: u64, ridge: f64) -> (DVector<f64>, DMatrix<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-0.3..0.3));
    let cov = &a * a.transpose() / n as f64 + DMatrix::identity(n, n) * ridge;
    let mu = DVector::from_fn(n, |_, _| rng.gen_range(0.02..0.25));
    (mu, cov)
  }

  fn assert_within_bounds(ef: &EfficientFrontier, alloc: &Allocation) {
    assert_eq!(alloc.weights.len(), ef.n_assets());
    assert!(ef.bounds().contains(alloc.weights.values(), 1e-9));
  }

  #[test]
  fn min_volatility_prefers_lowest_variance_asset() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let alloc = ef.min_volatility()?;
    assert_within_bounds(&ef, &alloc);
    assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(alloc.weights["AAA"], 0.473684, epsilon = 1e-5);
    assert_relative_eq!(alloc.weights["BBB"], 0.210526, epsilon = 1e-5);
    assert_relative_eq!(alloc.weights["CCC"], 0.315789, epsilon = 1e-5);
    assert!(alloc.weights.values().iter().all(|&w| w >= 0.0));
    assert!(alloc.report.as_ref().is_some_and(|r| r.converged));
    Ok(())
  }

  #[test]
  fn min_volatility_beats_random_feasible_portfolios() -> anyhow::Result<()> {
    let (mu, cov) = random_problem(6, 11);
    let mut ef = EfficientFrontier::new(
      Some(ExpectedReturns::from(mu)),
      CovarianceMatrix::new(cov.clone()),
      (0.0, 1.0),
      0.0,
    )?;
    let alloc = ef.min_volatility()?;
    assert_within_bounds(&ef, &alloc);
    assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-6);

    let best = portfolio_variance(alloc.weights.values(), &cov);
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..2000 {
      let raw: Vec<f64> = (0..6).map(|_| rng.gen::<f64>()).collect();
      let total: f64 = raw.iter().sum();
      let sample: Vec<f64> = raw.iter().map(|v| v / total).collect();
      assert!(best <= portfolio_variance(&sample, &cov) + 1e-10);
    }
    Ok(())
  }

  #[test]
  fn max_sharpe_finds_tangency_portfolio() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let alloc = ef.max_sharpe(0.02)?;
    assert_within_bounds(&ef, &alloc);
    // Sigma^-1 (mu - rf) is proportional to [2, 2, 13/6] for a diagonal covariance
    let total = 2.0 + 2.0 + 13.0 / 6.0;
    assert_relative_eq!(alloc.weights["AAA"], 2.0 / total, epsilon = 1e-5);
    assert_relative_eq!(alloc.weights["BBB"], 2.0 / total, epsilon = 1e-5);
    assert_relative_eq!(alloc.weights["CCC"], 13.0 / 6.0 / total, epsilon = 1e-5);

    let perf = ef.portfolio_performance(false, 0.02)?;
    assert_relative_eq!(perf.sharpe_ratio, 0.895358, epsilon = 1e-5);
    Ok(())
  }

  #[test]
  fn max_sharpe_requires_expected_returns() {
    let cov = CovarianceMatrix::new(DMatrix::identity(2, 2));
    let mut ef = EfficientFrontier::new(None, cov, (0.0, 1.0), 0.0).unwrap();
    assert!(matches!(
      ef.max_sharpe(0.02),
      Err(FrontierError::Configuration { .. })
    ));
    assert!(ef.min_volatility().is_ok());
  }

  #[test]
  fn efficient_return_hits_target() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let alloc = ef.efficient_return(0.17, false)?;
    assert_within_bounds(&ef, &alloc);
    assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-6);
    let perf = ef.portfolio_performance(false, 0.02)?;
    assert!(Tolerance::default().is_close(perf.expected_return, 0.17));
    Ok(())
  }

  #[test]
  fn efficient_risk_hits_target() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let alloc = ef.efficient_risk(0.2, 0.02, false)?;
    assert_within_bounds(&ef, &alloc);
    assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-6);
    let variance = portfolio_variance(alloc.weights.values(), &ef.cov_matrix);
    assert!(Tolerance::default().is_close(variance, 0.04));
    Ok(())
  }

  #[test]
  fn efficient_frontier_targets_on_correlated_universe() -> anyhow::Result<()> {
    let (mu, cov) = random_problem(6, 3);
    let target = mu.mean() + 0.02;
    let mut ef = EfficientFrontier::new(
      Some(ExpectedReturns::from(mu.clone())),
      CovarianceMatrix::new(cov.clone()),
      (0.0, 1.0),
      0.0,
    )?;
    let alloc = ef.efficient_return(target, false)?;
    assert_relative_eq!(portfolio_return(alloc.weights.values(), &mu), target, epsilon = 1e-6);

    let min_vol = ef.min_volatility()?;
    let sigma = portfolio_variance(min_vol.weights.values(), &cov).sqrt() * 1.3;
    let alloc = ef.efficient_risk(sigma, 0.02, false)?;
    assert_within_bounds(&ef, &alloc);
    assert_relative_eq!(
      portfolio_variance(alloc.weights.values(), &cov),
      sigma * sigma,
      max_relative = 1e-5
    );
    Ok(())
  }

  #[traced_test]
  #[test]
  fn market_neutral_widens_bounds_with_diagnostic() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let alloc = ef.efficient_risk(0.2, 0.02, true)?;
    assert!(alloc.has_diagnostic(DiagnosticKind::BoundsWidened));
    assert!(ef.bounds().iter().all(|b| b == (-1.0, 1.0)));
    assert_within_bounds(&ef, &alloc);
    assert_relative_eq!(alloc.weights.sum(), 0.0, epsilon = 1e-6);
    assert!(logs_contain("market neutrality requires shorting"));

    // bounds already allow shorting, so no further widening
    let alloc = ef.efficient_return(0.05, true)?;
    assert!(!alloc.has_diagnostic(DiagnosticKind::BoundsWidened));
    assert_relative_eq!(alloc.weights.sum(), 0.0, epsilon = 1e-6);
    let achieved = portfolio_return(alloc.weights.values(), ef.expected_returns.as_ref().unwrap());
    assert!(Tolerance::default().is_close(achieved, 0.05));
    Ok(())
  }

  #[test]
  fn unreachable_target_return_is_infeasible() {
    let mut ef = diagonal_frontier();
    let err = ef.efficient_return(10.0, false).unwrap_err();
    assert!(matches!(
      err,
      FrontierError::Infeasible(_) | FrontierError::Configuration { .. }
    ));
    assert!(err.to_string().contains("target_return"));
  }

  #[test]
  fn efficient_risk_below_minimum_volatility_is_infeasible() {
    // minimum volatility of the diagonal universe is about 0.1376
    for target in [0.05, 0.0] {
      let mut ef = diagonal_frontier();
      let err = ef.efficient_risk(target, 0.02, false).unwrap_err();
      assert!(matches!(err, FrontierError::Infeasible(_)));
      assert!(err.to_string().contains("increase target_risk"));
      let report = ef.last_report().expect("report of the rejected solve");
      assert!(!report.converged);
      assert!(report.outer_iterations < SolverConfig::default().max_outer_iters);
    }
  }

  #[test]
  fn thirty_asset_universe_reaches_kkt_points() -> anyhow::Result<()> {
    let n = 30;
    for seed in 0..5 {
      let (mu, cov) = random_problem_with_ridge(n, seed, 0.001);
      let mut ef = EfficientFrontier::new(
        Some(ExpectedReturns::from(mu.clone())),
        CovarianceMatrix::new(cov.clone()),
        (0.0, 1.0),
        0.0,
      )?;

      let alloc = ef.min_volatility()?;
      assert_within_bounds(&ef, &alloc);
      let report = alloc.report.as_ref().expect("iterative mode attaches a report");
      assert!(report.converged, "seed {seed}: {report:?}");
      assert!(report.stationarity < 1e-8, "seed {seed}: {report:?}");
      assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-12);
      // marginal variance is equal across every held asset
      let w = alloc.weights.values();
      let grad = mat_vec_mul(&cov, w);
      let held: Vec<f64> = grad
        .iter()
        .zip(w)
        .filter(|(_, wi)| **wi > 1e-4)
        .map(|(g, _)| *g)
        .collect();
      let spread = held.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        - held.iter().copied().fold(f64::INFINITY, f64::min);
      assert!(spread < 1e-7, "seed {seed}: spread {spread:e}");

      let min_vol = portfolio_variance(w, &cov).sqrt();
      let target = 1.5 * min_vol;
      let alloc = ef.efficient_risk(target, 0.02, false)?;
      assert_within_bounds(&ef, &alloc);
      assert!(alloc.report.as_ref().is_some_and(|r| r.converged));
      assert!(Tolerance::default().is_close(
        portfolio_variance(alloc.weights.values(), &cov),
        target.powi(2)
      ));

      let frontier_return = portfolio_return(alloc.weights.values(), &mu);
      let alloc = ef.efficient_return(0.9 * frontier_return + 0.1 * mu.min(), false)?;
      assert!(alloc.report.as_ref().is_some_and(|r| r.converged));
    }
    Ok(())
  }

  #[test]
  fn invalid_targets_are_configuration_errors() {
    let mut ef = diagonal_frontier();
    for result in [
      ef.efficient_risk(-0.1, 0.02, false),
      ef.efficient_risk(f64::NAN, 0.02, false),
      ef.efficient_risk(0.2, f64::INFINITY, false),
      ef.efficient_return(-0.05, false),
      ef.max_sharpe(f64::NAN),
    ] {
      assert!(matches!(result, Err(FrontierError::Configuration { .. })));
    }
  }

  #[test]
  fn unconstrained_utility_matches_closed_form() -> anyhow::Result<()> {
    let (mu, cov) = random_problem(4, 5);
    let mut ef = EfficientFrontier::new(
      Some(ExpectedReturns::from(mu.clone())),
      CovarianceMatrix::new(cov.clone()),
      (0.0, 1.0),
      0.5,
    )?;
    let alloc = ef.max_unconstrained_utility(2.0)?;
    let expected = (cov * 2.0).lu().solve(&mu).unwrap();
    for (w, e) in alloc.weights.values().iter().zip(expected.iter()) {
      assert_relative_eq!(*w, *e, epsilon = 1e-12);
    }
    assert!(alloc.report.is_none());
    Ok(())
  }

  #[test]
  fn zero_risk_aversion_is_rejected() {
    let mut ef = diagonal_frontier();
    assert!(matches!(
      ef.max_unconstrained_utility(0.0),
      Err(FrontierError::Configuration { .. })
    ));
  }

  #[test]
  fn performance_requires_weights_and_is_idempotent() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    assert!(matches!(
      ef.portfolio_performance(false, 0.02),
      Err(FrontierError::NotOptimized)
    ));
    assert!(matches!(ef.weights(), Err(FrontierError::NotOptimized)));

    ef.min_volatility()?;
    let first = ef.portfolio_performance(false, 0.02)?;
    let second = ef.portfolio_performance(true, 0.02)?;
    assert_eq!(first, second);
    let (ret, vol, sharpe): (f64, f64, f64) = first.into();
    assert_relative_eq!(sharpe, (ret - 0.02) / vol, epsilon = 1e-12);
    Ok(())
  }

  #[traced_test]
  #[test]
  fn negative_gamma_is_flagged_not_rejected() -> anyhow::Result<()> {
    let mu = ExpectedReturns::new(vec![0.1, 0.2]);
    let cov = CovarianceMatrix::new(DMatrix::from_diagonal(&DVector::from_vec(vec![0.04, 0.09])));
    let mut ef = EfficientFrontier::new(Some(mu), cov, (0.0, 1.0), -0.01)?;
    assert!(ef
      .diagnostics()
      .iter()
      .any(|d| d.kind == DiagnosticKind::NegativeGamma));
    assert!(logs_contain("gamma should be positive"));

    let alloc = ef.min_volatility()?;
    assert!(alloc.has_diagnostic(DiagnosticKind::NegativeGamma));
    Ok(())
  }

  #[test]
  fn construction_validates_inputs() {
    let cov = CovarianceMatrix::new(DMatrix::identity(3, 3));
    let short_mu = ExpectedReturns::new(vec![0.1, 0.2]);
    assert!(EfficientFrontier::new(Some(short_mu), cov.clone(), (0.0, 1.0), 0.0).is_err());
    assert!(EfficientFrontier::new(None, cov.clone(), (0.6, 0.4), 0.0).is_err());
    assert!(EfficientFrontier::new(None, cov.clone(), (0.0, 1.0), f64::NAN).is_err());
    assert!(EfficientFrontier::new(None, CovarianceMatrix::new(DMatrix::zeros(2, 3)), (0.0, 1.0), 0.0).is_err());

    let ef = EfficientFrontier::new(None, cov, (0.0, 1.0), 0.0).unwrap();
    assert_eq!(ef.tickers(), ["0", "1", "2"]);
    assert!(ef.with_initial_guess(vec![0.5, 0.5]).is_err());
  }

  #[test]
  fn per_asset_bounds_are_respected() -> anyhow::Result<()> {
    let mu = ExpectedReturns::new(vec![0.10, 0.20, 0.15]);
    let cov = CovarianceMatrix::new(DMatrix::from_diagonal(&DVector::from_vec(vec![
      0.04, 0.09, 0.06,
    ])));
    let mut ef = EfficientFrontier::new(
      Some(mu),
      cov,
      vec![(0.0, 0.3), (0.1, 1.0), (0.0, 1.0)],
      0.0,
    )?;
    for alloc in [ef.min_volatility()?, ef.max_sharpe(0.02)?] {
      assert_within_bounds(&ef, &alloc);
      assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-6);
    }
    Ok(())
  }

  fn variance_only(w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
    portfolio_variance(w, ctx.cov_matrix)
  }

  #[test]
  fn custom_objective_matches_builtin() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let builtin = ef.min_volatility()?;
    let custom = ef.custom_objective(&variance_only)?;
    for (a, b) in builtin.weights.values().iter().zip(custom.weights.values()) {
      assert_relative_eq!(*a, *b, epsilon = 1e-5);
    }
    assert!(!custom.has_diagnostic(DiagnosticKind::SolverNotConverged));
    assert_eq!(ef.last_report(), custom.report.as_ref());
    Ok(())
  }

  #[test]
  fn added_constraints_apply_to_every_mode() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    ef.add_constraint(Constraint::inequality("cap_aaa", |w: &[f64]| 0.3 - w[0]));
    let alloc = ef.min_volatility()?;
    assert_relative_eq!(alloc.weights["AAA"], 0.3, epsilon = 1e-5);
    // the remaining 0.7 is split in inverse-variance proportion
    assert_relative_eq!(alloc.weights["BBB"], 0.28, epsilon = 1e-5);
    assert_relative_eq!(alloc.weights["CCC"], 0.42, epsilon = 1e-5);

    let alloc = ef.efficient_return(0.16, false)?;
    assert!(alloc.weights["AAA"] <= 0.3 + 1e-6);
    Ok(())
  }

  #[test]
  fn nelder_mead_solver_is_selectable() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier().with_solver(SolverConfig::default().with_method("nm".parse()?));
    let alloc = ef.min_volatility()?;
    assert_eq!(alloc.report.as_ref().map(|r| r.method), Some(SolverMethod::NelderMead));
    assert_relative_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(alloc.weights["AAA"], 0.4737, epsilon = 1e-3);
    Ok(())
  }

  #[test]
  fn set_clean_and_save_weights() -> anyhow::Result<()> {
    let mut ef = diagonal_frontier();
    let manual = WeightMapper::new(ef.tickers().to_vec()).to_weights(&[0.5, 0.49999, 0.00001]);
    ef.set_weights(&manual)?;
    let cleaned = ef.clean_weights(1e-4, Some(3))?;
    assert_eq!(cleaned["CCC"], 0.0);
    assert_eq!(cleaned["BBB"], 0.5);

    let perf = ef.portfolio_performance(false, 0.0)?;
    assert_relative_eq!(perf.expected_return, 0.5 * 0.1 + 0.49999 * 0.2 + 0.00001 * 0.15, epsilon = 1e-12);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("weights.json");
    ef.save_weights_to_file(&path)?;
    let saved: std::collections::BTreeMap<String, f64> =
      serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved.len(), 3);
    assert_eq!(saved["CCC"], 0.0);

    let partial = WeightMapper::new(vec!["AAA".into()]).to_weights(&[1.0]);
    assert!(ef.set_weights(&partial).is_err());
    Ok(())
  }

  #[test]
  fn tolerance_follows_isclose_semantics() {
    let tol = Tolerance::default();
    assert!(tol.is_close(1.0, 1.0 + 5e-6));
    assert!(!tol.is_close(1.0, 1.0 + 5e-5));
    assert!(tol.is_close(0.0, 5e-9));
    assert!(!tol.is_close(0.0, 5e-8));
  }
}
