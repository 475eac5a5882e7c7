//! # Portfolio Types
//!
//! $$
//! S = \frac{\mathbf{w}^\top\mu - r_f}{\sqrt{\mathbf{w}^\top \Sigma \mathbf{w}}}
//! $$
//!
//! Labelled optimizer inputs, the performance tuple and advisory diagnostics.

use std::collections::HashSet;
use std::fmt;

use nalgebra::DMatrix;
use nalgebra::DVector;

use super::solver::SolveReport;
use super::weights::Weights;
use crate::error::FrontierError;
use crate::error::Result;

/// Expected return per asset, optionally labelled with tickers.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedReturns {
  tickers: Option<Vec<String>>,
  values: DVector<f64>,
}

impl ExpectedReturns {
  /// Unlabelled returns; tickers fall back to the covariance labels or positions.
  pub fn new(values: Vec<f64>) -> Self {
    Self {
      tickers: None,
      values: DVector::from_vec(values),
    }
  }

  /// Returns keyed by ticker, in iteration order.
  pub fn labeled<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
    let (tickers, values): (Vec<String>, Vec<f64>) =
      pairs.into_iter().map(|(t, v)| (t.into(), v)).unzip();
    Self {
      tickers: Some(tickers),
      values: DVector::from_vec(values),
    }
  }

  pub fn tickers(&self) -> Option<&[String]> {
    self.tickers.as_deref()
  }

  pub fn values(&self) -> &DVector<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

impl From<Vec<f64>> for ExpectedReturns {
  fn from(values: Vec<f64>) -> Self {
    Self::new(values)
  }
}

impl From<DVector<f64>> for ExpectedReturns {
  fn from(values: DVector<f64>) -> Self {
    Self {
      tickers: None,
      values,
    }
  }
}

/// Covariance of asset returns, optionally labelled with tickers.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  tickers: Option<Vec<String>>,
  values: DMatrix<f64>,
}

impl CovarianceMatrix {
  pub fn new(values: DMatrix<f64>) -> Self {
    Self {
      tickers: None,
      values,
    }
  }

  /// Build from row vectors; ragged rows are rejected.
  pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
    let n = rows.len();
    if rows.iter().any(|row| row.len() != n) {
      return Err(FrontierError::config(
        "cov_matrix",
        format!("expected {n} rows of length {n}"),
      ));
    }
    Ok(Self::new(DMatrix::from_fn(n, n, |i, j| rows[i][j])))
  }

  /// Build from a matrix whose rows and columns are both indexed by `tickers`.
  pub fn labeled<S: Into<String>>(tickers: impl IntoIterator<Item = S>, values: DMatrix<f64>) -> Self {
    Self {
      tickers: Some(tickers.into_iter().map(Into::into).collect()),
      values,
    }
  }

  pub fn tickers(&self) -> Option<&[String]> {
    self.tickers.as_deref()
  }

  pub fn values(&self) -> &DMatrix<f64> {
    &self.values
  }

  pub fn n_assets(&self) -> usize {
    self.values.nrows()
  }
}

impl From<DMatrix<f64>> for CovarianceMatrix {
  fn from(values: DMatrix<f64>) -> Self {
    Self::new(values)
  }
}

/// Resolve the asset universe: returns labels, then covariance labels, then positions.
pub(crate) fn resolve_tickers(
  expected_returns: Option<&ExpectedReturns>,
  cov_matrix: &CovarianceMatrix,
) -> Result<Vec<String>> {
  let n = cov_matrix.n_assets();
  let tickers = match (expected_returns.and_then(|r| r.tickers()), cov_matrix.tickers()) {
    (Some(from_returns), Some(from_cov)) => {
      if from_returns != from_cov {
        return Err(FrontierError::config(
          "cov_matrix",
          "covariance labels do not match the expected return labels",
        ));
      }
      from_returns.to_vec()
    }
    (Some(from_returns), None) => from_returns.to_vec(),
    (None, Some(from_cov)) => from_cov.to_vec(),
    (None, None) => (0..n).map(|i| i.to_string()).collect(),
  };

  if tickers.len() != n {
    return Err(FrontierError::config(
      "tickers",
      format!("{} labels for {n} assets", tickers.len()),
    ));
  }

  let mut seen = HashSet::with_capacity(tickers.len());
  if let Some(dup) = tickers.iter().find(|t| !seen.insert(t.as_str())) {
    return Err(FrontierError::config("tickers", format!("duplicate ticker {dup}")));
  }

  Ok(tickers)
}

/// Expected return, volatility and Sharpe ratio of a weight vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortfolioPerformance {
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
}

impl PortfolioPerformance {
  pub fn new(expected_return: f64, volatility: f64, sharpe_ratio: f64) -> Self {
    Self {
      expected_return,
      volatility,
      sharpe_ratio,
    }
  }
}

impl From<PortfolioPerformance> for (f64, f64, f64) {
  fn from(p: PortfolioPerformance) -> Self {
    (p.expected_return, p.volatility, p.sharpe_ratio)
  }
}

impl fmt::Display for PortfolioPerformance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Expected annual return: {:.1}%", 100.0 * self.expected_return)?;
    writeln!(f, "Annual volatility: {:.1}%", 100.0 * self.volatility)?;
    write!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)
  }
}

/// Category of a non-fatal advisory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
  /// Regularisation parameter below zero.
  NegativeGamma,
  /// Bounds were replaced by (-1, 1) to allow a market-neutral portfolio.
  BoundsWidened,
  /// Solver stopped before reaching the feasibility/stationarity tolerances.
  SolverNotConverged,
}

impl fmt::Display for DiagnosticKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DiagnosticKind::NegativeGamma => write!(f, "negative gamma"),
      DiagnosticKind::BoundsWidened => write!(f, "bounds widened"),
      DiagnosticKind::SolverNotConverged => write!(f, "solver not converged"),
    }
  }
}

/// Advisory record returned alongside a result instead of a side-channel warning.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
  pub kind: DiagnosticKind,
  pub message: String,
}

impl Diagnostic {
  pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.kind, self.message)
  }
}

/// Output of an optimisation mode.
#[derive(Clone, Debug)]
pub struct Allocation {
  /// Asset to weight mapping in universe order.
  pub weights: Weights,
  /// Advisories raised while configuring or solving this call.
  pub diagnostics: Vec<Diagnostic>,
  /// Solver statistics; `None` for the closed-form mode.
  pub report: Option<SolveReport>,
}

impl Allocation {
  pub fn has_diagnostic(&self, kind: DiagnosticKind) -> bool {
    self.diagnostics.iter().any(|d| d.kind == kind)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tickers_prefer_return_labels() {
    let mu = ExpectedReturns::labeled([("AAA", 0.1), ("BBB", 0.2)]);
    let cov = CovarianceMatrix::new(DMatrix::identity(2, 2));
    let tickers = resolve_tickers(Some(&mu), &cov).unwrap();
    assert_eq!(tickers, vec!["AAA", "BBB"]);
  }

  #[test]
  fn tickers_fall_back_to_covariance_then_positions() {
    let cov = CovarianceMatrix::labeled(["X", "Y", "Z"], DMatrix::identity(3, 3));
    assert_eq!(resolve_tickers(None, &cov).unwrap(), vec!["X", "Y", "Z"]);

    let cov = CovarianceMatrix::new(DMatrix::identity(3, 3));
    let mu = ExpectedReturns::new(vec![0.1, 0.2, 0.3]);
    assert_eq!(resolve_tickers(Some(&mu), &cov).unwrap(), vec!["0", "1", "2"]);
  }

  #[test]
  fn mismatched_labels_are_rejected() {
    let mu = ExpectedReturns::labeled([("AAA", 0.1), ("BBB", 0.2)]);
    let cov = CovarianceMatrix::labeled(["BBB", "AAA"], DMatrix::identity(2, 2));
    assert!(matches!(
      resolve_tickers(Some(&mu), &cov),
      Err(FrontierError::Configuration { .. })
    ));
  }

  #[test]
  fn duplicate_tickers_are_rejected() {
    let cov = CovarianceMatrix::labeled(["A", "A"], DMatrix::identity(2, 2));
    assert!(resolve_tickers(None, &cov).is_err());
  }

  #[test]
  fn ragged_rows_are_rejected() {
    assert!(CovarianceMatrix::from_rows(&[vec![0.04, 0.0], vec![0.0]]).is_err());
  }

  #[test]
  fn performance_formats_like_a_report() {
    let perf = PortfolioPerformance::new(0.123, 0.2, 0.515);
    let text = perf.to_string();
    assert!(text.contains("Expected annual return: 12.3%"));
    assert!(text.contains("Annual volatility: 20.0%"));
    assert!(text.contains("Sharpe Ratio: 0.52") || text.contains("Sharpe Ratio: 0.51"));
  }
}
