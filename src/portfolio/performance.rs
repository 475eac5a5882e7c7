//! # Performance
//!
//! $$
//! R = \mathbf{w}^\top\mu, \quad \sigma = \sqrt{\mathbf{w}^\top \Sigma \mathbf{w}}, \quad S = \frac{R - r_f}{\sigma}
//! $$

use nalgebra::DMatrix;
use nalgebra::DVector;

use super::objectives::portfolio_return;
use super::objectives::portfolio_variance;
use super::types::PortfolioPerformance;

/// Zero volatility yields an infinite or NaN Sharpe ratio, passed through as is.
pub fn portfolio_performance(
  weights: &[f64],
  expected_returns: &DVector<f64>,
  cov_matrix: &DMatrix<f64>,
  risk_free_rate: f64,
) -> PortfolioPerformance {
  let ret = portfolio_return(weights, expected_returns);
  let sigma = portfolio_variance(weights, cov_matrix).sqrt();
  PortfolioPerformance::new(ret, sigma, (ret - risk_free_rate) / sigma)
}
