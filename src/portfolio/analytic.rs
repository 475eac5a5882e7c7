//! # Unconstrained Utility
//!
//! $$
//! \mathbf{w}^\* = \arg\max_{\mathbf{w}} \ \mathbf{w}^\top\mu - \frac{\delta}{2}\mathbf{w}^\top \Sigma \mathbf{w}
//! = (\delta \Sigma)^{-1} \mu
//! $$
//!
//! Closed-form quadratic utility optimum. Bounds and the budget are ignored.

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::error::FrontierError;
use crate::error::Result;

pub fn max_unconstrained_utility(
  expected_returns: &DVector<f64>,
  cov_matrix: &DMatrix<f64>,
  risk_aversion: f64,
) -> Result<DVector<f64>> {
  if !risk_aversion.is_finite() || risk_aversion <= 0.0 {
    return Err(FrontierError::config(
      "risk_aversion",
      "must be a positive finite number",
    ));
  }

  let a = cov_matrix * risk_aversion;
  a.lu()
    .solve(expected_returns)
    .filter(|w| w.iter().all(|x| x.is_finite()))
    .ok_or_else(|| FrontierError::LinearAlgebra("covariance matrix is singular".to_string()))
}
