//! # Objectives
//!
//! $$
//! f_{\text{vol}}(\mathbf{w}) = \mathbf{w}^\top \Sigma \mathbf{w} + \gamma \lVert \mathbf{w} \rVert_2^2,
//! \qquad
//! f_{\text{sharpe}}(\mathbf{w}) = -\frac{\mathbf{w}^\top\mu - r_f}{\sqrt{f_{\text{vol}}(\mathbf{w})}}
//! $$
//!
//! Objective functions minimised by the solver and the pluggable [`Objective`] trait.

use nalgebra::DMatrix;
use nalgebra::DVector;

/// Data an objective may read besides the weights.
#[derive(Clone, Copy, Debug)]
pub struct ObjectiveContext<'a> {
  pub expected_returns: Option<&'a DVector<f64>>,
  pub cov_matrix: &'a DMatrix<f64>,
  pub gamma: f64,
}

/// Scalar function of the weights to be minimised.
///
/// Closures of the form `Fn(&[f64], &ObjectiveContext) -> f64` implement this
/// trait directly and get a finite-difference gradient.
pub trait Objective {
  fn evaluate(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> f64;

  fn gradient(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> Vec<f64> {
    central_difference(w, |x| self.evaluate(x, ctx))
  }

  fn name(&self) -> &str {
    "custom"
  }
}

impl<F> Objective for F
where
  F: Fn(&[f64], &ObjectiveContext<'_>) -> f64,
{
  fn evaluate(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
    self(w, ctx)
  }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn mat_vec_mul(mat: &DMatrix<f64>, v: &[f64]) -> Vec<f64> {
  (0..mat.nrows())
    .map(|i| (0..mat.ncols()).map(|j| mat[(i, j)] * v[j]).sum())
    .collect()
}

/// $\mathbf{w}^\top \Sigma \mathbf{w}$
pub fn portfolio_variance(w: &[f64], cov: &DMatrix<f64>) -> f64 {
  dot(w, &mat_vec_mul(cov, w))
}

/// $\gamma \lVert \mathbf{w} \rVert_2^2$
pub fn l2_regularization(w: &[f64], gamma: f64) -> f64 {
  gamma * dot(w, w)
}

pub fn portfolio_return(w: &[f64], mu: &DVector<f64>) -> f64 {
  dot(w, mu.as_slice())
}

/// Variance plus L2 penalty; the min-volatility objective.
pub fn volatility(w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
  portfolio_variance(w, ctx.cov_matrix) + l2_regularization(w, ctx.gamma)
}

/// Negated Sharpe ratio with the L2 penalty folded into the risk term.
/// NaN when returns are absent or the risk vanishes.
pub fn negative_sharpe(w: &[f64], ctx: &ObjectiveContext<'_>, risk_free_rate: f64) -> f64 {
  let Some(mu) = ctx.expected_returns else {
    return f64::NAN;
  };
  let sigma = volatility(w, ctx).sqrt();
  let sharpe = (portfolio_return(w, mu) - risk_free_rate) / sigma;
  -sharpe
}

pub fn negative_mean_return(w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
  match ctx.expected_returns {
    Some(mu) => -portfolio_return(w, mu),
    None => f64::NAN,
  }
}

/// Central finite differences with a step scaled to each coordinate.
pub fn central_difference<F>(x: &[f64], f: F) -> Vec<f64>
where
  F: Fn(&[f64]) -> f64,
{
  let mut probe = x.to_vec();
  let mut grad = vec![0.0; x.len()];
  for i in 0..x.len() {
    let h = 1e-6 * x[i].abs().max(1.0);
    probe[i] = x[i] + h;
    let up = f(&probe);
    probe[i] = x[i] - h;
    let down = f(&probe);
    probe[i] = x[i];
    grad[i] = (up - down) / (2.0 * h);
  }
  grad
}

/// Minimum-variance objective with an L2 penalty.
#[derive(Clone, Copy, Debug, Default)]
pub struct Volatility;

impl Objective for Volatility {
  fn evaluate(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
    volatility(w, ctx)
  }

  fn gradient(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> Vec<f64> {
    let sw = mat_vec_mul(ctx.cov_matrix, w);
    sw.iter()
      .zip(w)
      .map(|(s, wi)| 2.0 * s + 2.0 * ctx.gamma * wi)
      .collect()
  }

  fn name(&self) -> &str {
    "min_volatility"
  }
}

/// Tangency objective.
#[derive(Clone, Copy, Debug)]
pub struct NegativeSharpe {
  pub risk_free_rate: f64,
}

impl Objective for NegativeSharpe {
  fn evaluate(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
    negative_sharpe(w, ctx, self.risk_free_rate)
  }

  fn gradient(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> Vec<f64> {
    let Some(mu) = ctx.expected_returns else {
      return vec![f64::NAN; w.len()];
    };
    // half the gradient of the risk term: (Sigma + gamma I) w
    let half: Vec<f64> = mat_vec_mul(ctx.cov_matrix, w)
      .into_iter()
      .zip(w)
      .map(|(s, wi)| s + ctx.gamma * wi)
      .collect();
    let var = dot(w, &half);
    let sigma = var.sqrt();
    let excess = portfolio_return(w, mu) - self.risk_free_rate;
    mu.iter()
      .zip(&half)
      .map(|(m, h)| -m / sigma + excess * h / (sigma * var))
      .collect()
  }

  fn name(&self) -> &str {
    "max_sharpe"
  }
}

/// Linear objective used to maximise return.
#[derive(Clone, Copy, Debug, Default)]
pub struct NegativeMeanReturn;

impl Objective for NegativeMeanReturn {
  fn evaluate(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> f64 {
    negative_mean_return(w, ctx)
  }

  fn gradient(&self, w: &[f64], ctx: &ObjectiveContext<'_>) -> Vec<f64> {
    match ctx.expected_returns {
      Some(mu) => mu.iter().map(|m| -m).collect(),
      None => vec![f64::NAN; w.len()],
    }
  }

  fn name(&self) -> &str {
    "max_return"
  }
}
