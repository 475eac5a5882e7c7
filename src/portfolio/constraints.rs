//! # Constraints
//!
//! $$
//! h_j(\mathbf{w}) = 0, \qquad g_k(\mathbf{w}) \ge 0
//! $$
//!
//! Equality and inequality constraints on the weight vector and the builder
//! that assembles them for each optimisation mode.

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use nalgebra::DVector;

use super::bounds::Bounds;
use super::bounds::BoundsNormalizer;
use super::bounds::WeightBounds;
use super::objectives::central_difference;
use super::objectives::dot;
use super::objectives::mat_vec_mul;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
  /// $h(\mathbf{w}) = 0$
  Equality,
  /// $g(\mathbf{w}) \ge 0$
  Inequality,
}

type ConstraintFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

#[derive(Clone)]
enum ConstraintForm {
  /// $\mathbf{1}^\top w - b$, enforced by projection rather than penalty
  Budget { total: f64 },
  /// $a^\top w - b$
  Linear { coeffs: Vec<f64>, rhs: f64 },
  /// $\sigma^2 - w^\top \Sigma w$
  TargetVariance { cov: DMatrix<f64>, level: f64 },
  Custom(ConstraintFn),
}

/// A single constraint on the weights.
#[derive(Clone)]
pub struct Constraint {
  kind: ConstraintKind,
  label: String,
  form: ConstraintForm,
}

impl fmt::Debug for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Constraint")
      .field("kind", &self.kind)
      .field("label", &self.label)
      .finish_non_exhaustive()
  }
}

impl Constraint {
  /// `f(w) == 0`
  pub fn equality<F>(label: impl Into<String>, f: F) -> Self
  where
    F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
  {
    Self {
      kind: ConstraintKind::Equality,
      label: label.into(),
      form: ConstraintForm::Custom(Arc::new(f)),
    }
  }

  /// `f(w) >= 0`
  pub fn inequality<F>(label: impl Into<String>, f: F) -> Self
  where
    F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
  {
    Self {
      kind: ConstraintKind::Inequality,
      label: label.into(),
      form: ConstraintForm::Custom(Arc::new(f)),
    }
  }

  /// `coeffs . w == rhs`
  pub fn linear_equality(label: impl Into<String>, coeffs: Vec<f64>, rhs: f64) -> Self {
    Self {
      kind: ConstraintKind::Equality,
      label: label.into(),
      form: ConstraintForm::Linear { coeffs, rhs },
    }
  }

  /// `coeffs . w >= rhs`
  pub fn linear_inequality(label: impl Into<String>, coeffs: Vec<f64>, rhs: f64) -> Self {
    Self {
      kind: ConstraintKind::Inequality,
      label: label.into(),
      form: ConstraintForm::Linear { coeffs, rhs },
    }
  }

  pub(crate) fn budget(total: f64) -> Self {
    Self {
      kind: ConstraintKind::Equality,
      label: "budget".to_string(),
      form: ConstraintForm::Budget { total },
    }
  }

  pub(crate) fn target_return(mu: &DVector<f64>, target: f64) -> Self {
    Self::linear_equality("target_return", mu.as_slice().to_vec(), target)
  }

  pub(crate) fn target_variance(cov: &DMatrix<f64>, target_variance: f64) -> Self {
    Self {
      kind: ConstraintKind::Equality,
      label: "target_risk".to_string(),
      form: ConstraintForm::TargetVariance {
        cov: cov.clone(),
        level: target_variance,
      },
    }
  }

  pub fn kind(&self) -> ConstraintKind {
    self.kind
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  /// Required weight sum when this is the budget constraint.
  pub fn budget_total(&self) -> Option<f64> {
    match self.form {
      ConstraintForm::Budget { total } => Some(total),
      _ => None,
    }
  }

  pub fn value(&self, w: &[f64]) -> f64 {
    match &self.form {
      ConstraintForm::Budget { total } => w.iter().sum::<f64>() - total,
      ConstraintForm::Linear { coeffs, rhs } => dot(coeffs, w) - rhs,
      ConstraintForm::TargetVariance { cov, level } => level - dot(w, &mat_vec_mul(cov, w)),
      ConstraintForm::Custom(f) => f(w),
    }
  }

  pub fn gradient(&self, w: &[f64]) -> Vec<f64> {
    match &self.form {
      ConstraintForm::Budget { .. } => vec![1.0; w.len()],
      ConstraintForm::Linear { coeffs, .. } => coeffs.clone(),
      ConstraintForm::TargetVariance { cov, .. } => {
        mat_vec_mul(cov, w).into_iter().map(|s| -2.0 * s).collect()
      }
      ConstraintForm::Custom(f) => central_difference(w, |x| f(x)),
    }
  }

  /// Distance from feasibility: `|h|` for equalities, `max(0, -g)` for inequalities.
  pub fn violation(&self, w: &[f64]) -> f64 {
    let v = self.value(w);
    match self.kind {
      ConstraintKind::Equality => v.abs(),
      ConstraintKind::Inequality => (-v).max(0.0),
    }
  }
}

/// Bounds actually used for a solve and whether they were widened.
#[derive(Clone, Debug)]
pub struct BoundsAdjustment {
  pub bounds: Bounds,
  pub widened: bool,
}

/// Target constraint added on top of the budget.
#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
  None,
  /// Variance pinned to `sigma^2` with `sigma` the target volatility.
  Risk { cov: &'a DMatrix<f64>, target_volatility: f64 },
  /// Portfolio return pinned to the target.
  Return { mu: &'a DVector<f64>, target_return: f64 },
}

/// Assembles the constraint set of an optimisation mode.
#[derive(Clone, Debug)]
pub struct ConstraintBuilder {
  n_assets: usize,
  extra: Vec<Constraint>,
}

impl ConstraintBuilder {
  pub fn new(n_assets: usize) -> Self {
    Self {
      n_assets,
      extra: Vec::new(),
    }
  }

  /// User constraints appended after the mode constraints.
  pub fn with_constraints(mut self, extra: &[Constraint]) -> Self {
    self.extra.extend_from_slice(extra);
    self
  }

  /// `sum(w) == 1`, or `sum(w) == 0` for a market-neutral portfolio.
  pub fn budget(&self, market_neutral: bool) -> Constraint {
    Constraint::budget(if market_neutral { 0.0 } else { 1.0 })
  }

  /// A market-neutral portfolio needs at least one asset that can be shorted;
  /// otherwise every bound is replaced by (-1, 1).
  pub fn market_neutral_bounds(&self, bounds: &Bounds) -> Result<BoundsAdjustment> {
    if bounds.allows_shorting() {
      return Ok(BoundsAdjustment {
        bounds: bounds.clone(),
        widened: false,
      });
    }
    let widened = BoundsNormalizer::new(self.n_assets).normalize(&WeightBounds::Uniform(-1.0, 1.0))?;
    Ok(BoundsAdjustment {
      bounds: widened,
      widened: true,
    })
  }

  pub fn build(&self, market_neutral: bool, target: Target<'_>) -> Vec<Constraint> {
    let mut constraints = vec![self.budget(market_neutral)];
    match target {
      Target::None => {}
      Target::Risk {
        cov,
        target_volatility,
      } => constraints.push(Constraint::target_variance(cov, target_volatility.powi(2))),
      Target::Return { mu, target_return } => {
        constraints.push(Constraint::target_return(mu, target_return))
      }
    }
    constraints.extend(self.extra.iter().cloned());
    constraints
  }
}
