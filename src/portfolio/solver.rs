//! # Constrained Solver
//!
//! $$
//! \mathcal{L}_\rho(\mathbf{w}, \lambda, \nu) = f(\mathbf{w})
//! - \sum_j \lambda_j h_j(\mathbf{w}) + \frac{\rho}{2} \sum_j h_j(\mathbf{w})^2
//! + \frac{1}{2\rho} \sum_k \Big[\max\big(0, \nu_k - \rho\, g_k(\mathbf{w})\big)^2 - \nu_k^2\Big]
//! $$
//!
//! Augmented Lagrangian outer loop over inner solves on the box intersected
//! with the budget hyperplane. The budget is held exactly by projection and only
//! the remaining constraints enter the penalty. The inner problem is handled by
//! the spectral projected gradient solver, or by Nelder-Mead on a projected
//! penalty when gradients are unreliable.

use std::fmt;
use std::str::FromStr;

use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::solver::neldermead::NelderMead;

use super::bounds::Bounds;
use super::bounds::FeasibleRegion;
use super::constraints::Constraint;
use super::constraints::ConstraintKind;
use super::objectives::Objective;
use super::objectives::ObjectiveContext;
use super::spg::SpectralProjectedGradient;
use crate::error::Result;

/// Inner minimiser used inside the augmented Lagrangian loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverMethod {
  #[default]
  AugmentedLagrangian,
  NelderMead,
}

impl FromStr for SolverMethod {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    Ok(match s.to_lowercase().as_str() {
      "nelder-mead" | "neldermead" | "nm" => SolverMethod::NelderMead,
      "augmented-lagrangian" | "augmentedlagrangian" | "al" | "spg" => {
        SolverMethod::AugmentedLagrangian
      }
      other => {
        tracing::warn!(method = other, "unknown solver method, using augmented-lagrangian");
        SolverMethod::AugmentedLagrangian
      }
    })
  }
}

impl fmt::Display for SolverMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SolverMethod::AugmentedLagrangian => write!(f, "augmented-lagrangian"),
      SolverMethod::NelderMead => write!(f, "nelder-mead"),
    }
  }
}

#[derive(Clone, Debug)]
pub struct SolverConfig {
  pub method: SolverMethod,
  pub max_outer_iters: usize,
  pub max_inner_iters: u64,
  /// Largest constraint violation accepted as converged.
  pub feasibility_tol: f64,
  /// Projected gradient tolerance of the final inner solve.
  pub optimality_tol: f64,
  pub initial_penalty: f64,
  pub penalty_growth: f64,
  pub max_penalty: f64,
  /// Outer steps without progress tolerated once the penalty is at its cap.
  pub stall_iters: usize,
  /// Past costs compared by the nonmonotone line search.
  pub spg_memory: usize,
  /// Offset of each extra simplex vertex from the starting point.
  pub simplex_step: f64,
  pub nelder_mead_iters: u64,
  /// Feasibility accepted from the derivative-free path.
  pub simplex_feasibility_tol: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      method: SolverMethod::default(),
      max_outer_iters: 100,
      max_inner_iters: 5000,
      feasibility_tol: 1e-10,
      optimality_tol: 1e-9,
      initial_penalty: 10.0,
      penalty_growth: 10.0,
      max_penalty: 1e10,
      stall_iters: 3,
      spg_memory: 10,
      simplex_step: 0.05,
      nelder_mead_iters: 3000,
      simplex_feasibility_tol: 1e-7,
    }
  }
}

impl SolverConfig {
  pub fn with_method(mut self, method: SolverMethod) -> Self {
    self.method = method;
    self
  }
}

/// Statistics of a finished solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveReport {
  pub method: SolverMethod,
  pub outer_iterations: usize,
  pub inner_iterations: u64,
  /// Largest violation over all constraints at the returned weights.
  pub constraint_violation: f64,
  /// Sup-norm of the projected Lagrangian gradient at the returned weights.
  pub stationarity: f64,
  pub objective: f64,
  pub converged: bool,
}

#[derive(Clone, Debug)]
pub struct Solution {
  pub weights: Vec<f64>,
  pub report: SolveReport,
}

/// Augmented Lagrangian for fixed multipliers and penalty.
struct AugmentedLagrangian<'a> {
  objective: &'a dyn Objective,
  ctx: ObjectiveContext<'a>,
  constraints: &'a [Constraint],
  multipliers: &'a [f64],
  rho: f64,
}

impl AugmentedLagrangian<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    let mut total = self.objective.evaluate(w, &self.ctx);
    for (c, &m) in self.constraints.iter().zip(self.multipliers) {
      let v = c.value(w);
      total += match c.kind() {
        ConstraintKind::Equality => -m * v + 0.5 * self.rho * v * v,
        ConstraintKind::Inequality => {
          let t = (m - self.rho * v).max(0.0);
          (t * t - m * m) / (2.0 * self.rho)
        }
      };
    }
    total
  }

  fn grad(&self, w: &[f64]) -> Vec<f64> {
    let mut grad = self.objective.gradient(w, &self.ctx);
    for (c, &m) in self.constraints.iter().zip(self.multipliers) {
      let v = c.value(w);
      let coef = match c.kind() {
        ConstraintKind::Equality => m - self.rho * v,
        ConstraintKind::Inequality => (m - self.rho * v).max(0.0),
      };
      if coef != 0.0 {
        for (gi, ci) in grad.iter_mut().zip(c.gradient(w)) {
          *gi -= coef * ci;
        }
      }
    }
    grad
  }
}

impl CostFunction for AugmentedLagrangian<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, Error> {
    Ok(self.value(w))
  }
}

impl Gradient for AugmentedLagrangian<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
    Ok(self.grad(w))
  }
}

/// Lagrangian evaluated at the projection of `z`, plus a penalty on the
/// distance to the region, so the simplex may leave it.
struct ProjectedPenalty<'a> {
  lagrangian: AugmentedLagrangian<'a>,
  region: &'a FeasibleRegion,
}

impl CostFunction for ProjectedPenalty<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, z: &Self::Param) -> std::result::Result<Self::Output, Error> {
    let p = self.region.projected(z);
    let outside: f64 = z.iter().zip(&p).map(|(a, b)| (a - b).powi(2)).sum();
    let f = self.lagrangian.value(&p) + self.lagrangian.rho * outside;
    Ok(if f.is_finite() { f } else { f64::INFINITY })
  }
}

fn max_violation(constraints: &[Constraint], w: &[f64]) -> f64 {
  constraints
    .iter()
    .map(|c| c.violation(w))
    .fold(0.0, f64::max)
}

fn update_multipliers(constraints: &[Constraint], multipliers: &mut [f64], w: &[f64], rho: f64) {
  for (c, m) in constraints.iter().zip(multipliers.iter_mut()) {
    let v = c.value(w);
    *m = match c.kind() {
      ConstraintKind::Equality => *m - rho * v,
      ConstraintKind::Inequality => (*m - rho * v).max(0.0),
    };
  }
}

/// KKT residual: projected gradient of the plain Lagrangian over the region.
fn stationarity(
  objective: &dyn Objective,
  ctx: &ObjectiveContext<'_>,
  constraints: &[Constraint],
  multipliers: &[f64],
  region: &FeasibleRegion,
  w: &[f64],
) -> f64 {
  let mut grad = objective.gradient(w, ctx);
  for (c, &m) in constraints.iter().zip(multipliers) {
    for (gi, ci) in grad.iter_mut().zip(c.gradient(w)) {
      *gi -= m * ci;
    }
  }
  region.projected_step_norm(w, &grad)
}

/// Splits off the first budget constraint, which the projection enforces.
fn split_budget(bounds: &Bounds, constraints: &[Constraint]) -> (FeasibleRegion, Vec<Constraint>) {
  let budget = constraints.iter().position(|c| c.budget_total().is_some());
  let total = budget.and_then(|i| constraints[i].budget_total());
  let penalized = constraints
    .iter()
    .enumerate()
    .filter(|(i, _)| Some(*i) != budget)
    .map(|(_, c)| c.clone())
    .collect();
  (FeasibleRegion::new(bounds.clone(), total), penalized)
}

fn converged_reason(reason: Option<&TerminationReason>) -> bool {
  matches!(reason, Some(TerminationReason::SolverConverged))
}

/// Minimise `objective` over the box `bounds` subject to `constraints`,
/// starting from `x0`. The returned weights always lie inside the bounds.
pub fn minimize(
  objective: &dyn Objective,
  ctx: ObjectiveContext<'_>,
  x0: &[f64],
  bounds: &Bounds,
  constraints: &[Constraint],
  config: &SolverConfig,
) -> Result<Solution> {
  let (region, penalized) = split_budget(bounds, constraints);
  let feasibility_tol = match config.method {
    SolverMethod::AugmentedLagrangian => config.feasibility_tol,
    SolverMethod::NelderMead => config.simplex_feasibility_tol,
  };

  let mut x = region.projected(x0);
  let mut multipliers = vec![0.0; penalized.len()];
  let mut rho = config.initial_penalty;
  let mut prev_violation = f64::INFINITY;
  let mut best_violation = f64::INFINITY;
  let mut stalled = 0;
  let mut inner_iterations = 0;
  let mut outer_iterations = 0;
  let mut converged = false;

  for k in 0..config.max_outer_iters {
    outer_iterations = k + 1;
    let lagrangian = AugmentedLagrangian {
      objective,
      ctx,
      constraints: &penalized,
      multipliers: &multipliers,
      rho,
    };

    let (next, inner_ok, inner_tol) = match config.method {
      SolverMethod::AugmentedLagrangian => {
        let inner_tol = config.optimality_tol.max(0.1f64.powi(k as i32 + 2));
        let solver = SpectralProjectedGradient::new(&region)
          .with_tolerance(inner_tol)
          .with_memory(config.spg_memory);
        let res = Executor::new(lagrangian, solver)
          .configure(|state| state.param(x.clone()).max_iters(config.max_inner_iters))
          .run()?;
        let state = res.state();
        inner_iterations += state.get_iter();
        let next = state
          .get_param()
          .or_else(|| state.get_best_param())
          .cloned()
          .unwrap_or_else(|| x.clone());
        (next, converged_reason(state.get_termination_reason()), inner_tol)
      }
      SolverMethod::NelderMead => {
        let mut simplex = vec![x.clone()];
        for i in 0..x.len() {
          let mut vertex = x.clone();
          vertex[i] += config.simplex_step;
          simplex.push(vertex);
        }
        let solver = NelderMead::new(simplex).with_sd_tolerance(1e-14)?;
        let problem = ProjectedPenalty {
          lagrangian,
          region: &region,
        };
        let res = Executor::new(problem, solver)
          .configure(|state| state.max_iters(config.nelder_mead_iters))
          .run()?;
        let state = res.state();
        inner_iterations += state.get_iter();
        let next = state
          .get_best_param()
          .or_else(|| state.get_param())
          .cloned()
          .unwrap_or_else(|| x.clone());
        (next, true, config.optimality_tol)
      }
    };

    x = region.projected(&next);
    let violation = max_violation(constraints, &x);
    update_multipliers(&penalized, &mut multipliers, &x, rho);

    tracing::debug!(
      outer = k,
      rho,
      violation,
      inner_tol,
      inner_converged = inner_ok,
      "augmented lagrangian step"
    );

    if violation <= feasibility_tol && inner_tol <= config.optimality_tol && inner_ok {
      converged = true;
      break;
    }

    if violation <= feasibility_tol || violation < 0.99 * best_violation {
      best_violation = best_violation.min(violation);
      stalled = 0;
    } else {
      stalled += 1;
    }
    if rho >= config.max_penalty && stalled >= config.stall_iters {
      tracing::debug!(outer = k, violation, "penalty at its cap and violation stalled");
      break;
    }

    if violation > feasibility_tol && violation > 0.25 * prev_violation {
      rho = (rho * config.penalty_growth).min(config.max_penalty);
    }
    prev_violation = violation;
  }

  let report = SolveReport {
    method: config.method,
    outer_iterations,
    inner_iterations,
    constraint_violation: max_violation(constraints, &x),
    stationarity: stationarity(objective, &ctx, &penalized, &multipliers, &region, &x),
    objective: objective.evaluate(&x, &ctx),
    converged,
  };

  if converged {
    tracing::debug!(
      method = %report.method,
      objective = report.objective,
      violation = report.constraint_violation,
      "solver converged"
    );
  } else {
    tracing::warn!(
      method = %report.method,
      violation = report.constraint_violation,
      outer = report.outer_iterations,
      "solver stopped before convergence"
    );
  }

  Ok(Solution { weights: x, report })
}
