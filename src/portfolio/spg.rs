//! # Spectral Projected Gradient
//!
//! $$
//! \mathbf{x}_{k+1} = \mathbf{x}_k + \lambda_k \big(P(\mathbf{x}_k - \alpha_k \nabla f(\mathbf{x}_k)) - \mathbf{x}_k\big),
//! \qquad
//! \alpha_{k+1} = \frac{\mathbf{s}_k^\top \mathbf{s}_k}{\mathbf{s}_k^\top \mathbf{y}_k}
//! $$
//!
//! Minimiser over a [`FeasibleRegion`] with Barzilai-Borwein steps and a
//! nonmonotone Armijo line search (Birgin, Martinez & Raydan). `P` projects onto
//! the box and, when set, the budget hyperplane.

use std::collections::VecDeque;

use argmin::core::ArgminError;
use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Gradient;
use argmin::core::IterState;
use argmin::core::Problem;
use argmin::core::Solver;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::core::KV;
use argmin::kv;

use super::bounds::FeasibleRegion;

pub type SpgState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

const ALPHA_MIN: f64 = 1e-10;
const ALPHA_MAX: f64 = 1e10;
const ARMIJO: f64 = 1e-4;
const MIN_STEP: f64 = 1e-20;

#[derive(Clone, Debug)]
pub struct SpectralProjectedGradient {
  region: FeasibleRegion,
  tol: f64,
  memory: usize,
  alpha: f64,
  pg_norm: f64,
  history: VecDeque<f64>,
}

impl SpectralProjectedGradient {
  pub fn new(region: &FeasibleRegion) -> Self {
    Self {
      region: region.clone(),
      tol: 1e-9,
      memory: 10,
      alpha: 1.0,
      pg_norm: f64::INFINITY,
      history: VecDeque::new(),
    }
  }

  /// Stop once the projected gradient sup-norm drops below `tol`.
  pub fn with_tolerance(mut self, tol: f64) -> Self {
    self.tol = tol;
    self
  }

  /// Number of past costs the Armijo test compares against.
  pub fn with_memory(mut self, memory: usize) -> Self {
    self.memory = memory.max(1);
    self
  }

  fn remember(&mut self, cost: f64) {
    if self.history.len() == self.memory {
      self.history.pop_front();
    }
    self.history.push_back(cost);
  }
}

impl<O> Solver<O, SpgState> for SpectralProjectedGradient
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  const NAME: &'static str = "Spectral Projected Gradient";

  fn init(
    &mut self,
    problem: &mut Problem<O>,
    state: SpgState,
  ) -> Result<(SpgState, Option<KV>), Error> {
    let mut x = state
      .get_param()
      .ok_or_else(|| ArgminError::NotInitialized {
        text: "initial parameter vector required".to_string(),
      })?
      .clone();
    self.region.project(&mut x);

    let cost = problem.cost(&x)?;
    let grad = problem.gradient(&x)?;
    self.pg_norm = self.region.projected_step_norm(&x, &grad);
    self.alpha = if self.pg_norm > 0.0 {
      (1.0 / self.pg_norm).clamp(ALPHA_MIN, ALPHA_MAX)
    } else {
      1.0
    };
    self.history.clear();
    self.remember(cost);

    Ok((state.param(x).cost(cost).gradient(grad), None))
  }

  fn next_iter(
    &mut self,
    problem: &mut Problem<O>,
    mut state: SpgState,
  ) -> Result<(SpgState, Option<KV>), Error> {
    let x = state
      .take_param()
      .ok_or_else(|| ArgminError::NotInitialized {
        text: "parameter vector missing".to_string(),
      })?;
    let g = state
      .take_gradient()
      .ok_or_else(|| ArgminError::NotInitialized {
        text: "gradient missing".to_string(),
      })?;

    let mut d: Vec<f64> = x
      .iter()
      .zip(&g)
      .map(|(xi, gi)| xi - self.alpha * gi)
      .collect();
    self.region.project(&mut d);
    for (di, xi) in d.iter_mut().zip(&x) {
      *di -= xi;
    }
    let gtd: f64 = g.iter().zip(&d).map(|(gi, di)| gi * di).sum();
    let f_max = self.history.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut lambda = 1.0;
    let (x_new, f_new) = loop {
      let candidate: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + lambda * di).collect();
      let f = problem.cost(&candidate)?;
      if f.is_finite() && f <= f_max + ARMIJO * lambda * gtd {
        break (candidate, f);
      }
      lambda *= 0.5;
      if lambda < MIN_STEP {
        let cost = state.get_cost();
        let state = state
          .param(x)
          .gradient(g)
          .cost(cost)
          .terminate_with(TerminationReason::SolverExit("line search failed".to_string()));
        return Ok((state, None));
      }
    };

    let g_new = problem.gradient(&x_new)?;
    let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
    let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
    let sts: f64 = s.iter().map(|v| v * v).sum();
    let sty: f64 = s.iter().zip(&y).map(|(a, b)| a * b).sum();
    self.alpha = if sty > 0.0 {
      (sts / sty).clamp(ALPHA_MIN, ALPHA_MAX)
    } else {
      ALPHA_MAX
    };
    self.pg_norm = self.region.projected_step_norm(&x_new, &g_new);
    self.remember(f_new);

    let kv = kv!(
      "alpha" => self.alpha;
      "step" => lambda;
      "pg_norm" => self.pg_norm;
    );
    Ok((state.param(x_new).cost(f_new).gradient(g_new), Some(kv)))
  }

  fn terminate(&mut self, _state: &SpgState) -> TerminationStatus {
    if self.pg_norm <= self.tol {
      TerminationStatus::Terminated(TerminationReason::SolverConverged)
    } else {
      TerminationStatus::NotTerminated
    }
  }
}
