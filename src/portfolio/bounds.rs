//! # Weight Bounds
//!
//! $$
//! \ell_i \le w_i \le u_i,
//! \qquad
//! P(\mathbf{x})_i = \operatorname{clamp}(x_i - \tau, \ell_i, u_i), \ \sum_i P(\mathbf{x})_i = b
//! $$
//!
//! Bound specification as supplied by callers, its per-asset normal form and
//! the feasible region searched by the solver.

use crate::error::FrontierError;
use crate::error::Result;

/// Bounds as supplied: one pair for every asset or one pair per asset.
#[derive(Clone, Debug, PartialEq)]
pub enum WeightBounds {
  Uniform(f64, f64),
  PerAsset(Vec<(f64, f64)>),
}

impl Default for WeightBounds {
  fn default() -> Self {
    WeightBounds::Uniform(0.0, 1.0)
  }
}

impl From<(f64, f64)> for WeightBounds {
  fn from((lo, hi): (f64, f64)) -> Self {
    WeightBounds::Uniform(lo, hi)
  }
}

impl From<Vec<(f64, f64)>> for WeightBounds {
  fn from(pairs: Vec<(f64, f64)>) -> Self {
    WeightBounds::PerAsset(pairs)
  }
}

/// Validated per-asset box bounds. Infinite values leave a side unbounded.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
  lower: Vec<f64>,
  upper: Vec<f64>,
}

impl Bounds {
  pub fn lower(&self) -> &[f64] {
    &self.lower
  }

  pub fn upper(&self) -> &[f64] {
    &self.upper
  }

  pub fn len(&self) -> usize {
    self.lower.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lower.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
    self.lower.iter().copied().zip(self.upper.iter().copied())
  }

  /// True when at least one asset may be held short.
  pub fn allows_shorting(&self) -> bool {
    self.lower.iter().any(|&lo| lo < 0.0)
  }

  /// Clamp `x` into the box in place.
  pub fn project(&self, x: &mut [f64]) {
    for ((xi, &lo), &hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
      *xi = xi.max(lo).min(hi);
    }
  }

  pub fn projected(&self, x: &[f64]) -> Vec<f64> {
    let mut out = x.to_vec();
    self.project(&mut out);
    out
  }

  /// Every weight lies within its bounds, widened by `tol`.
  pub fn contains(&self, x: &[f64], tol: f64) -> bool {
    x.len() == self.len()
      && self
        .iter()
        .zip(x)
        .all(|((lo, hi), &xi)| xi >= lo - tol && xi <= hi + tol)
  }
}

/// Box bounds intersected with an optional budget hyperplane `sum(w) = b`.
#[derive(Clone, Debug, PartialEq)]
pub struct FeasibleRegion {
  bounds: Bounds,
  budget: Option<f64>,
}

impl From<Bounds> for FeasibleRegion {
  fn from(bounds: Bounds) -> Self {
    Self::new(bounds, None)
  }
}

impl FeasibleRegion {
  pub fn new(bounds: Bounds, budget: Option<f64>) -> Self {
    Self { bounds, budget }
  }

  /// Euclidean projection in place. When the hyperplane misses the box the
  /// result is the box corner nearest to it.
  pub fn project(&self, x: &mut [f64]) {
    let Some(total) = self.budget else {
      self.bounds.project(x);
      return;
    };
    let tau = self.shift(x, total);
    for (xi, (lo, hi)) in x.iter_mut().zip(self.bounds.iter()) {
      *xi = (*xi - tau).max(lo).min(hi);
    }
  }

  pub fn projected(&self, x: &[f64]) -> Vec<f64> {
    let mut out = x.to_vec();
    self.project(&mut out);
    out
  }

  /// $\lVert P(\mathbf{x} - \mathbf{g}) - \mathbf{x} \rVert_\infty$, zero exactly at
  /// stationary points of the region.
  pub fn projected_step_norm(&self, x: &[f64], g: &[f64]) -> f64 {
    let step: Vec<f64> = x.iter().zip(g).map(|(xi, gi)| xi - gi).collect();
    self
      .projected(&step)
      .iter()
      .zip(x)
      .map(|(p, xi)| (p - xi).abs())
      .fold(0.0, f64::max)
  }

  /// Shift `tau` such that the clamped weights sum to `total`. The clamped sum
  /// is piecewise linear and non-increasing in `tau` with knots at `x - u` and
  /// `x - l`, so the root is found by bisection over the knots and then solved
  /// exactly on the bracketing segment.
  fn shift(&self, x: &[f64], total: f64) -> f64 {
    let level = |tau: f64| -> f64 {
      x.iter()
        .zip(self.bounds.iter())
        .map(|(xi, (lo, hi))| (xi - tau).max(lo).min(hi))
        .sum()
    };

    let mut knots: Vec<f64> = x
      .iter()
      .zip(self.bounds.iter())
      .flat_map(|(xi, (lo, hi))| [xi - hi, xi - lo])
      .filter(|k| k.is_finite())
      .collect();
    knots.sort_by(f64::total_cmp);

    let (Some(&first), Some(&last)) = (knots.first(), knots.last()) else {
      return (x.iter().sum::<f64>() - total) / x.len().max(1) as f64;
    };

    let top = level(first);
    if total >= top {
      let open = self.bounds.upper().iter().filter(|u| u.is_infinite()).count();
      return if open == 0 {
        first
      } else {
        first - (total - top) / open as f64
      };
    }
    let bottom = level(last);
    if total <= bottom {
      let open = self.bounds.lower().iter().filter(|l| l.is_infinite()).count();
      return if open == 0 {
        last
      } else {
        last + (bottom - total) / open as f64
      };
    }

    let (mut a, mut b) = (0, knots.len() - 1);
    while b - a > 1 {
      let mid = (a + b) / 2;
      if level(knots[mid]) >= total {
        a = mid;
      } else {
        b = mid;
      }
    }
    let (ka, kb) = (knots[a], knots[b]);
    let (fa, fb) = (level(ka), level(kb));
    if fa <= fb {
      ka
    } else {
      ka + (fa - total) * (kb - ka) / (fa - fb)
    }
  }
}

/// Expands a [`WeightBounds`] into validated per-asset [`Bounds`].
#[derive(Clone, Copy, Debug)]
pub struct BoundsNormalizer {
  n_assets: usize,
}

impl BoundsNormalizer {
  pub fn new(n_assets: usize) -> Self {
    Self { n_assets }
  }

  pub fn normalize(&self, bounds: &WeightBounds) -> Result<Bounds> {
    let pairs = match bounds {
      WeightBounds::Uniform(lo, hi) => vec![(*lo, *hi); self.n_assets],
      WeightBounds::PerAsset(pairs) => {
        if pairs.len() != self.n_assets {
          return Err(FrontierError::config(
            "weight_bounds",
            format!("{} bound pairs for {} assets", pairs.len(), self.n_assets),
          ));
        }
        pairs.clone()
      }
    };

    for (i, &(lo, hi)) in pairs.iter().enumerate() {
      if lo.is_nan() || hi.is_nan() {
        return Err(FrontierError::config(
          "weight_bounds",
          format!("bound for asset {i} is NaN"),
        ));
      }
      if lo > hi {
        return Err(FrontierError::config(
          "weight_bounds",
          format!("lower bound {lo} exceeds upper bound {hi} for asset {i}"),
        ));
      }
    }

    let (lower, upper) = pairs.into_iter().unzip();
    Ok(Bounds { lower, upper })
  }
}
