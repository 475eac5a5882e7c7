use thiserror::Error;

/// Errors raised by the frontier optimizer.
#[derive(Debug, Error)]
pub enum FrontierError {
  /// Invalid constructor or method argument, raised before any solve.
  #[error("invalid configuration: {field} ({reason})")]
  Configuration { field: String, reason: String },

  /// The solver terminated but the portfolio misses the requested target.
  #[error("optimisation was not successful: {0}")]
  Infeasible(String),

  /// Weights were queried before any optimisation ran.
  #[error("weights have not been calculated yet")]
  NotOptimized,

  /// Singular or otherwise unsolvable linear system.
  #[error("linear algebra failure: {0}")]
  LinearAlgebra(String),

  /// Internal failure of the numeric solver.
  #[error("solver failure: {0}")]
  Solver(#[from] argmin::core::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Csv(#[from] csv::Error),
}

impl FrontierError {
  pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
    FrontierError::Configuration {
      field: field.to_string(),
      reason: reason.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, FrontierError>;
