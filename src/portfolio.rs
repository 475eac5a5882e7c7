//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Mean-variance optimisation: objectives, constraints, the constrained
//! solver and the [`EfficientFrontier`] orchestrator.

pub mod analytic;
pub mod bounds;
pub mod constraints;
pub mod frontier;
pub mod objectives;
pub mod performance;
pub mod report;
pub mod solver;
pub mod spg;
pub mod types;
pub mod weights;

pub use bounds::Bounds;
pub use bounds::BoundsNormalizer;
pub use bounds::FeasibleRegion;
pub use bounds::WeightBounds;
pub use constraints::Constraint;
pub use constraints::ConstraintKind;
pub use frontier::EfficientFrontier;
pub use frontier::Tolerance;
pub use objectives::Objective;
pub use objectives::ObjectiveContext;
pub use solver::SolveReport;
pub use solver::SolverConfig;
pub use solver::SolverMethod;
pub use types::Allocation;
pub use types::CovarianceMatrix;
pub use types::Diagnostic;
pub use types::DiagnosticKind;
pub use types::ExpectedReturns;
pub use types::PortfolioPerformance;
pub use weights::WeightMapper;
pub use weights::Weights;
