//! # efficient-frontier
//!
//! $$
//! \min_{\mathbf{w}} \ \mathbf{w}^\top \Sigma \mathbf{w}
//! \quad \text{s.t.} \quad \mathbf{1}^\top \mathbf{w} = 1,\ \ell \le \mathbf{w} \le u
//! $$
//!
//! Mean-variance portfolio optimization: tangency (max Sharpe), minimum
//! volatility, efficient risk / efficient return targets, closed-form
//! unconstrained utility and user supplied objectives.

pub mod error;
pub mod portfolio;

pub use error::FrontierError;
pub use error::Result;
pub use portfolio::EfficientFrontier;
