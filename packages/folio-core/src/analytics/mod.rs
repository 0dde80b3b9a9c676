//! Analytics engines: risk metrics, mean-variance optimization and rebalancing.
//!
//! Every engine is a pure function of its inputs; none of them fetches data
//! or mutates the portfolio.

mod optimize;
mod rebalance;
mod risk;
pub mod stats;

pub use optimize::{
    efficient_frontier, max_sharpe, FrontierPoint, MeanVariance, OptimizationComparison,
    OptimizationEngine, PortfolioMetrics,
};
pub use rebalance::{RebalancePlan, RebalancingEngine};
pub use risk::{
    alpha, annualized_return, annualized_volatility, beta, cumulative_returns, drawdown_series,
    historical_var, max_drawdown, r_squared, sharpe_ratio, RiskEngine, RiskReport,
};

pub(crate) use risk::target_weights;
