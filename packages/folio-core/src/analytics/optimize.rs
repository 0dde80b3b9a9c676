//! Long-only mean-variance optimization.
//!
//! Weights are parameterized through a softmax so every candidate already
//! satisfies `Σw = 1, 0 ≤ w ≤ 1`; Nelder-Mead searches the unconstrained
//! parameters starting from equal weights.

use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::stats::{covariance, dot, mat_vec_mul, mean};
use crate::config::{EngineConfig, OptimizerConfig};
use crate::market::ReturnTable;
use crate::types::{OptimizationResult, OptimizationStatus};
use crate::{Error, Result};

/// Variances at or below this are treated as zero.
const MIN_VARIANCE: f64 = 1e-15;
/// Weight of the target-return penalty in the frontier objective.
const RETURN_PENALTY: f64 = 1e5;
/// Largest accepted miss of a frontier target, as a fraction of the return range.
const TARGET_TOLERANCE: f64 = 1e-3;
const SD_TOLERANCE: f64 = 1e-8;

/// Expected returns and covariance of a set of assets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeanVariance {
    pub tickers: Vec<String>,
    pub mean: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
}

impl MeanVariance {
    /// Build from explicit inputs, checking dimensions.
    pub fn new(tickers: Vec<String>, mean: Vec<f64>, covariance: Vec<Vec<f64>>) -> Result<Self> {
        let n = tickers.len();
        if mean.len() != n || covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(Error::ConfigInvalid(format!(
                "mean/covariance dimensions do not match {} tickers",
                n
            )));
        }
        if mean.iter().chain(covariance.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(Error::ConfigInvalid(
                "mean/covariance contain non-finite values".to_string(),
            ));
        }
        Ok(Self {
            tickers,
            mean,
            covariance,
        })
    }

    /// Estimate from daily returns, multiplying mean and covariance by `scale`
    /// (the trading days per year to annualize, 1 to keep daily figures).
    pub fn from_returns(returns: &ReturnTable, scale: f64) -> Result<Self> {
        if returns.len() < 2 {
            return Err(Error::InsufficientData {
                required: 2,
                available: returns.len(),
            });
        }

        let columns = returns.columns();
        let mean_vec = columns
            .iter()
            .map(|c| mean(c).unwrap_or_default() * scale)
            .collect();
        let cov = columns
            .iter()
            .map(|a| {
                columns
                    .iter()
                    .map(|b| covariance(a, b).unwrap_or_default() * scale)
                    .collect()
            })
            .collect();

        Self::new(returns.tickers.clone(), mean_vec, cov)
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    /// Whether there are no assets.
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    /// Expected portfolio return `wᵀμ`.
    pub fn expected_return(&self, weights: &[f64]) -> f64 {
        dot(weights, &self.mean)
    }

    /// Portfolio volatility `sqrt(wᵀΣw)`.
    pub fn volatility(&self, weights: &[f64]) -> f64 {
        dot(weights, &mat_vec_mul(&self.covariance, weights))
            .max(0.0)
            .sqrt()
    }

    fn check_solvable(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::DataUnavailable("no assets to optimize".to_string()));
        }
        if (0..self.len()).all(|i| self.covariance[i][i] <= MIN_VARIANCE) {
            return Err(Error::DivisionUndefined(
                "every asset has zero variance".to_string(),
            ));
        }
        Ok(())
    }

    fn weight_map(&self, weights: &[f64]) -> BTreeMap<String, f64> {
        self.tickers
            .iter()
            .cloned()
            .zip(weights.iter().copied())
            .collect()
    }

    fn result(
        &self,
        weights: &[f64],
        risk_free_rate: f64,
        status: OptimizationStatus,
    ) -> OptimizationResult {
        let expected_return = self.expected_return(weights);
        let volatility = self.volatility(weights);
        let sharpe_ratio = sharpe(expected_return, volatility, risk_free_rate);
        if sharpe_ratio.is_none() {
            warn!(volatility, "zero portfolio volatility; sharpe ratio undefined");
        }

        OptimizationResult {
            weights: self.weight_map(weights),
            expected_return,
            volatility,
            sharpe_ratio,
            status,
        }
    }
}

fn softmax(x: &[f64]) -> Vec<f64> {
    if x.is_empty() {
        return Vec::new();
    }

    let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
    let sum: f64 = exps.iter().sum();

    if sum < 1e-15 {
        vec![1.0 / x.len() as f64; x.len()]
    } else {
        exps.iter().map(|&e| e / sum).collect()
    }
}

struct NegativeSharpe {
    mean: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    risk_free_rate: f64,
}

impl CostFunction for NegativeSharpe {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let w = softmax(x);
        let port_var = dot(&w, &mat_vec_mul(&self.covariance, &w));
        if port_var <= MIN_VARIANCE {
            return Ok(f64::MAX.sqrt());
        }
        Ok(-(dot(&w, &self.mean) - self.risk_free_rate) / port_var.sqrt())
    }
}

struct TargetVariance {
    mean: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    target_return: f64,
    variance_scale: f64,
    return_scale: f64,
}

impl CostFunction for TargetVariance {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let w = softmax(x);
        let port_var = dot(&w, &mat_vec_mul(&self.covariance, &w));
        let miss = (dot(&w, &self.mean) - self.target_return) / self.return_scale;
        Ok(port_var / self.variance_scale + RETURN_PENALTY * miss * miss)
    }
}

/// Minimize `cost` over softmax parameters from equal weights.
///
/// Returns the weights only when the solver reports convergence within `max_iters`.
fn solve<C>(cost: C, n: usize, max_iters: u64) -> Option<Vec<f64>>
where
    C: CostFunction<Param = Vec<f64>, Output = f64>,
{
    let x0 = vec![0.0; n];
    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(x0.clone());
    for i in 0..n {
        let mut point = x0.clone();
        point[i] = 1.0;
        simplex.push(point);
    }

    let solver = NelderMead::new(simplex).with_sd_tolerance(SD_TOLERANCE).ok()?;
    let res = Executor::new(cost, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
        .ok()?;

    let converged = matches!(
        res.state.get_termination_reason(),
        Some(TerminationReason::SolverConverged)
    );
    if !converged {
        debug!(
            iterations = res.state.get_iter(),
            reason = ?res.state.get_termination_reason(),
            "solver stopped without converging"
        );
        return None;
    }
    res.state.best_param.map(|x| softmax(&x))
}

fn sharpe(expected_return: f64, volatility: f64, risk_free_rate: f64) -> Option<f64> {
    (volatility > MIN_VARIANCE).then(|| (expected_return - risk_free_rate) / volatility)
}

/// Weights maximizing `(wᵀμ − rf) / sqrt(wᵀΣw)` subject to `Σw = 1, 0 ≤ w ≤ 1`.
///
/// When the solver does not converge within `max_iters` the equal-weight
/// portfolio is returned with [`OptimizationStatus::OptimizationDegenerate`].
/// An empty asset set is [`Error::DataUnavailable`]; a set where every asset has
/// zero variance is [`Error::DivisionUndefined`].
pub fn max_sharpe(
    problem: &MeanVariance,
    risk_free_rate: f64,
    max_iters: u64,
) -> Result<OptimizationResult> {
    problem.check_solvable()?;
    let n = problem.len();
    if n == 1 {
        return Ok(problem.result(&[1.0], risk_free_rate, OptimizationStatus::Converged));
    }

    let cost = NegativeSharpe {
        mean: problem.mean.clone(),
        covariance: problem.covariance.clone(),
        risk_free_rate,
    };

    match solve(cost, n, max_iters) {
        Some(weights) => Ok(problem.result(
            &weights,
            risk_free_rate,
            OptimizationStatus::Converged,
        )),
        None => {
            warn!(assets = n, max_iters, "optimizer did not converge; using equal weights");
            let equal = vec![1.0 / n as f64; n];
            Ok(problem.result(
                &equal,
                risk_free_rate,
                OptimizationStatus::OptimizationDegenerate,
            ))
        }
    }
}

/// One point of the efficient frontier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontierPoint {
    pub target_return: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub weights: BTreeMap<String, f64>,
}

/// Minimum-volatility portfolios for `points` targets evenly spaced from
/// `min(μ)` to `max(μ)`.
///
/// Each target is solved independently; a target the solver cannot reach is
/// left out. A single asset, a single requested point, or assets that all
/// share one expected return yield at most one point, the minimum-volatility
/// portfolio at `min(μ)`. Zero points is [`Error::ConfigInvalid`].
pub fn efficient_frontier(
    problem: &MeanVariance,
    points: usize,
    max_iters: u64,
) -> Result<Vec<FrontierPoint>> {
    if points == 0 {
        return Err(Error::ConfigInvalid(
            "efficient frontier needs at least one point".to_string(),
        ));
    }
    problem.check_solvable()?;
    let n = problem.len();

    if n == 1 {
        return Ok(vec![FrontierPoint {
            target_return: problem.mean[0],
            expected_return: problem.mean[0],
            volatility: problem.volatility(&[1.0]),
            weights: problem.weight_map(&[1.0]),
        }]);
    }

    let lo = problem.mean.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = problem.mean.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    let (targets, return_scale): (Vec<f64>, f64) = if range <= MIN_VARIANCE || points == 1 {
        (vec![lo], if range > MIN_VARIANCE { range } else { 1.0 })
    } else {
        let step = range / (points - 1) as f64;
        ((0..points).map(|i| lo + step * i as f64).collect(), range)
    };

    let variance_scale = (0..n).map(|i| problem.covariance[i][i]).sum::<f64>() / n as f64;

    let mut frontier = Vec::with_capacity(targets.len());
    for target_return in targets {
        let cost = TargetVariance {
            mean: problem.mean.clone(),
            covariance: problem.covariance.clone(),
            target_return,
            variance_scale,
            return_scale,
        };

        let Some(weights) = solve(cost, n, max_iters) else {
            debug!(target_return, "frontier point did not converge");
            continue;
        };

        let expected_return = problem.expected_return(&weights);
        if (expected_return - target_return).abs() > TARGET_TOLERANCE * return_scale {
            debug!(target_return, expected_return, "frontier target not reached");
            continue;
        }

        frontier.push(FrontierPoint {
            target_return,
            expected_return,
            volatility: problem.volatility(&weights),
            weights: problem.weight_map(&weights),
        });
    }

    debug!(points = frontier.len(), "computed efficient frontier");
    Ok(frontier)
}

/// Risk and return of a fixed weighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioMetrics {
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub volatility: f64,
    /// `None` when volatility is zero
    pub sharpe_ratio: Option<f64>,
}

/// Current target allocation next to the maximum-Sharpe allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationComparison {
    pub current: PortfolioMetrics,
    pub optimized: OptimizationResult,
}

/// Optimizer configured with an [`OptimizerConfig`] and the risk-free rate.
#[derive(Debug, Clone)]
pub struct OptimizationEngine {
    config: OptimizerConfig,
    risk_free_rate: f64,
    trading_days: f64,
}

impl Default for OptimizationEngine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl OptimizationEngine {
    /// Create an engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Frontier size, iteration cap and annualization switch
    /// * `risk_free_rate` - Annual risk-free rate
    /// * `trading_days` - Trading days per year
    pub fn new(config: OptimizerConfig, risk_free_rate: f64, trading_days: f64) -> Self {
        Self {
            config,
            risk_free_rate,
            trading_days,
        }
    }

    /// Create an engine from the full configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.optimizer.clone(),
            config.risk.risk_free_rate,
            config.risk.trading_days,
        )
    }

    /// Risk-free rate in the same units as the optimizer inputs.
    pub fn risk_free_rate(&self) -> f64 {
        if self.config.annualize {
            self.risk_free_rate
        } else {
            self.risk_free_rate / self.trading_days
        }
    }

    /// Mean and covariance of daily returns, annualized when configured.
    pub fn mean_variance(&self, returns: &ReturnTable) -> Result<MeanVariance> {
        let scale = if self.config.annualize {
            self.trading_days
        } else {
            1.0
        };
        MeanVariance::from_returns(returns, scale)
    }

    /// Maximum-Sharpe weights for the assets in `returns`.
    pub fn optimize(&self, returns: &ReturnTable) -> Result<OptimizationResult> {
        let problem = self.mean_variance(returns)?;
        max_sharpe(&problem, self.risk_free_rate(), self.config.max_iterations)
    }

    /// Efficient frontier for the assets in `returns`.
    pub fn frontier(&self, returns: &ReturnTable) -> Result<Vec<FrontierPoint>> {
        let problem = self.mean_variance(returns)?;
        efficient_frontier(&problem, self.config.frontier_points, self.config.max_iterations)
    }

    /// Compare a current weighting with the optimized one.
    ///
    /// `current` is rescaled to sum to 1 over the assets in `returns`; assets it
    /// does not mention get zero weight. With no usable weight at all the
    /// current portfolio is taken as equal-weighted.
    pub fn compare(
        &self,
        returns: &ReturnTable,
        current: &BTreeMap<String, f64>,
    ) -> Result<OptimizationComparison> {
        let problem = self.mean_variance(returns)?;
        let rf = self.risk_free_rate();
        let optimized = max_sharpe(&problem, rf, self.config.max_iterations)?;

        let raw: Vec<f64> = problem
            .tickers
            .iter()
            .map(|t| current.get(t).copied().unwrap_or(0.0).max(0.0))
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = if total > 0.0 {
            raw.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / problem.len() as f64; problem.len()]
        };

        let expected_return = problem.expected_return(&weights);
        let volatility = problem.volatility(&weights);
        let sharpe_ratio = sharpe(expected_return, volatility, rf);

        Ok(OptimizationComparison {
            current: PortfolioMetrics {
                weights: problem.weight_map(&weights),
                expected_return,
                volatility,
                sharpe_ratio,
            },
            optimized,
        })
    }
}
