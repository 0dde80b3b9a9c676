//! Portfolio risk metrics calculation.
//!
//! Provides annualized volatility, Sharpe ratio, beta, alpha, R², historical
//! VaR and drawdowns, computed from daily simple returns.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::stats::{covariance, mean, pearson, percentile, sample_std, sample_variance};
use crate::config::RiskConfig;
use crate::market::HistoricalSeries;
use crate::types::{normalize_ticker, Period, Portfolio};
use crate::{Error, Result};

/// Denominators at or below this are treated as zero.
const MIN_DENOMINATOR: f64 = 1e-15;

/// Full risk report for a portfolio against its benchmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    pub period: Period,
    pub benchmark: String,
    /// Number of daily return observations used
    pub observations: usize,
    /// Weights applied to each constituent's daily returns
    pub weights: BTreeMap<String, f64>,
    /// Holdings left out because they have no history
    pub excluded: BTreeSet<String>,
    /// Mean daily return × trading days
    pub annualized_return: f64,
    /// Daily standard deviation × √trading days
    pub annualized_volatility: f64,
    /// `None` when volatility is zero
    pub sharpe_ratio: Option<f64>,
    pub benchmark_return: f64,
    pub benchmark_volatility: f64,
    /// `None` when the benchmark has no variance
    pub beta: Option<f64>,
    pub alpha: Option<f64>,
    /// `None` when either series has no variance
    pub r_squared: Option<f64>,
    pub var_confidence: f64,
    /// Portfolio value the VaR is expressed against
    pub portfolio_value: f64,
    /// Historical VaR as a positive dollar loss
    pub value_at_risk: f64,
    pub dates: Vec<NaiveDate>,
    /// Cumulative return of the weighted portfolio per date
    pub cumulative_returns: Vec<f64>,
    /// `cumulative − running max` per date, never positive
    pub drawdowns: Vec<f64>,
    pub max_drawdown: f64,
}

impl RiskReport {
    /// Whether some holdings were left out of the calculation.
    pub fn is_degraded(&self) -> bool {
        !self.excluded.is_empty()
    }
}

/// Target-allocation weights over the holdings that have data.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TargetWeights {
    pub tickers: Vec<String>,
    pub weights: Vec<f64>,
    pub excluded: BTreeSet<String>,
}

impl TargetWeights {
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.tickers
            .iter()
            .cloned()
            .zip(self.weights.iter().copied())
            .collect()
    }
}

/// Weights for combining constituent returns into a portfolio series.
///
/// Normalized targets of the holdings with data are rescaled so they keep the
/// total invested target of the whole portfolio; the rest stays in cash. When
/// no holding with data has a target, they are weighted equally. Holdings with
/// a zero weight are dropped so their gaps do not cost observations.
pub(crate) fn target_weights(
    portfolio: &Portfolio,
    history: &HistoricalSeries,
) -> Result<TargetWeights> {
    if portfolio.is_empty() {
        return Err(Error::DataUnavailable(
            "portfolio has no holdings".to_string(),
        ));
    }

    let targets = portfolio.normalized_targets()?;
    let (available, excluded): (Vec<String>, Vec<String>) = targets
        .keys()
        .cloned()
        .partition(|ticker| history.has_ticker(ticker));
    let excluded: BTreeSet<String> = excluded.into_iter().collect();

    if available.is_empty() {
        return Err(Error::DataUnavailable(format!(
            "no history for any holding: {:?}",
            excluded
        )));
    }
    if !excluded.is_empty() {
        warn!(excluded = ?excluded, "holdings without history left out");
    }

    let invested: f64 = targets.values().sum();
    let available_total: f64 = available.iter().map(|t| targets[t]).sum();

    let weights: Vec<f64> = if available_total > 0.0 {
        available
            .iter()
            .map(|t| targets[t] * invested / available_total)
            .collect()
    } else {
        warn!("no target allocations set; weighting holdings equally");
        vec![1.0 / available.len() as f64; available.len()]
    };

    let (tickers, weights): (Vec<String>, Vec<f64>) = available
        .into_iter()
        .zip(weights)
        .filter(|(_, w)| *w > 0.0)
        .unzip();

    Ok(TargetWeights {
        tickers,
        weights,
        excluded,
    })
}

/// Risk engine configured with a [`RiskConfig`].
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    /// Create an engine with the given settings.
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// The engine settings.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Calculate the full set of risk metrics.
    ///
    /// # Arguments
    ///
    /// * `portfolio` - Holdings with target allocations used as return weights
    /// * `history` - Adjusted closes for the holdings and the benchmark
    /// * `portfolio_value` - Dollar value the VaR is expressed against
    ///
    /// # Returns
    ///
    /// A [`RiskReport`], [`Error::DataUnavailable`] when the benchmark or every
    /// holding lacks history, or [`Error::InsufficientData`] when fewer than
    /// `min_observations` complete return rows exist.
    pub fn analyze(
        &self,
        portfolio: &Portfolio,
        history: &HistoricalSeries,
        portfolio_value: f64,
    ) -> Result<RiskReport> {
        let config = &self.config;
        let benchmark = normalize_ticker(&config.benchmark);
        if !history.has_ticker(&benchmark) {
            return Err(Error::DataUnavailable(format!(
                "no history for benchmark {}",
                benchmark
            )));
        }

        let target = target_weights(portfolio, history)?;

        let mut columns = target.tickers.clone();
        columns.push(benchmark.clone());
        let returns = history.select(&columns).returns();

        let observations = returns.len();
        if observations < config.min_observations {
            return Err(Error::InsufficientData {
                required: config.min_observations,
                available: observations,
            });
        }

        let mut weights = target.weights.clone();
        weights.push(0.0);
        let portfolio_returns = returns.weighted(&weights);
        let benchmark_returns: Vec<f64> =
            returns.rows.iter().map(|row| row[row.len() - 1]).collect();

        let days = config.trading_days;
        let rf = config.risk_free_rate;
        let annual_return = annualized_return(&portfolio_returns, days)?;
        let annual_volatility = annualized_volatility(&portfolio_returns, days)?;
        let benchmark_return = annualized_return(&benchmark_returns, days)?;
        let benchmark_volatility = annualized_volatility(&benchmark_returns, days)?;

        let sharpe = undefined_as_none(
            sharpe_ratio(annual_return, rf, annual_volatility),
            "sharpe ratio",
        )?;
        let beta_value = undefined_as_none(beta(&portfolio_returns, &benchmark_returns), "beta")?;
        let alpha_value = beta_value.map(|b| alpha(annual_return, benchmark_return, b, rf));
        let r2 = undefined_as_none(
            r_squared(&portfolio_returns, &benchmark_returns),
            "r squared",
        )?;

        let var = historical_var(&portfolio_returns, portfolio_value, config.var_confidence)?;
        let cumulative = cumulative_returns(&portfolio_returns);
        let drawdowns = drawdown_series(&cumulative);
        let max_dd = max_drawdown(&drawdowns);

        debug!(
            observations,
            annual_return, annual_volatility, var, "computed risk metrics"
        );

        Ok(RiskReport {
            period: history.period,
            benchmark,
            observations,
            weights: target.as_map(),
            excluded: target.excluded,
            annualized_return: annual_return,
            annualized_volatility: annual_volatility,
            sharpe_ratio: sharpe,
            benchmark_return,
            benchmark_volatility,
            beta: beta_value,
            alpha: alpha_value,
            r_squared: r2,
            var_confidence: config.var_confidence,
            portfolio_value,
            value_at_risk: var,
            dates: returns.dates,
            cumulative_returns: cumulative,
            drawdowns,
            max_drawdown: max_dd,
        })
    }
}

/// Report a zero-denominator metric as N/A; every other failure propagates.
fn undefined_as_none(result: Result<f64>, metric: &str) -> Result<Option<f64>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::DivisionUndefined(reason)) => {
            warn!(metric, reason = %reason, "metric not defined");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn require(daily: &[f64], required: usize) -> Result<()> {
    if daily.len() < required {
        return Err(Error::InsufficientData {
            required,
            available: daily.len(),
        });
    }
    Ok(())
}

/// Arithmetic annualized return: mean daily return × trading days.
pub fn annualized_return(daily: &[f64], trading_days: f64) -> Result<f64> {
    require(daily, 1)?;
    Ok(mean(daily).unwrap_or_default() * trading_days)
}

/// Annualized volatility: sample standard deviation × √trading days.
pub fn annualized_volatility(daily: &[f64], trading_days: f64) -> Result<f64> {
    require(daily, 2)?;
    Ok(sample_std(daily).unwrap_or_default() * trading_days.sqrt())
}

/// Sharpe ratio from annualized figures.
///
/// Fails with [`Error::DivisionUndefined`] when volatility is zero.
pub fn sharpe_ratio(
    annual_return: f64,
    risk_free_rate: f64,
    annual_volatility: f64,
) -> Result<f64> {
    if annual_volatility <= MIN_DENOMINATOR {
        return Err(Error::DivisionUndefined(
            "sharpe ratio with zero volatility".to_string(),
        ));
    }
    Ok((annual_return - risk_free_rate) / annual_volatility)
}

/// Beta of portfolio returns against benchmark returns: `cov(p, b) / var(b)`.
pub fn beta(portfolio: &[f64], benchmark: &[f64]) -> Result<f64> {
    require(portfolio, 2)?;
    require(benchmark, 2)?;
    let var_b = sample_variance(benchmark).unwrap_or_default();
    if var_b <= MIN_DENOMINATOR {
        return Err(Error::DivisionUndefined(
            "beta with zero benchmark variance".to_string(),
        ));
    }
    Ok(covariance(portfolio, benchmark).unwrap_or_default() / var_b)
}

/// Jensen's alpha: `R_p − (rf + β (R_b − rf))`.
pub fn alpha(portfolio_return: f64, benchmark_return: f64, beta: f64, risk_free_rate: f64) -> f64 {
    portfolio_return - (risk_free_rate + beta * (benchmark_return - risk_free_rate))
}

/// Squared Pearson correlation of portfolio and benchmark returns.
pub fn r_squared(portfolio: &[f64], benchmark: &[f64]) -> Result<f64> {
    require(portfolio, 2)?;
    require(benchmark, 2)?;
    pearson(portfolio, benchmark)
        .map(|r| r * r)
        .ok_or_else(|| Error::DivisionUndefined("r squared with zero variance".to_string()))
}

/// Historical Value at Risk.
///
/// The `(1 − confidence)` percentile of daily P&L (`value × r_t`), reported as a
/// positive dollar loss. Zero when even that percentile is a gain.
pub fn historical_var(daily: &[f64], portfolio_value: f64, confidence: f64) -> Result<f64> {
    require(daily, 1)?;
    let pnl: Vec<f64> = daily.iter().map(|r| portfolio_value * r).collect();
    let cutoff = percentile(&pnl, 1.0 - confidence).unwrap_or_default();
    Ok((-cutoff).max(0.0))
}

/// Compounded cumulative return at each step: `Π(1 + r) − 1`.
pub fn cumulative_returns(daily: &[f64]) -> Vec<f64> {
    let mut growth = 1.0;
    daily
        .iter()
        .map(|r| {
            growth *= 1.0 + r;
            growth - 1.0
        })
        .collect()
}

/// Drawdown at each step: `cum_t − max(cum_0..=cum_t)`.
pub fn drawdown_series(cumulative: &[f64]) -> Vec<f64> {
    let mut running_max = f64::NEG_INFINITY;
    cumulative
        .iter()
        .map(|&value| {
            running_max = running_max.max(value);
            value - running_max
        })
        .collect()
}

/// Deepest drawdown (the minimum of the series); zero for an empty series.
pub fn max_drawdown(drawdowns: &[f64]) -> f64 {
    drawdowns.iter().copied().fold(0.0, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Holding;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn wave(n: usize, scale: f64, phase: f64) -> Vec<f64> {
        (0..n)
            .map(|i| scale * ((i as f64 * 0.7 + phase).sin() + 0.3 * (i as f64 * 1.9).cos()))
            .collect()
    }

    fn prices_from(returns: &[f64]) -> Vec<f64> {
        let mut price = 100.0;
        let mut prices = vec![price];
        for r in returns {
            price *= 1.0 + r;
            prices.push(price);
        }
        prices
    }

    fn history(columns: &[(&str, Vec<f64>)]) -> HistoricalSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let tickers = columns.iter().map(|(t, _)| t.to_string()).collect();
        let mut series = HistoricalSeries::new(Period::OneYear, tickers);
        let len = columns[0].1.len();
        for i in 0..len {
            let row = columns.iter().map(|(_, p)| Some(p[i])).collect();
            series.push_row(start + Duration::days(i as i64), row).unwrap();
        }
        series
    }

    #[test]
    fn test_sharpe_zero_volatility() {
        let result = sharpe_ratio(0.05, 0.02, 0.0);
        assert!(matches!(result, Err(Error::DivisionUndefined(_))));
    }

    #[test]
    fn test_zero_variance_single_asset() {
        let flat = vec![0.0; 150];
        let vol = annualized_volatility(&flat, 252.0).unwrap();
        let ret = annualized_return(&flat, 252.0).unwrap();
        assert_eq!(vol, 0.0);
        assert!(matches!(
            sharpe_ratio(ret, 0.02, vol),
            Err(Error::DivisionUndefined(_))
        ));
    }

    #[test]
    fn test_volatility_annualization() {
        let daily = [0.01, -0.01, 0.01, -0.01];
        let expected = sample_std(&daily).unwrap() * 252.0_f64.sqrt();
        assert_relative_eq!(annualized_volatility(&daily, 252.0).unwrap(), expected);
        assert!(annualized_volatility(&[0.01], 252.0).is_err());
    }

    #[test]
    fn test_historical_var() {
        let daily: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        // 5th percentile of -0.05..0.049 is -0.04505
        let var = historical_var(&daily, 10_000.0, 0.95).unwrap();
        assert_relative_eq!(var, 450.5, epsilon = 1e-6);

        let gains = vec![0.01; 10];
        assert_eq!(historical_var(&gains, 10_000.0, 0.95).unwrap(), 0.0);
    }

    #[test]
    fn test_drawdown_series() {
        let cumulative = [0.10, 0.155, -0.0185, -0.11665, 0.20];
        let drawdowns = drawdown_series(&cumulative);

        assert_eq!(drawdowns[0], 0.0);
        assert_eq!(drawdowns[1], 0.0);
        assert_relative_eq!(drawdowns[3], -0.27165, epsilon = 1e-12);
        assert_eq!(drawdowns[4], 0.0);
        assert_relative_eq!(max_drawdown(&drawdowns), -0.27165, epsilon = 1e-12);
    }

    #[test]
    fn test_max_drawdown_no_loss() {
        let cumulative = cumulative_returns(&[0.01, 0.02, 0.03, 0.01, 0.02]);
        assert_eq!(max_drawdown(&drawdown_series(&cumulative)), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_analyze_leveraged_benchmark() {
        let bench = wave(200, 0.01, 0.0);
        let doubled: Vec<f64> = bench.iter().map(|r| 2.0 * r).collect();
        let history = history(&[("LEV", prices_from(&doubled)), ("SPY", prices_from(&bench))]);
        let portfolio = Portfolio::new().with_holding(Holding::new("LEV", 10.0).with_target(1.0));

        let report = RiskEngine::default()
            .analyze(&portfolio, &history, 10_000.0)
            .unwrap();

        assert_eq!(report.observations, 200);
        assert_relative_eq!(report.beta.unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(report.r_squared.unwrap(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(report.alpha.unwrap(), 0.02, epsilon = 1e-9);
        assert!(report.value_at_risk > 0.0);
        assert!(report.max_drawdown <= 0.0);
        assert!(report.sharpe_ratio.is_some());
    }

    #[test]
    fn test_analyze_insufficient_data() {
        let bench = wave(100, 0.01, 0.0);
        let history = history(&[("A", prices_from(&bench)), ("SPY", prices_from(&bench))]);
        let portfolio = Portfolio::new().with_holding(Holding::new("A", 1.0).with_target(1.0));

        let result = RiskEngine::default().analyze(&portfolio, &history, 1_000.0);
        assert!(matches!(
            result,
            Err(Error::InsufficientData {
                required: 126,
                available: 100
            })
        ));
    }

    #[test]
    fn test_analyze_flat_asset_sharpe_undefined() {
        let bench = wave(150, 0.01, 1.0);
        let flat = vec![50.0; 151];
        let history = history(&[("CASHX", flat), ("SPY", prices_from(&bench))]);
        let portfolio = Portfolio::new().with_holding(Holding::new("CASHX", 1.0).with_target(1.0));

        let report = RiskEngine::default()
            .analyze(&portfolio, &history, 1_000.0)
            .unwrap();
        assert!(report.sharpe_ratio.is_none());
        assert!(report.r_squared.is_none());
        assert_eq!(report.beta, Some(0.0));
        assert_eq!(report.value_at_risk, 0.0);
    }

    #[test]
    fn test_analyze_excludes_holdings_without_history() {
        let bench = wave(150, 0.01, 0.0);
        let history = history(&[
            ("A", prices_from(&wave(150, 0.02, 2.0))),
            ("SPY", prices_from(&bench)),
        ]);
        let portfolio = Portfolio::new()
            .with_holding(Holding::new("A", 1.0).with_target(0.3))
            .with_holding(Holding::new("B", 1.0).with_target(0.6));

        let report = RiskEngine::default()
            .analyze(&portfolio, &history, 1_000.0)
            .unwrap();
        assert!(report.excluded.contains("B"));
        assert_relative_eq!(report.weights["A"], 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_analyze_missing_benchmark() {
        let history = history(&[("A", prices_from(&wave(150, 0.01, 0.0)))]);
        let portfolio = Portfolio::new().with_holding(Holding::new("A", 1.0).with_target(1.0));
        let result = RiskEngine::default().analyze(&portfolio, &history, 1_000.0);
        assert!(matches!(result, Err(Error::DataUnavailable(_))));
    }
}
