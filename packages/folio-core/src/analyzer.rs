//! Portfolio analyzer: wires a market data provider to the engines.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::alerts::{PriceAlert, PriceAlertChecker};
use crate::analytics::{
    FrontierPoint, OptimizationComparison, OptimizationEngine, RebalancePlan, RebalancingEngine,
    RiskEngine, RiskReport,
};
use crate::config::EngineConfig;
use crate::market::{HistoricalSeries, MarketDataProvider, ReturnTable};
use crate::portfolio::{
    compute_allocation, compute_sector_breakdown, compute_value, Allocation, PerformanceReport,
    PortfolioValue, SectorBreakdown,
};
use crate::types::{normalize_ticker, OptimizationResult, Period, Portfolio, PriceMap};
use crate::{Error, Result};

/// Runs every analysis for a portfolio, fetching what it needs from a provider.
pub struct PortfolioAnalyzer<P> {
    provider: P,
    config: EngineConfig,
}

impl<P: MarketDataProvider> PortfolioAnalyzer<P> {
    /// Create an analyzer with the default configuration.
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, EngineConfig::default())
    }

    /// Create an analyzer with the given configuration.
    pub fn with_config(provider: P, config: EngineConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current prices for every holding.
    pub fn prices(&self, portfolio: &Portfolio) -> Result<PriceMap> {
        self.provider.current_prices(&portfolio.tickers())
    }

    pub fn value(&self, portfolio: &Portfolio) -> Result<PortfolioValue> {
        compute_value(portfolio, &self.prices(portfolio)?)
    }

    pub fn allocation(&self, portfolio: &Portfolio) -> Result<Allocation> {
        compute_allocation(portfolio, &self.prices(portfolio)?)
    }

    pub fn sectors(&self, portfolio: &Portfolio) -> Result<SectorBreakdown> {
        compute_sector_breakdown(portfolio, &self.prices(portfolio)?)
    }

    /// Risk metrics against the configured benchmark.
    ///
    /// VaR is expressed against the current gross value.
    pub fn risk(&self, portfolio: &Portfolio, period: Period) -> Result<RiskReport> {
        let value = self.value(portfolio)?;
        let mut tickers = portfolio.tickers();
        tickers.insert(normalize_ticker(&self.config.risk.benchmark));

        let history = self.provider.historical_series(&tickers, period)?;
        RiskEngine::new(self.config.risk.clone()).analyze(portfolio, &history, value.gross)
    }

    pub fn performance(&self, portfolio: &Portfolio, period: Period) -> Result<PerformanceReport> {
        let history = self.history(portfolio, period)?;
        PerformanceReport::analyze(portfolio, &history, self.config.risk.trading_days)
    }

    /// Maximum-Sharpe weights over the holdings with history.
    pub fn optimize(&self, portfolio: &Portfolio, period: Period) -> Result<OptimizationResult> {
        let returns = self.returns(portfolio, period)?;
        OptimizationEngine::from_config(&self.config).optimize(&returns)
    }

    pub fn frontier(&self, portfolio: &Portfolio, period: Period) -> Result<Vec<FrontierPoint>> {
        let returns = self.returns(portfolio, period)?;
        OptimizationEngine::from_config(&self.config).frontier(&returns)
    }

    /// The current target allocation next to the maximum-Sharpe allocation.
    pub fn compare(&self, portfolio: &Portfolio, period: Period) -> Result<OptimizationComparison> {
        let returns = self.returns(portfolio, period)?;
        let current = portfolio.normalized_targets()?;
        OptimizationEngine::from_config(&self.config).compare(&returns, &current)
    }

    pub fn rebalance(&self, portfolio: &Portfolio) -> Result<RebalancePlan> {
        let prices = self.prices(portfolio)?;
        RebalancingEngine::new(self.config.rebalance.clone()).plan(portfolio, &prices)
    }

    pub fn alerts(&self, portfolio: &Portfolio) -> Result<Vec<PriceAlert>> {
        let prices = self.prices(portfolio)?;
        Ok(PriceAlertChecker::new(self.config.alerts.clone()).check(portfolio, &prices))
    }

    fn history(&self, portfolio: &Portfolio, period: Period) -> Result<HistoricalSeries> {
        if portfolio.is_empty() {
            return Err(Error::DataUnavailable("portfolio has no holdings".to_string()));
        }
        self.provider.historical_series(&portfolio.tickers(), period)
    }

    /// Daily returns of the holdings that have history.
    fn returns(&self, portfolio: &Portfolio, period: Period) -> Result<ReturnTable> {
        let history = self.history(portfolio, period)?;
        let (available, missing): (Vec<String>, Vec<String>) = portfolio
            .holdings
            .keys()
            .cloned()
            .partition(|t| history.has_ticker(t));

        if available.is_empty() {
            return Err(Error::DataUnavailable(
                "no history for any holding".to_string(),
            ));
        }
        if !missing.is_empty() {
            let missing: BTreeSet<String> = missing.into_iter().collect();
            warn!(excluded = ?missing, "holdings without history left out of optimization");
        }

        let returns = history.select(&available).returns();
        debug!(assets = returns.tickers.len(), observations = returns.len(), "prepared returns");
        Ok(returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::StaticMarketData;
    use crate::types::Holding;
    use chrono::{Duration, NaiveDate};

    fn provider() -> StaticMarketData {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let closes = |scale: f64, phase: f64| {
            (0..200)
                .map(move |i| {
                    let price = 100.0 + scale * ((i as f64 * 0.4 + phase).sin() + i as f64 * 0.05);
                    (start + Duration::days(i), price)
                })
                .collect::<Vec<_>>()
        };

        StaticMarketData::new()
            .with_price("AAPL", 150.0)
            .with_price("MSFT", 300.0)
            .with_history("AAPL", closes(3.0, 0.0))
            .with_history("MSFT", closes(5.0, 1.3))
            .with_history("SPY", closes(2.0, 0.4))
    }

    fn portfolio() -> Portfolio {
        Portfolio::with_cash(500.0)
            .with_holding(Holding::new("AAPL", 10.0).with_target(0.5))
            .with_holding(Holding::new("MSFT", 5.0).with_target(0.4))
    }

    #[test]
    fn test_value_through_provider() {
        let analyzer = PortfolioAnalyzer::new(provider());
        let value = analyzer.value(&portfolio()).unwrap();
        assert_eq!(value.gross, 3500.0);
        assert!(!value.is_degraded());
    }

    #[test]
    fn test_risk_through_provider() {
        let analyzer = PortfolioAnalyzer::new(provider());
        let report = analyzer.risk(&portfolio(), Period::OneYear).unwrap();
        assert_eq!(report.benchmark, "SPY");
        assert_eq!(report.portfolio_value, 3500.0);
        assert!(report.observations >= 126);
    }

    #[test]
    fn test_optimize_through_provider() {
        let analyzer = PortfolioAnalyzer::new(provider());
        let result = analyzer.optimize(&portfolio(), Period::OneYear).unwrap();
        let total: f64 = result.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(result.weights.len(), 2);
    }

    #[test]
    fn test_optimize_without_history() {
        let analyzer = PortfolioAnalyzer::new(StaticMarketData::new().with_price("AAPL", 1.0));
        let result = analyzer.optimize(&portfolio(), Period::OneYear);
        assert!(matches!(result, Err(Error::DataUnavailable(_))));
    }
}
