//! Historical performance analytics.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::analytics::stats::pearson;
use crate::analytics::{cumulative_returns, drawdown_series, max_drawdown, target_weights};
use crate::market::HistoricalSeries;
use crate::types::{Period, Portfolio};
use crate::{Error, Result};

/// Performance of one return series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPerformance {
    /// Compounded return up to each date
    pub cumulative_returns: Vec<f64>,
    pub total_return: f64,
    /// `(1 + total)^(trading_days / n) − 1`
    pub annualized_return: f64,
    pub drawdowns: Vec<f64>,
    pub max_drawdown: f64,
}

impl SeriesPerformance {
    fn from_daily(daily: &[f64], trading_days: f64) -> Self {
        let cumulative = cumulative_returns(daily);
        let total_return = cumulative.last().copied().unwrap_or(0.0);
        let drawdowns = drawdown_series(&cumulative);
        let max_dd = max_drawdown(&drawdowns);

        Self {
            annualized_return: annualize_return(total_return, daily.len(), trading_days),
            cumulative_returns: cumulative,
            total_return,
            drawdowns,
            max_drawdown: max_dd,
        }
    }
}

/// Portfolio and per-holding performance over a period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceReport {
    pub period: Period,
    pub dates: Vec<NaiveDate>,
    /// Target-weighted portfolio
    pub portfolio: SeriesPerformance,
    pub holdings: BTreeMap<String, SeriesPerformance>,
    /// Pearson correlation of daily returns; `None` where a series is flat
    pub correlation: BTreeMap<String, BTreeMap<String, Option<f64>>>,
    /// Holdings left out because they have no history
    pub excluded: BTreeSet<String>,
}

impl PerformanceReport {
    /// Analyze historical closes for the portfolio's holdings.
    ///
    /// Holdings without history are listed in `excluded`; the portfolio series
    /// weights the rest by target allocation. Fails with
    /// [`Error::InsufficientData`] when no complete return row exists.
    pub fn analyze(
        portfolio: &Portfolio,
        history: &HistoricalSeries,
        trading_days: f64,
    ) -> Result<Self> {
        let target = target_weights(portfolio, history)?;

        let held: Vec<String> = portfolio
            .holdings
            .keys()
            .filter(|t| history.has_ticker(t))
            .cloned()
            .collect();
        let returns = history.select(&held).returns();
        if returns.is_empty() {
            return Err(Error::InsufficientData {
                required: 1,
                available: 0,
            });
        }

        let columns = returns.columns();
        let weights: Vec<f64> = returns
            .tickers
            .iter()
            .map(|t| {
                target
                    .tickers
                    .iter()
                    .position(|w| w == t)
                    .map(|i| target.weights[i])
                    .unwrap_or(0.0)
            })
            .collect();
        let portfolio_daily = returns.weighted(&weights);

        let holdings = returns
            .tickers
            .iter()
            .zip(columns.iter())
            .map(|(ticker, daily)| {
                (
                    ticker.clone(),
                    SeriesPerformance::from_daily(daily, trading_days),
                )
            })
            .collect();

        let correlation = returns
            .tickers
            .iter()
            .zip(columns.iter())
            .map(|(a, xs)| {
                let row = returns
                    .tickers
                    .iter()
                    .zip(columns.iter())
                    .map(|(b, ys)| (b.clone(), pearson(xs, ys)))
                    .collect();
                (a.clone(), row)
            })
            .collect();

        Ok(Self {
            period: history.period,
            dates: returns.dates.clone(),
            portfolio: SeriesPerformance::from_daily(&portfolio_daily, trading_days),
            holdings,
            correlation,
            excluded: target.excluded,
        })
    }
}

/// Geometric annualization of a total return earned over `periods` trading days.
pub fn annualize_return(total_return: f64, periods: usize, trading_days: f64) -> f64 {
    if periods == 0 {
        return 0.0;
    }
    (1.0 + total_return).powf(trading_days / periods as f64) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Holding;
    use approx::assert_relative_eq;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn history() -> HistoricalSeries {
        let mut series = HistoricalSeries::new(
            Period::OneMonth,
            vec!["A".to_string(), "B".to_string(), "SPY".to_string()],
        );
        series.push_row(date(1), vec![Some(100.0), Some(50.0), Some(400.0)]).unwrap();
        series.push_row(date(4), vec![Some(110.0), Some(50.0), Some(404.0)]).unwrap();
        series.push_row(date(5), vec![Some(99.0), Some(55.0), None]).unwrap();
        series.push_row(date(6), vec![Some(121.0), Some(55.0), Some(410.0)]).unwrap();
        series
    }

    #[test]
    fn test_annualize_return() {
        // 10% over half a year compounds to 21%
        assert_relative_eq!(annualize_return(0.10, 126, 252.0), 0.21, epsilon = 1e-12);
        assert_eq!(annualize_return(0.10, 0, 252.0), 0.0);
    }

    #[test]
    fn test_per_holding_performance() {
        let portfolio = Portfolio::new()
            .with_holding(Holding::new("A", 1.0).with_target(0.5))
            .with_holding(Holding::new("B", 1.0).with_target(0.5));

        let report = PerformanceReport::analyze(&portfolio, &history(), 252.0).unwrap();

        // The missing SPY close does not cost observations for held tickers.
        assert_eq!(report.dates.len(), 3);

        let a = &report.holdings["A"];
        assert_relative_eq!(a.total_return, 0.21, epsilon = 1e-12);
        assert_relative_eq!(a.max_drawdown, -0.11, epsilon = 1e-12);

        let b = &report.holdings["B"];
        assert_relative_eq!(b.total_return, 0.10, epsilon = 1e-12);
        assert_eq!(b.max_drawdown, 0.0);

        // Portfolio day returns: 0.05, 0.0, 0.1111
        let expected = 1.05 * 1.0 * (1.0 + 0.5 * (121.0 / 99.0 - 1.0)) - 1.0;
        assert_relative_eq!(report.portfolio.total_return, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_matrix() {
        let portfolio = Portfolio::new()
            .with_holding(Holding::new("A", 1.0).with_target(0.5))
            .with_holding(Holding::new("B", 1.0).with_target(0.5));

        let report = PerformanceReport::analyze(&portfolio, &history(), 252.0).unwrap();
        assert_relative_eq!(report.correlation["A"]["A"].unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(report.correlation["A"]["B"], report.correlation["B"]["A"]);
    }

    #[test]
    fn test_excluded_holdings() {
        let portfolio = Portfolio::new()
            .with_holding(Holding::new("A", 1.0).with_target(0.5))
            .with_holding(Holding::new("ZZZ", 1.0).with_target(0.5));

        let report = PerformanceReport::analyze(&portfolio, &history(), 252.0).unwrap();
        assert!(report.excluded.contains("ZZZ"));
        assert!(!report.holdings.contains_key("ZZZ"));
    }

    #[test]
    fn test_no_history_at_all() {
        let portfolio = Portfolio::new().with_holding(Holding::new("ZZZ", 1.0));
        let result = PerformanceReport::analyze(&portfolio, &history(), 252.0);
        assert!(matches!(result, Err(Error::DataUnavailable(_))));
    }
}
