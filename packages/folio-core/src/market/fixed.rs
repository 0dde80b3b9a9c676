//! In-memory market data, loadable from a JSON snapshot.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use super::{HistoricalSeries, MarketDataProvider};
use crate::types::{normalize_ticker, Period, PriceMap, PriceQuote};
use crate::{Error, Result};

/// Market data served from memory.
///
/// The JSON form is:
///
/// ```json
/// {
///   "as_of": "2024-06-28",
///   "prices": { "AAPL": 210.6, "DELISTED": null },
///   "history": { "AAPL": { "2024-06-27": 214.1, "2024-06-28": 210.6 } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticMarketData {
    /// Current quotes; `null` marks a known but unpriced ticker
    #[serde(default)]
    pub prices: BTreeMap<String, PriceQuote>,
    /// Adjusted closes per ticker
    #[serde(default)]
    pub history: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    /// End date for lookback periods; defaults to the latest date in `history`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
    /// Timestamp attached to every response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl StaticMarketData {
    /// Create an empty data set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON snapshot.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let data: StaticMarketData = serde_json::from_str(content)?;
        Ok(data.normalized())
    }

    /// Load a JSON snapshot from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Add a current price.
    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.prices
            .insert(normalize_ticker(ticker), PriceQuote::from(Some(price)));
        self
    }

    /// Add a close history for a ticker, merging with any existing closes.
    pub fn with_history<I>(mut self, ticker: &str, closes: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        self.history
            .entry(normalize_ticker(ticker))
            .or_default()
            .extend(closes);
        self
    }

    /// Fix the end date used for lookback periods.
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    fn normalized(self) -> Self {
        Self {
            prices: self
                .prices
                .into_iter()
                .map(|(ticker, quote)| (normalize_ticker(&ticker), quote))
                .collect(),
            history: self
                .history
                .into_iter()
                .map(|(ticker, closes)| (normalize_ticker(&ticker), closes))
                .collect(),
            ..self
        }
    }

    fn end_date(&self) -> Option<NaiveDate> {
        self.as_of.or_else(|| {
            self.history
                .values()
                .filter_map(|closes| closes.keys().next_back().copied())
                .max()
        })
    }
}

impl MarketDataProvider for StaticMarketData {
    fn current_prices(&self, tickers: &BTreeSet<String>) -> Result<PriceMap> {
        let mut prices = PriceMap::new();
        for ticker in tickers {
            match self.prices.get(&normalize_ticker(ticker)) {
                Some(PriceQuote::Available(price)) => prices.insert(ticker, *price),
                _ => prices.mark_unavailable(ticker),
            }
        }
        prices.fetched_at = self.fetched_at;
        Ok(prices)
    }

    fn historical_series(
        &self,
        tickers: &BTreeSet<String>,
        period: Period,
    ) -> Result<HistoricalSeries> {
        let end = self
            .end_date()
            .ok_or_else(|| Error::DataUnavailable("no historical data loaded".to_string()))?;
        let start = period.start_date(end);

        let columns: BTreeMap<String, BTreeMap<NaiveDate, f64>> = tickers
            .iter()
            .filter_map(|ticker| {
                let ticker = normalize_ticker(ticker);
                let closes = self.history.get(&ticker)?;
                let window = closes
                    .range(start..=end)
                    .map(|(date, close)| (*date, *close))
                    .collect();
                Some((ticker, window))
            })
            .collect();

        if columns.is_empty() {
            return Err(Error::DataUnavailable(format!(
                "no history for any of {:?}",
                tickers
            )));
        }

        let mut series = HistoricalSeries::from_columns(period, &columns);
        series.fetched_at = self.fetched_at;
        Ok(series)
    }

    fn validate_ticker(&self, ticker: &str) -> Result<bool> {
        let ticker = normalize_ticker(ticker);
        Ok(matches!(self.prices.get(&ticker), Some(PriceQuote::Available(_)))
            || self.history.contains_key(&ticker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "as_of": "2024-03-31",
        "prices": { "aapl": 170.0, "gone": null },
        "history": {
            "AAPL": { "2023-12-29": 190.0, "2024-02-29": 180.0, "2024-03-28": 171.0 },
            "SPY": { "2024-02-29": 500.0, "2024-03-28": 520.0 }
        }
    }"#;

    fn tickers(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_current_prices_from_snapshot() {
        let data = StaticMarketData::from_json_str(SNAPSHOT).unwrap();
        let prices = data.current_prices(&tickers(&["AAPL", "GONE", "MSFT"])).unwrap();

        assert_eq!(prices.price("AAPL"), Some(170.0));
        assert_eq!(prices.quote("GONE"), PriceQuote::Unavailable);
        assert_eq!(prices.quote("MSFT"), PriceQuote::Unavailable);
    }

    #[test]
    fn test_history_respects_period_window() {
        let data = StaticMarketData::from_json_str(SNAPSHOT).unwrap();

        let ytd = data
            .historical_series(&tickers(&["AAPL", "SPY"]), Period::YearToDate)
            .unwrap();
        assert_eq!(ytd.len(), 2);
        assert_eq!(ytd.tickers, vec!["AAPL".to_string(), "SPY".to_string()]);

        let year = data
            .historical_series(&tickers(&["AAPL"]), Period::OneYear)
            .unwrap();
        assert_eq!(year.len(), 3);
    }

    #[test]
    fn test_history_unknown_tickers_unavailable() {
        let data = StaticMarketData::from_json_str(SNAPSHOT).unwrap();
        let result = data.historical_series(&tickers(&["NOPE"]), Period::OneYear);
        assert!(matches!(result, Err(Error::DataUnavailable(_))));
    }

    #[test]
    fn test_validate_ticker() {
        let data = StaticMarketData::from_json_str(SNAPSHOT).unwrap();
        assert!(data.validate_ticker("aapl").unwrap());
        assert!(data.validate_ticker("SPY").unwrap());
        assert!(!data.validate_ticker("GONE").unwrap());
    }
}
