//! Market data collaborator: the provider contract and its in-process implementations.
//!
//! The analytics engines never fetch data themselves. Callers obtain a
//! [`PriceMap`] or [`HistoricalSeries`] from a [`MarketDataProvider`] and hand
//! it to the engines.

mod cache;
mod fixed;
mod series;

pub use cache::CachedMarketData;
pub use fixed::StaticMarketData;
pub use series::{HistoricalSeries, PriceRow, ReturnTable};

use std::collections::BTreeSet;

use crate::types::{Period, PriceMap};
use crate::Result;

/// Source of current prices, historical closes and ticker validity.
///
/// Implementations may cache and may stamp results with `fetched_at`.
/// Failures are reported as typed errors; a ticker without a price is not a
/// failure and is reported as unavailable inside the [`PriceMap`].
pub trait MarketDataProvider {
    /// Latest price for each requested ticker.
    fn current_prices(&self, tickers: &BTreeSet<String>) -> Result<PriceMap>;

    /// Adjusted closes for the tickers over the lookback period.
    fn historical_series(&self, tickers: &BTreeSet<String>, period: Period)
        -> Result<HistoricalSeries>;

    /// Whether the provider recognises the ticker.
    fn validate_ticker(&self, ticker: &str) -> Result<bool>;
}

impl<P: MarketDataProvider + ?Sized> MarketDataProvider for &P {
    fn current_prices(&self, tickers: &BTreeSet<String>) -> Result<PriceMap> {
        (**self).current_prices(tickers)
    }

    fn historical_series(
        &self,
        tickers: &BTreeSet<String>,
        period: Period,
    ) -> Result<HistoricalSeries> {
        (**self).historical_series(tickers, period)
    }

    fn validate_ticker(&self, ticker: &str) -> Result<bool> {
        (**self).validate_ticker(ticker)
    }
}

impl<P: MarketDataProvider + ?Sized> MarketDataProvider for Box<P> {
    fn current_prices(&self, tickers: &BTreeSet<String>) -> Result<PriceMap> {
        (**self).current_prices(tickers)
    }

    fn historical_series(
        &self,
        tickers: &BTreeSet<String>,
        period: Period,
    ) -> Result<HistoricalSeries> {
        (**self).historical_series(tickers, period)
    }

    fn validate_ticker(&self, ticker: &str) -> Result<bool> {
        (**self).validate_ticker(ticker)
    }
}
