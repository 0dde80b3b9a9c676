//! Core data types for the portfolio analytics engine.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Sector assigned to holdings without sector metadata.
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Direction of a price alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertDirection {
    /// Fire only when the price rose by at least the threshold.
    Above,
    /// Fire only when the price fell by at least the threshold.
    Below,
}

impl fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertDirection::Above => write!(f, "Above"),
            AlertDirection::Below => write!(f, "Below"),
        }
    }
}

impl FromStr for AlertDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "above" | "up" => Ok(AlertDirection::Above),
            "below" | "down" => Ok(AlertDirection::Below),
            other => Err(Error::ConfigInvalid(format!(
                "unknown alert direction: {}",
                other
            ))),
        }
    }
}

/// A single holding in the portfolio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    /// Ticker symbol (uppercase, non-empty)
    pub ticker: String,
    /// Number of shares held (fractional shares allowed)
    pub quantity: f64,
    /// Dividends paid per share
    pub dividends_per_share: f64,
    /// Cumulative transaction cost paid for this holding
    pub transaction_cost: f64,
    /// Desired fraction of total portfolio value (0..1)
    pub target_allocation: f64,
    /// Whether the market data provider recognised the ticker
    pub valid_ticker: bool,
    /// Sector name
    pub sector: String,
    /// Industry name
    pub industry: String,
    /// Last recorded price, used for alerts and updated on execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<f64>,
    /// Alert threshold in percent (5.0 = 5%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_threshold: Option<f64>,
    /// Restricts the alert to one direction of price change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_direction: Option<AlertDirection>,
}

impl Holding {
    /// Create a holding with the given ticker and quantity.
    ///
    /// The ticker is trimmed and uppercased; sector and industry default to `"Unknown"`.
    pub fn new(ticker: &str, quantity: f64) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            quantity,
            dividends_per_share: 0.0,
            transaction_cost: 0.0,
            target_allocation: 0.0,
            valid_ticker: true,
            sector: UNKNOWN_SECTOR.to_string(),
            industry: UNKNOWN_SECTOR.to_string(),
            previous_price: None,
            alert_threshold: None,
            alert_direction: None,
        }
    }

    /// Set the target allocation.
    pub fn with_target(mut self, target_allocation: f64) -> Self {
        self.target_allocation = target_allocation;
        self
    }

    /// Set sector and industry.
    pub fn with_sector(mut self, sector: &str, industry: &str) -> Self {
        self.sector = sector.to_string();
        self.industry = industry.to_string();
        self
    }

    /// Set the cumulative transaction cost.
    pub fn with_transaction_cost(mut self, transaction_cost: f64) -> Self {
        self.transaction_cost = transaction_cost;
        self
    }

    /// Set dividends per share.
    pub fn with_dividends(mut self, dividends_per_share: f64) -> Self {
        self.dividends_per_share = dividends_per_share;
        self
    }

    /// Set the previously observed price.
    pub fn with_previous_price(mut self, price: f64) -> Self {
        self.previous_price = Some(price);
        self
    }

    /// Market value of the holding at the given price.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    /// Sector name, falling back to `"Unknown"` when blank.
    pub fn sector_or_unknown(&self) -> &str {
        if self.sector.trim().is_empty() {
            UNKNOWN_SECTOR
        } else {
            &self.sector
        }
    }

    /// Check the field invariants of the holding.
    pub fn validate(&self) -> Result<()> {
        if self.ticker.is_empty() {
            return Err(Error::ConfigInvalid("ticker must not be empty".to_string()));
        }
        check_non_negative(&self.ticker, "quantity", self.quantity)?;
        check_non_negative(&self.ticker, "dividends", self.dividends_per_share)?;
        check_non_negative(&self.ticker, "transaction cost", self.transaction_cost)?;
        check_non_negative(&self.ticker, "target allocation", self.target_allocation)?;
        if let Some(threshold) = self.alert_threshold {
            check_non_negative(&self.ticker, "alert threshold", threshold)?;
        }
        Ok(())
    }
}

fn check_non_negative(ticker: &str, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::ConfigInvalid(format!(
            "{} for {} must be a non-negative number, got {}",
            field, ticker, value
        )));
    }
    Ok(())
}

/// Normalize a ticker symbol to its canonical (trimmed, uppercase) form.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// A portfolio: holdings keyed by ticker plus a cash balance.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Portfolio {
    /// Holdings keyed by uppercase ticker
    pub holdings: BTreeMap<String, Holding>,
    /// Uninvested cash
    pub cash_balance: f64,
}

impl Portfolio {
    /// Create a new empty portfolio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a portfolio with initial cash.
    pub fn with_cash(cash_balance: f64) -> Self {
        Self {
            cash_balance,
            ..Default::default()
        }
    }

    /// Insert a holding, replacing any existing holding with the same ticker.
    pub fn insert(&mut self, holding: Holding) {
        self.holdings.insert(holding.ticker.clone(), holding);
    }

    /// Builder-style variant of [`Portfolio::insert`].
    pub fn with_holding(mut self, holding: Holding) -> Self {
        self.insert(holding);
        self
    }

    /// Look up a holding by ticker (case-insensitive).
    pub fn get(&self, ticker: &str) -> Option<&Holding> {
        self.holdings.get(&normalize_ticker(ticker))
    }

    /// All tickers in the portfolio.
    pub fn tickers(&self) -> BTreeSet<String> {
        self.holdings.keys().cloned().collect()
    }

    /// Whether the portfolio has no holdings (cash is ignored).
    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Number of holdings.
    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    /// Sum of target allocations across holdings.
    pub fn total_target_allocation(&self) -> f64 {
        self.holdings.values().map(|h| h.target_allocation).sum()
    }

    /// Sum of cumulative transaction costs across holdings.
    pub fn total_transaction_costs(&self) -> f64 {
        self.holdings.values().map(|h| h.transaction_cost).sum()
    }

    /// Target allocations, proportionally scaled down when they sum above 1.
    ///
    /// Allocations summing to less than 1 are returned unchanged; the remainder
    /// is the implicit cash allocation. Negative or non-finite targets cannot be
    /// normalized and yield [`Error::ConfigInvalid`].
    pub fn normalized_targets(&self) -> Result<BTreeMap<String, f64>> {
        for holding in self.holdings.values() {
            if !holding.target_allocation.is_finite() || holding.target_allocation < 0.0 {
                return Err(Error::ConfigInvalid(format!(
                    "target allocation for {} cannot be normalized: {}",
                    holding.ticker, holding.target_allocation
                )));
            }
        }

        let total = self.total_target_allocation();
        let scale = if total > 1.0 { 1.0 / total } else { 1.0 };

        Ok(self
            .holdings
            .iter()
            .map(|(ticker, h)| (ticker.clone(), h.target_allocation * scale))
            .collect())
    }

    /// Rewrite target allocations in place with [`Portfolio::normalized_targets`].
    ///
    /// Returns `true` when any allocation changed.
    pub fn normalize_targets(&mut self) -> Result<bool> {
        let normalized = self.normalized_targets()?;
        let mut changed = false;
        for (ticker, target) in normalized {
            if let Some(holding) = self.holdings.get_mut(&ticker) {
                if holding.target_allocation != target {
                    holding.target_allocation = target;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Validate every holding and the cash balance.
    pub fn validate(&self) -> Result<()> {
        if !self.cash_balance.is_finite() || self.cash_balance < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "cash balance must be a non-negative number, got {}",
                self.cash_balance
            )));
        }
        for holding in self.holdings.values() {
            holding.validate()?;
        }
        Ok(())
    }
}

/// A current price quote: either a usable price or an explicit "unavailable" marker.
///
/// Serialized as a JSON number or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum PriceQuote {
    Available(f64),
    Unavailable,
}

impl PriceQuote {
    /// The price, if one is available.
    pub fn price(&self) -> Option<f64> {
        match self {
            PriceQuote::Available(price) => Some(*price),
            PriceQuote::Unavailable => None,
        }
    }
}

impl From<Option<f64>> for PriceQuote {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(price) if price.is_finite() && price > 0.0 => PriceQuote::Available(price),
            _ => PriceQuote::Unavailable,
        }
    }
}

impl From<PriceQuote> for Option<f64> {
    fn from(quote: PriceQuote) -> Self {
        quote.price()
    }
}

/// Current prices keyed by ticker.
///
/// Tickers missing from the map and tickers with non-positive prices are both
/// reported as [`PriceQuote::Unavailable`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceMap {
    quotes: BTreeMap<String, PriceQuote>,
    /// When the prices were fetched, if the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PriceMap {
    /// Create an empty price map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price for a ticker.
    pub fn insert(&mut self, ticker: &str, price: f64) {
        self.quotes
            .insert(normalize_ticker(ticker), PriceQuote::from(Some(price)));
    }

    /// Builder-style variant of [`PriceMap::insert`].
    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.insert(ticker, price);
        self
    }

    /// Explicitly mark a ticker as having no price.
    pub fn mark_unavailable(&mut self, ticker: &str) {
        self.quotes
            .insert(normalize_ticker(ticker), PriceQuote::Unavailable);
    }

    /// The quote for a ticker.
    pub fn quote(&self, ticker: &str) -> PriceQuote {
        self.quotes
            .get(&normalize_ticker(ticker))
            .copied()
            .unwrap_or(PriceQuote::Unavailable)
    }

    /// The price for a ticker, if available.
    pub fn price(&self, ticker: &str) -> Option<f64> {
        self.quote(ticker).price()
    }

    /// Iterate over all recorded quotes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PriceQuote)> {
        self.quotes.iter()
    }

    /// Number of recorded quotes.
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether no quotes are recorded.
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for PriceMap {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut map = PriceMap::new();
        for (ticker, price) in iter {
            map.insert(ticker.as_ref(), price);
        }
        map
    }
}

/// Lookback period for historical data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "YTD")]
    YearToDate,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "3y")]
    ThreeYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Period {
    /// All supported periods, shortest first.
    pub const ALL: [Period; 7] = [
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::YearToDate,
        Period::OneYear,
        Period::ThreeYears,
        Period::FiveYears,
    ];

    /// Canonical short code, e.g. `"1y"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMonth => "1m",
            Period::ThreeMonths => "3m",
            Period::SixMonths => "6m",
            Period::YearToDate => "YTD",
            Period::OneYear => "1y",
            Period::ThreeYears => "3y",
            Period::FiveYears => "5y",
        }
    }

    /// First calendar date covered by the period when it ends on `end`.
    pub fn start_date(&self, end: NaiveDate) -> NaiveDate {
        let months = match self {
            Period::OneMonth => 1,
            Period::ThreeMonths => 3,
            Period::SixMonths => 6,
            Period::OneYear => 12,
            Period::ThreeYears => 36,
            Period::FiveYears => 60,
            Period::YearToDate => {
                return NaiveDate::from_ymd_opt(end.year(), 1, 1).unwrap_or(end);
            }
        };
        end.checked_sub_months(Months::new(months))
            .unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Period::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                Error::ConfigInvalid(format!(
                    "unknown period '{}', expected one of 1m, 3m, 6m, YTD, 1y, 3y, 5y",
                    wanted
                ))
            })
    }
}

/// A proposed trade for one ticker. At most one of `buy`/`sell` is non-zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebalancingAction {
    /// Ticker symbol
    pub ticker: String,
    /// Shares to buy
    pub buy: f64,
    /// Shares to sell
    pub sell: f64,
    /// Estimated cost of executing this trade
    pub trade_cost: f64,
    /// Price the share quantities were computed at
    pub price: f64,
    /// Current allocation in percent of gross value
    pub current_allocation_percent: f64,
    /// Target allocation in percent of gross value
    pub target_allocation_percent: f64,
}

impl RebalancingAction {
    /// Dollar value of the trade at the quoted price.
    pub fn value(&self) -> f64 {
        (self.buy + self.sell) * self.price
    }

    /// Whether this action buys shares.
    pub fn is_buy(&self) -> bool {
        self.buy > 0.0
    }
}

/// Result of a mean-variance optimization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationResult {
    /// Weight per ticker; sums to 1, each in [0, 1]
    pub weights: BTreeMap<String, f64>,
    /// Expected portfolio return `wᵀμ`
    pub expected_return: f64,
    /// Portfolio volatility `sqrt(wᵀΣw)`
    pub volatility: f64,
    /// `(expected_return - risk_free_rate) / volatility`; `None` when volatility is zero
    pub sharpe_ratio: Option<f64>,
    /// Whether the solver converged or the equal-weight fallback was used
    pub status: OptimizationStatus,
}

/// Solver outcome for an [`OptimizationResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// The solver converged within its iteration cap.
    Converged,
    /// The solver did not converge; weights are the equal-weight fallback.
    OptimizationDegenerate,
}

/// API response wrapper used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
