//! Portfolio valuation: gross/net value, allocation, sector breakdown and income.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::types::{Portfolio, PriceMap};
use crate::{Error, Result};

/// Pseudo-sector holding the cash balance in a sector breakdown.
pub const CASH_SECTOR: &str = "Cash";

/// Portfolio value at current prices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioValue {
    /// Σ(quantity × price) over priced holdings plus cash
    pub gross: f64,
    /// Gross minus cumulative transaction costs
    pub net: f64,
    /// Value of priced holdings, excluding cash
    pub holdings_value: f64,
    /// Cash balance
    pub cash: f64,
    /// Tickers without a usable price; they contribute nothing to the totals
    pub degraded: BTreeSet<String>,
}

impl PortfolioValue {
    /// Whether any holding lacked a price.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Value and weight of a single position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionAllocation {
    pub ticker: String,
    pub quantity: f64,
    /// `None` when the price is unavailable
    pub price: Option<f64>,
    pub value: f64,
    /// Share of gross value in percent
    pub percent_of_portfolio: f64,
    /// Target allocation in percent, after normalization
    pub target_percent: f64,
}

/// Allocation of gross value across positions and cash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub positions: Vec<PositionAllocation>,
    pub cash: f64,
    pub cash_percent: f64,
    pub gross: f64,
    pub degraded: BTreeSet<String>,
}

/// Value held in one sector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorWeight {
    pub value: f64,
    pub percent: f64,
}

/// Position values grouped by sector, cash included as [`CASH_SECTOR`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorBreakdown {
    pub sectors: BTreeMap<String, SectorWeight>,
    pub gross: f64,
    pub degraded: BTreeSet<String>,
}

/// Dividend income and cost summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomeSummary {
    /// Dividend income per ticker, `quantity × dividends_per_share`
    pub dividends: BTreeMap<String, f64>,
    pub total_dividend_income: f64,
    pub total_transaction_costs: f64,
}

/// Compute gross and net value.
///
/// Holdings without a price are left out of the totals and listed in
/// `degraded`. When the portfolio has holdings and none of them is priced the
/// result would be meaningless and [`Error::DataUnavailable`] is returned.
///
/// # Arguments
///
/// * `portfolio` - Holdings and cash
/// * `prices` - Current prices; missing tickers count as unavailable
pub fn compute_value(portfolio: &Portfolio, prices: &PriceMap) -> Result<PortfolioValue> {
    let mut holdings_value = 0.0;
    let mut degraded = BTreeSet::new();

    for (ticker, holding) in &portfolio.holdings {
        match prices.price(ticker) {
            Some(price) => holdings_value += holding.market_value(price),
            None => {
                degraded.insert(ticker.clone());
            }
        }
    }

    if !portfolio.is_empty() && degraded.len() == portfolio.len() {
        return Err(Error::DataUnavailable(format!(
            "no prices for any holding: {:?}",
            degraded
        )));
    }
    if !degraded.is_empty() {
        warn!(excluded = ?degraded, "valuing portfolio without some prices");
    }

    let gross = holdings_value + portfolio.cash_balance;
    let net = gross - portfolio.total_transaction_costs();
    debug!(gross, net, "computed portfolio value");

    Ok(PortfolioValue {
        gross,
        net,
        holdings_value,
        cash: portfolio.cash_balance,
        degraded,
    })
}

fn percent_of(value: f64, gross: f64) -> f64 {
    if gross > 0.0 {
        value / gross * 100.0
    } else {
        0.0
    }
}

/// Per-position value and percentage of gross value.
///
/// Unpriced positions are listed with a zero value and `price: None`.
pub fn compute_allocation(portfolio: &Portfolio, prices: &PriceMap) -> Result<Allocation> {
    let value = compute_value(portfolio, prices)?;
    let targets = portfolio.normalized_targets()?;

    let positions = portfolio
        .holdings
        .iter()
        .map(|(ticker, holding)| {
            let price = prices.price(ticker);
            let position_value = price.map(|p| holding.market_value(p)).unwrap_or(0.0);
            PositionAllocation {
                ticker: ticker.clone(),
                quantity: holding.quantity,
                price,
                value: position_value,
                percent_of_portfolio: percent_of(position_value, value.gross),
                target_percent: targets.get(ticker).copied().unwrap_or(0.0) * 100.0,
            }
        })
        .collect();

    Ok(Allocation {
        positions,
        cash: value.cash,
        cash_percent: percent_of(value.cash, value.gross),
        gross: value.gross,
        degraded: value.degraded,
    })
}

/// Aggregate position values by sector.
///
/// Holdings without sector metadata are grouped under `"Unknown"`.
pub fn compute_sector_breakdown(
    portfolio: &Portfolio,
    prices: &PriceMap,
) -> Result<SectorBreakdown> {
    let value = compute_value(portfolio, prices)?;

    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for (ticker, holding) in &portfolio.holdings {
        if let Some(price) = prices.price(ticker) {
            *totals
                .entry(holding.sector_or_unknown().to_string())
                .or_default() += holding.market_value(price);
        }
    }
    if value.cash > 0.0 {
        *totals.entry(CASH_SECTOR.to_string()).or_default() += value.cash;
    }

    let sectors = totals
        .into_iter()
        .map(|(sector, sector_value)| {
            (
                sector,
                SectorWeight {
                    value: sector_value,
                    percent: percent_of(sector_value, value.gross),
                },
            )
        })
        .collect();

    Ok(SectorBreakdown {
        sectors,
        gross: value.gross,
        degraded: value.degraded,
    })
}

/// Total dividend income, `Σ quantity × dividends_per_share`.
pub fn dividend_income(portfolio: &Portfolio) -> f64 {
    portfolio
        .holdings
        .values()
        .map(|h| h.quantity * h.dividends_per_share)
        .sum()
}

/// Dividend income per holding together with the cost totals.
pub fn income_summary(portfolio: &Portfolio) -> IncomeSummary {
    IncomeSummary {
        dividends: portfolio
            .holdings
            .iter()
            .map(|(ticker, h)| (ticker.clone(), h.quantity * h.dividends_per_share))
            .collect(),
        total_dividend_income: dividend_income(portfolio),
        total_transaction_costs: portfolio.total_transaction_costs(),
    }
}
