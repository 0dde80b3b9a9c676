//! Flat holdings table (CSV) reader and writer.
//!
//! One row per holding. `CashBalance` is repeated on every row; a portfolio
//! with cash but no holdings is stored as a single row with an empty `Ticker`.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::Path;

use crate::types::{normalize_ticker, AlertDirection, Holding, Portfolio};
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct HoldingRow {
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "Quantity", default)]
    quantity: f64,
    #[serde(rename = "Dividends", default)]
    dividends: f64,
    #[serde(rename = "TransactionCost", default)]
    transaction_cost: f64,
    #[serde(rename = "TargetAllocation", default)]
    target_allocation: f64,
    #[serde(rename = "ValidTicker", default)]
    valid_ticker: Option<String>,
    #[serde(rename = "Sector", default)]
    sector: Option<String>,
    #[serde(rename = "Industry", default)]
    industry: Option<String>,
    #[serde(rename = "CashBalance", default)]
    cash_balance: f64,
    #[serde(rename = "PreviousPrice", default)]
    previous_price: Option<f64>,
    #[serde(rename = "AlertThreshold", default)]
    alert_threshold: Option<f64>,
    #[serde(rename = "AlertDirection", default)]
    alert_direction: Option<String>,
}

impl HoldingRow {
    fn from_holding(holding: &Holding, cash_balance: f64) -> Self {
        Self {
            ticker: holding.ticker.clone(),
            quantity: holding.quantity,
            dividends: holding.dividends_per_share,
            transaction_cost: holding.transaction_cost,
            target_allocation: holding.target_allocation,
            valid_ticker: Some(holding.valid_ticker.to_string()),
            sector: Some(holding.sector.clone()),
            industry: Some(holding.industry.clone()),
            cash_balance,
            previous_price: holding.previous_price,
            alert_threshold: holding.alert_threshold,
            alert_direction: holding.alert_direction.map(|d| d.to_string()),
        }
    }

    fn cash_only(cash_balance: f64) -> Self {
        Self {
            ticker: String::new(),
            quantity: 0.0,
            dividends: 0.0,
            transaction_cost: 0.0,
            target_allocation: 0.0,
            valid_ticker: None,
            sector: None,
            industry: None,
            cash_balance,
            previous_price: None,
            alert_threshold: None,
            alert_direction: None,
        }
    }

    fn into_holding(self) -> Result<Holding> {
        let mut holding = Holding::new(&self.ticker, self.quantity)
            .with_dividends(self.dividends)
            .with_transaction_cost(self.transaction_cost)
            .with_target(self.target_allocation);

        holding.valid_ticker = match self.valid_ticker.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(flag) => parse_flag(flag)?,
        };
        if let Some(sector) = non_blank(self.sector) {
            holding.sector = sector;
        }
        if let Some(industry) = non_blank(self.industry) {
            holding.industry = industry;
        }
        holding.previous_price = self.previous_price;
        holding.alert_threshold = self.alert_threshold;
        holding.alert_direction = match non_blank(self.alert_direction) {
            Some(direction) => Some(direction.parse::<AlertDirection>()?),
            None => None,
        };

        holding.validate()?;
        Ok(holding)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_flag(flag: &str) -> Result<bool> {
    match flag.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::ConfigInvalid(format!(
            "ValidTicker must be true or false, got '{}'",
            other
        ))),
    }
}

/// Parse a holdings table.
///
/// Fails with [`Error::ConfigInvalid`] on duplicate tickers, a `CashBalance`
/// that differs between rows, or field values violating the holding invariants.
pub fn read_portfolio<R: io::Read>(reader: R) -> Result<Portfolio> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut portfolio = Portfolio::new();
    let mut cash: Option<f64> = None;

    for result in csv_reader.deserialize::<HoldingRow>() {
        let row = result?;

        match cash {
            None => cash = Some(row.cash_balance),
            Some(seen) if seen != row.cash_balance => {
                return Err(Error::ConfigInvalid(format!(
                    "inconsistent CashBalance column: {} vs {}",
                    seen, row.cash_balance
                )));
            }
            Some(_) => {}
        }

        if normalize_ticker(&row.ticker).is_empty() {
            continue;
        }

        let holding = row.into_holding()?;
        if portfolio.holdings.contains_key(&holding.ticker) {
            return Err(Error::ConfigInvalid(format!(
                "duplicate ticker in holdings table: {}",
                holding.ticker
            )));
        }
        portfolio.insert(holding);
    }

    portfolio.cash_balance = cash.unwrap_or(0.0);
    portfolio.validate()?;
    Ok(portfolio)
}

/// Write a holdings table. Floats are written with enough digits to read back exactly.
pub fn write_portfolio<W: io::Write>(writer: W, portfolio: &Portfolio) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    if portfolio.is_empty() {
        csv_writer.serialize(HoldingRow::cash_only(portfolio.cash_balance))?;
    }
    for holding in portfolio.holdings.values() {
        csv_writer.serialize(HoldingRow::from_holding(holding, portfolio.cash_balance))?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Load a holdings table from disk. A missing file is an empty portfolio.
pub fn load_portfolio(path: &Path) -> Result<Portfolio> {
    if !path.exists() {
        return Ok(Portfolio::default());
    }
    read_portfolio(File::open(path)?)
}

/// Save a holdings table to disk, creating parent directories as needed.
pub fn save_portfolio(path: &Path, portfolio: &Portfolio) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_portfolio(File::create(path)?, portfolio)
}
