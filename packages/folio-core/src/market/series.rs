//! Historical price tables and the daily return tables derived from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{normalize_ticker, Period};
use crate::{Error, Result};

/// One trading day of adjusted closes, aligned with [`HistoricalSeries::tickers`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub closes: Vec<Option<f64>>,
}

/// Date-indexed table of adjusted close prices, one column per ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalSeries {
    /// Lookback period the table was fetched for
    pub period: Period,
    /// Column order for every row
    pub tickers: Vec<String>,
    /// Rows sorted by ascending date
    pub rows: Vec<PriceRow>,
    /// When the data was fetched, if the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl HistoricalSeries {
    /// Create an empty table with the given columns.
    pub fn new(period: Period, tickers: Vec<String>) -> Self {
        Self {
            period,
            tickers: tickers.iter().map(|t| normalize_ticker(t)).collect(),
            rows: Vec::new(),
            fetched_at: None,
        }
    }

    /// Build a table from per-ticker date → close maps.
    ///
    /// The row index is the union of all dates; a ticker without a close on a
    /// given date gets a missing value in that row.
    pub fn from_columns(
        period: Period,
        columns: &BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    ) -> Self {
        let tickers: Vec<String> = columns.keys().map(|t| normalize_ticker(t)).collect();
        let dates: BTreeSet<NaiveDate> = columns
            .values()
            .flat_map(|series| series.keys().copied())
            .collect();

        let rows = dates
            .into_iter()
            .map(|date| PriceRow {
                date,
                closes: columns
                    .values()
                    .map(|series| series.get(&date).copied())
                    .collect(),
            })
            .collect();

        Self {
            period,
            tickers,
            rows,
            fetched_at: None,
        }
    }

    /// Insert a row, keeping rows sorted by date. A row for an existing date replaces it.
    pub fn push_row(&mut self, date: NaiveDate, closes: Vec<Option<f64>>) -> Result<()> {
        if closes.len() != self.tickers.len() {
            return Err(Error::ConfigInvalid(format!(
                "row for {} has {} closes, table has {} tickers",
                date,
                closes.len(),
                self.tickers.len()
            )));
        }

        match self.rows.binary_search_by_key(&date, |row| row.date) {
            Ok(idx) => self.rows[idx].closes = closes,
            Err(idx) => self.rows.insert(idx, PriceRow { date, closes }),
        }
        Ok(())
    }

    /// Column index of a ticker.
    pub fn column_index(&self, ticker: &str) -> Option<usize> {
        let ticker = normalize_ticker(ticker);
        self.tickers.iter().position(|t| *t == ticker)
    }

    /// Whether the table has a column for the ticker.
    pub fn has_ticker(&self, ticker: &str) -> bool {
        self.column_index(ticker).is_some()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Closes for a single ticker, including missing values.
    pub fn column(&self, ticker: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(ticker)?;
        Some(self.rows.iter().map(|row| row.closes[idx]).collect())
    }

    /// A table restricted to the given tickers, in the given order.
    ///
    /// Tickers without a column are skipped.
    pub fn select(&self, tickers: &[String]) -> HistoricalSeries {
        let indices: Vec<(String, usize)> = tickers
            .iter()
            .filter_map(|t| self.column_index(t).map(|idx| (normalize_ticker(t), idx)))
            .collect();

        HistoricalSeries {
            period: self.period,
            tickers: indices.iter().map(|(t, _)| t.clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| PriceRow {
                    date: row.date,
                    closes: indices.iter().map(|(_, idx)| row.closes[*idx]).collect(),
                })
                .collect(),
            fetched_at: self.fetched_at,
        }
    }

    /// Daily simple returns `p_t / p_{t-1} - 1` for every column.
    ///
    /// The first row has no prior price and produces no return. A return row is
    /// kept only when both the current and the prior row have a usable
    /// (finite, positive) close for every column; anything else is dropped
    /// rather than interpolated.
    pub fn returns(&self) -> ReturnTable {
        let mut table = ReturnTable {
            tickers: self.tickers.clone(),
            dates: Vec::new(),
            rows: Vec::new(),
        };

        for window in self.rows.windows(2) {
            let (prev, curr) = (&window[0], &window[1]);
            let row: Option<Vec<f64>> = prev
                .closes
                .iter()
                .zip(curr.closes.iter())
                .map(|(p, c)| match (usable(*p), usable(*c)) {
                    (Some(p), Some(c)) => Some(c / p - 1.0),
                    _ => None,
                })
                .collect();

            if let Some(row) = row {
                table.dates.push(curr.date);
                table.rows.push(row);
            }
        }

        table
    }
}

fn usable(close: Option<f64>) -> Option<f64> {
    close.filter(|c| c.is_finite() && *c > 0.0)
}

/// Aligned daily returns: one row per date, one column per ticker, no missing values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReturnTable {
    pub tickers: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Vec<f64>>,
}

impl ReturnTable {
    /// Number of return observations.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no observations.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Return series of a single ticker.
    pub fn column(&self, ticker: &str) -> Option<Vec<f64>> {
        let ticker = normalize_ticker(ticker);
        let idx = self.tickers.iter().position(|t| *t == ticker)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// All columns, in ticker order.
    pub fn columns(&self) -> Vec<Vec<f64>> {
        (0..self.tickers.len())
            .map(|idx| self.rows.iter().map(|row| row[idx]).collect())
            .collect()
    }

    /// Weighted combination of the columns for every date.
    ///
    /// `weights` is aligned with [`ReturnTable::tickers`]; weights summing to less
    /// than one leave the remainder in cash earning nothing.
    pub fn weighted(&self, weights: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(weights.iter()).map(|(r, w)| r * w).sum())
            .collect()
    }
}
