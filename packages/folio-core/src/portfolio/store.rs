//! Holdings store: the single mutable owner of the portfolio.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::table::{load_portfolio, save_portfolio};
use crate::analytics::RebalancePlan;
use crate::config::EngineConfig;
use crate::market::MarketDataProvider;
use crate::types::{
    normalize_ticker, AlertDirection, Holding, Portfolio, PriceMap, UNKNOWN_SECTOR,
};
use crate::{Error, Result};

/// Quantities this close to zero after a sell are treated as fully sold.
const QUANTITY_EPSILON: f64 = 1e-9;

/// Portfolio store that manages holdings and persists them as a CSV table.
#[derive(Debug)]
pub struct HoldingsStore {
    /// Path to the holdings table; empty for in-memory stores
    path: PathBuf,
    /// In-memory portfolio state
    portfolio: Portfolio,
}

impl HoldingsStore {
    /// Open the store at the default path.
    ///
    /// Default path: `~/.folio/portfolio.csv`
    /// Can be overridden with `FOLIO_PORTFOLIO_FILE` environment variable.
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path())
    }

    /// Open a store backed by the given table. A missing file starts empty.
    pub fn open(path: PathBuf) -> Result<Self> {
        let portfolio = load_portfolio(&path)?;
        debug!(path = %path.display(), holdings = portfolio.len(), "loaded holdings");
        Ok(Self { path, portfolio })
    }

    /// Create an in-memory store (no persistence).
    pub fn in_memory() -> Self {
        Self::from_portfolio(Portfolio::default())
    }

    /// Wrap an existing portfolio in an in-memory store.
    pub fn from_portfolio(portfolio: Portfolio) -> Self {
        Self {
            path: PathBuf::new(),
            portfolio,
        }
    }

    /// Get the default holdings table path.
    pub fn default_path() -> PathBuf {
        EngineConfig::default_portfolio_path()
    }

    /// Get the current path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save the portfolio to its table.
    pub fn save(&self) -> Result<()> {
        // Skip if in-memory only
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        save_portfolio(&self.path, &self.portfolio)?;
        debug!(path = %self.path.display(), "saved holdings");
        Ok(())
    }

    /// Reload the portfolio from its table.
    pub fn reload(&mut self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        self.portfolio = load_portfolio(&self.path)?;
        Ok(())
    }

    /// Read-only view of the portfolio.
    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Find a holding by ticker (case-insensitive).
    pub fn get(&self, ticker: &str) -> Option<&Holding> {
        self.portfolio.get(ticker)
    }

    fn holding_mut(&mut self, ticker: &str) -> Result<&mut Holding> {
        let ticker = normalize_ticker(ticker);
        self.portfolio
            .holdings
            .get_mut(&ticker)
            .ok_or(Error::HoldingNotFound(ticker))
    }

    /// Add a holding, or merge it into the existing holding for the ticker.
    ///
    /// Merging adds the quantity and accumulates the transaction cost. The new
    /// target replaces the old one, while dividends and sector are only
    /// replaced when the new holding carries them. Afterwards targets summing
    /// above 1 are scaled down proportionally.
    ///
    /// Returns the stored holding and whether it was an update (true) or add (false).
    pub fn add_holding(&mut self, holding: Holding) -> Result<(Holding, bool)> {
        holding.validate()?;
        let ticker = holding.ticker.clone();

        let was_update = match self.portfolio.holdings.get_mut(&ticker) {
            Some(existing) => {
                existing.quantity += holding.quantity;
                existing.transaction_cost += holding.transaction_cost;
                existing.target_allocation = holding.target_allocation;
                if holding.dividends_per_share > 0.0 {
                    existing.dividends_per_share = holding.dividends_per_share;
                }
                if holding.sector_or_unknown() != UNKNOWN_SECTOR {
                    existing.sector = holding.sector;
                    existing.industry = holding.industry;
                }
                existing.valid_ticker = holding.valid_ticker;
                true
            }
            None => {
                self.portfolio.insert(holding);
                false
            }
        };

        if self.portfolio.normalize_targets()? {
            warn!(
                total = self.portfolio.total_target_allocation(),
                "target allocations exceeded 100% and were scaled down"
            );
        }

        info!(ticker = %ticker, updated = was_update, "stored holding");
        let stored = self.holding_mut(&ticker)?.clone();
        Ok((stored, was_update))
    }

    /// Remove a holding. Returns the removed holding.
    pub fn remove_holding(&mut self, ticker: &str) -> Result<Holding> {
        let ticker = normalize_ticker(ticker);
        let removed = self
            .portfolio
            .holdings
            .remove(&ticker)
            .ok_or_else(|| Error::HoldingNotFound(ticker.clone()))?;
        info!(ticker = %ticker, "removed holding");
        Ok(removed)
    }

    /// Replace the target allocation of a holding, normalizing afterwards.
    pub fn set_target(&mut self, ticker: &str, target: f64) -> Result<()> {
        if !target.is_finite() || target < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "target allocation must be a non-negative number, got {}",
                target
            )));
        }
        self.holding_mut(ticker)?.target_allocation = target;
        self.portfolio.normalize_targets()?;
        Ok(())
    }

    /// Set dividends per share for a holding.
    pub fn set_dividends(&mut self, ticker: &str, dividends_per_share: f64) -> Result<()> {
        if !dividends_per_share.is_finite() || dividends_per_share < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "dividends must be a non-negative number, got {}",
                dividends_per_share
            )));
        }
        self.holding_mut(ticker)?.dividends_per_share = dividends_per_share;
        Ok(())
    }

    /// Configure the price alert of a holding. A `None` threshold clears it.
    pub fn set_alert(
        &mut self,
        ticker: &str,
        threshold_percent: Option<f64>,
        direction: Option<AlertDirection>,
    ) -> Result<()> {
        if let Some(threshold) = threshold_percent {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(Error::ConfigInvalid(format!(
                    "alert threshold must be a non-negative percentage, got {}",
                    threshold
                )));
            }
        }
        let holding = self.holding_mut(ticker)?;
        holding.alert_threshold = threshold_percent;
        holding.alert_direction = threshold_percent.and(direction);
        Ok(())
    }

    /// Record current prices as the reference for future alerts.
    ///
    /// Unpriced holdings keep their previous reference. Returns the number updated.
    pub fn record_prices(&mut self, prices: &PriceMap) -> usize {
        let mut updated = 0;
        for (ticker, holding) in self.portfolio.holdings.iter_mut() {
            if let Some(price) = prices.price(ticker) {
                holding.previous_price = Some(price);
                updated += 1;
            }
        }
        updated
    }

    /// Ask the provider whether each ticker is recognised and store the answer.
    ///
    /// Returns the tickers the provider rejected.
    pub fn refresh_validity<P: MarketDataProvider + ?Sized>(
        &mut self,
        provider: &P,
    ) -> Result<Vec<String>> {
        let mut invalid = Vec::new();
        for (ticker, holding) in self.portfolio.holdings.iter_mut() {
            holding.valid_ticker = provider.validate_ticker(ticker)?;
            if !holding.valid_ticker {
                invalid.push(ticker.clone());
            }
        }
        if !invalid.is_empty() {
            warn!(tickers = ?invalid, "provider does not recognise some tickers");
        }
        Ok(invalid)
    }

    /// Get the cash balance.
    pub fn cash(&self) -> f64 {
        self.portfolio.cash_balance
    }

    /// Set the cash balance.
    pub fn set_cash(&mut self, cash: f64) -> Result<()> {
        if !cash.is_finite() || cash < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "cash balance must be a non-negative number, got {}",
                cash
            )));
        }
        self.portfolio.cash_balance = cash;
        Ok(())
    }

    /// Add to (or, with a negative amount, withdraw from) the cash balance.
    ///
    /// Returns the new balance.
    pub fn add_cash(&mut self, amount: f64) -> Result<f64> {
        let cash = self.portfolio.cash_balance + amount;
        self.set_cash(cash)?;
        Ok(cash)
    }

    /// Execute a rebalancing plan against the stored holdings.
    ///
    /// Buys add shares and spend `value + trade_cost` of cash; sells remove
    /// shares and add `value - trade_cost`. Every traded holding accumulates the
    /// trade cost and takes the execution price as its previous price. The plan
    /// is applied atomically: if any action cannot be applied the store is left
    /// unchanged.
    pub fn apply_rebalance(&mut self, plan: &RebalancePlan) -> Result<()> {
        let mut next = self.portfolio.clone();

        for action in &plan.actions {
            let holding = next
                .holdings
                .get_mut(&normalize_ticker(&action.ticker))
                .ok_or_else(|| Error::HoldingNotFound(action.ticker.clone()))?;
            let value = action.value();

            if action.is_buy() {
                holding.quantity += action.buy;
                next.cash_balance -= value + action.trade_cost;
            } else {
                if action.sell > holding.quantity + QUANTITY_EPSILON {
                    return Err(Error::ConfigInvalid(format!(
                        "cannot sell {} shares of {}, only {} held",
                        action.sell, holding.ticker, holding.quantity
                    )));
                }
                holding.quantity = (holding.quantity - action.sell).max(0.0);
                next.cash_balance += value - action.trade_cost;
            }
            holding.transaction_cost += action.trade_cost;
            holding.previous_price = Some(action.price);
        }

        if next.cash_balance < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "plan would leave a negative cash balance of {:.2}",
                next.cash_balance
            )));
        }

        self.portfolio = next;
        info!(
            actions = plan.actions.len(),
            cost = plan.total_transaction_cost,
            cash = self.portfolio.cash_balance,
            "executed rebalancing plan"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RebalancingAction;
    use tempfile::tempdir;

    fn action(ticker: &str, buy: f64, sell: f64, price: f64, cost: f64) -> RebalancingAction {
        RebalancingAction {
            ticker: ticker.to_string(),
            buy,
            sell,
            trade_cost: cost,
            price,
            current_allocation_percent: 0.0,
            target_allocation_percent: 0.0,
        }
    }

    #[test]
    fn test_add_new_holding() {
        let mut store = HoldingsStore::in_memory();
        let (holding, was_update) = store
            .add_holding(Holding::new("aapl", 10.0).with_target(0.5))
            .unwrap();

        assert!(!was_update);
        assert_eq!(holding.ticker, "AAPL");
        assert_eq!(holding.quantity, 10.0);
        assert_eq!(store.portfolio().len(), 1);
    }

    #[test]
    fn test_add_holding_merges() {
        let mut store = HoldingsStore::in_memory();
        store
            .add_holding(Holding::new("AAPL", 10.0).with_transaction_cost(5.0).with_target(0.3))
            .unwrap();

        let (holding, was_update) = store
            .add_holding(Holding::new("aapl", 5.0).with_transaction_cost(2.0).with_target(0.4))
            .unwrap();

        assert!(was_update);
        assert_eq!(holding.quantity, 15.0);
        assert_eq!(holding.transaction_cost, 7.0);
        assert_eq!(holding.target_allocation, 0.4);
        assert_eq!(store.portfolio().len(), 1);
    }

    #[test]
    fn test_add_holding_normalizes_targets() {
        let mut store = HoldingsStore::in_memory();
        store.add_holding(Holding::new("A", 1.0).with_target(0.7)).unwrap();
        store.add_holding(Holding::new("B", 1.0).with_target(0.5)).unwrap();

        let a = store.get("A").unwrap().target_allocation;
        let b = store.get("B").unwrap().target_allocation;
        assert!((a - 0.583).abs() < 0.001);
        assert!((b - 0.417).abs() < 0.001);
    }

    #[test]
    fn test_add_holding_rejects_negative_quantity() {
        let mut store = HoldingsStore::in_memory();
        let result = store.add_holding(Holding::new("AAPL", -3.0));
        assert!(matches!(result, Err(Error::ConfigInvalid(_))));
        assert!(store.portfolio().is_empty());
    }

    #[test]
    fn test_remove_holding_not_found() {
        let mut store = HoldingsStore::in_memory();
        let result = store.remove_holding("AAPL");
        assert!(matches!(result, Err(Error::HoldingNotFound(_))));
    }

    #[test]
    fn test_cash_operations() {
        let mut store = HoldingsStore::in_memory();
        assert_eq!(store.cash(), 0.0);

        store.set_cash(10000.0).unwrap();
        assert_eq!(store.add_cash(500.0).unwrap(), 10500.0);
        assert_eq!(store.add_cash(-200.0).unwrap(), 10300.0);

        assert!(store.add_cash(-20000.0).is_err());
        assert_eq!(store.cash(), 10300.0);
    }

    #[test]
    fn test_set_alert_and_record_prices() {
        let mut store = HoldingsStore::in_memory();
        store.add_holding(Holding::new("AAPL", 1.0)).unwrap();
        store.add_holding(Holding::new("MSFT", 1.0)).unwrap();

        store.set_alert("aapl", Some(3.0), Some(AlertDirection::Below)).unwrap();
        assert_eq!(store.get("AAPL").unwrap().alert_threshold, Some(3.0));

        let updated = store.record_prices(&PriceMap::new().with_price("AAPL", 101.0));
        assert_eq!(updated, 1);
        assert_eq!(store.get("AAPL").unwrap().previous_price, Some(101.0));
        assert!(store.get("MSFT").unwrap().previous_price.is_none());
    }

    #[test]
    fn test_apply_rebalance() {
        let mut store = HoldingsStore::from_portfolio(
            Portfolio::with_cash(1000.0)
                .with_holding(Holding::new("AAPL", 10.0))
                .with_holding(Holding::new("MSFT", 4.0)),
        );
        let plan = RebalancePlan {
            actions: vec![
                action("AAPL", 2.0, 0.0, 100.0, 1.0),
                action("MSFT", 0.0, 1.0, 300.0, 1.5),
            ],
            total_transaction_cost: 2.5,
            ..RebalancePlan::default()
        };

        store.apply_rebalance(&plan).unwrap();

        let aapl = store.get("AAPL").unwrap();
        assert_eq!(aapl.quantity, 12.0);
        assert_eq!(aapl.transaction_cost, 1.0);
        assert_eq!(aapl.previous_price, Some(100.0));

        let msft = store.get("MSFT").unwrap();
        assert_eq!(msft.quantity, 3.0);
        assert_eq!(msft.transaction_cost, 1.5);

        // 1000 - 201 + 298.5
        assert_eq!(store.cash(), 1097.5);
    }

    #[test]
    fn test_apply_rebalance_is_atomic() {
        let mut store = HoldingsStore::from_portfolio(
            Portfolio::with_cash(1000.0).with_holding(Holding::new("AAPL", 10.0)),
        );
        let plan = RebalancePlan {
            actions: vec![
                action("AAPL", 1.0, 0.0, 100.0, 0.0),
                action("GONE", 1.0, 0.0, 100.0, 0.0),
            ],
            ..RebalancePlan::default()
        };

        assert!(matches!(
            store.apply_rebalance(&plan),
            Err(Error::HoldingNotFound(_))
        ));
        assert_eq!(store.get("AAPL").unwrap().quantity, 10.0);
        assert_eq!(store.cash(), 1000.0);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("portfolio.csv");

        // Create and save
        {
            let mut store = HoldingsStore::open(path.clone()).unwrap();
            store.add_holding(Holding::new("AAPL", 10.0).with_target(0.6)).unwrap();
            store.set_cash(5000.0).unwrap();
            store.save().unwrap();
        }

        // Reload and verify
        {
            let store = HoldingsStore::open(path).unwrap();
            assert_eq!(store.portfolio().len(), 1);
            assert_eq!(store.get("AAPL").unwrap().target_allocation, 0.6);
            assert_eq!(store.cash(), 5000.0);
        }
    }
}
