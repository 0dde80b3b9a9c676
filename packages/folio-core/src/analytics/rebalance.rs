//! Drift-driven rebalancing under a minimum retained cash constraint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::RebalanceConfig;
use crate::portfolio::compute_value;
use crate::types::{Portfolio, PriceMap, RebalancingAction};
use crate::Result;

/// Drift at or below this is numerical noise, whatever the configured threshold.
const MIN_DRIFT: f64 = 1e-9;

/// Proposed trades bringing the portfolio back to its targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RebalancePlan {
    /// Sells first, then buys, each sorted by ticker
    pub actions: Vec<RebalancingAction>,
    pub total_transaction_cost: f64,
    /// Dollar value of all buys after scaling
    pub total_buy_value: f64,
    pub total_sell_value: f64,
    /// `cash_balance − minimum_retained_cash`, floored at zero
    pub available_cash: f64,
    /// Factor applied to every buy to respect `available_cash` (1 = unscaled)
    pub buy_scale: f64,
    /// Gross value the allocations were measured against
    pub gross_value: f64,
    /// Holdings left out because they have no price
    pub excluded: BTreeSet<String>,
    /// No priced holding drifted beyond the threshold
    pub balanced: bool,
    /// Underweight holdings whose buy was scaled to nothing for lack of cash
    pub cash_limited: BTreeSet<String>,
}

impl RebalancePlan {
    /// Whether every priced holding is within the drift threshold.
    ///
    /// A plan can be unbalanced and still have no actions when every needed
    /// buy was dropped for lack of cash; see [`RebalancePlan::cash_limited`].
    pub fn is_balanced(&self) -> bool {
        self.balanced
    }
}

/// Rebalancing engine configured with a [`RebalanceConfig`].
#[derive(Debug, Clone, Default)]
pub struct RebalancingEngine {
    config: RebalanceConfig,
}

impl RebalancingEngine {
    /// Create an engine with the given settings.
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    /// The engine settings.
    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Estimated cost of a trade of the given dollar value.
    pub fn trade_cost(&self, value: f64) -> f64 {
        self.config.fee_per_trade + self.config.fee_rate * value
    }

    /// Compute buy/sell actions for every holding whose allocation drifted.
    ///
    /// Allocation is `quantity × price / gross`; positive drift beyond the
    /// threshold sells the excess, negative drift buys the shortfall. Total
    /// buys never exceed `cash_balance − minimum_retained_cash`: when they
    /// would, every buy is scaled by the same factor. Sell proceeds are not
    /// counted as available cash. Fees are reported separately and are not
    /// part of the cash limit.
    ///
    /// A portfolio already at its targets yields an empty, balanced plan. Buys
    /// scaled to zero shares are dropped and their tickers recorded in
    /// `cash_limited`; the plan then stays unbalanced even if it has no actions.
    pub fn plan(&self, portfolio: &Portfolio, prices: &PriceMap) -> Result<RebalancePlan> {
        let value = compute_value(portfolio, prices)?;
        let targets = portfolio.normalized_targets()?;
        let available_cash = (portfolio.cash_balance - self.config.minimum_retained_cash).max(0.0);

        let mut plan = RebalancePlan {
            available_cash,
            buy_scale: 1.0,
            gross_value: value.gross,
            excluded: value.degraded,
            balanced: true,
            ..RebalancePlan::default()
        };
        if value.gross <= 0.0 {
            return Ok(plan);
        }

        let threshold = self.config.drift_threshold.max(MIN_DRIFT);
        let mut sells = Vec::new();
        let mut buys = Vec::new();

        for (ticker, holding) in &portfolio.holdings {
            let Some(price) = prices.price(ticker) else {
                continue;
            };
            let current = holding.market_value(price) / value.gross;
            let target = targets.get(ticker).copied().unwrap_or(0.0);
            let drift = current - target;
            if drift.abs() <= threshold {
                continue;
            }
            plan.balanced = false;

            let shares = (drift.abs() * value.gross / price).min(if drift > 0.0 {
                holding.quantity
            } else {
                f64::INFINITY
            });
            let action = RebalancingAction {
                ticker: ticker.clone(),
                buy: if drift < 0.0 { shares } else { 0.0 },
                sell: if drift > 0.0 { shares } else { 0.0 },
                trade_cost: 0.0,
                price,
                current_allocation_percent: current * 100.0,
                target_allocation_percent: target * 100.0,
            };
            if drift > 0.0 {
                sells.push(action);
            } else {
                buys.push(action);
            }
        }

        let wanted: f64 = buys.iter().map(|a| a.value()).sum();
        if wanted > available_cash {
            plan.buy_scale = if wanted > 0.0 { available_cash / wanted } else { 0.0 };
            warn!(
                wanted,
                available = available_cash,
                scale = plan.buy_scale,
                "buys exceed available cash; scaling down"
            );
            for action in &mut buys {
                action.buy *= plan.buy_scale;
            }
        }

        for mut action in sells.into_iter().chain(buys) {
            if action.buy <= 0.0 && action.sell <= 0.0 {
                if action.target_allocation_percent > action.current_allocation_percent {
                    plan.cash_limited.insert(action.ticker);
                }
                continue;
            }
            let trade_value = action.value();
            action.trade_cost = self.trade_cost(trade_value);
            if action.is_buy() {
                plan.total_buy_value += trade_value;
            } else {
                plan.total_sell_value += trade_value;
            }
            plan.total_transaction_cost += action.trade_cost;
            plan.actions.push(action);
        }

        if plan.is_balanced() {
            debug!("portfolio is balanced");
        } else if plan.actions.is_empty() {
            warn!(
                limited = ?plan.cash_limited,
                "portfolio drifted but no trade fits the available cash"
            );
        } else {
            info!(
                actions = plan.actions.len(),
                buys = plan.total_buy_value,
                sells = plan.total_sell_value,
                "computed rebalancing plan"
            );
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Holding;
    use approx::assert_relative_eq;

    fn engine() -> RebalancingEngine {
        RebalancingEngine::default()
    }

    #[test]
    fn test_balanced_portfolio() {
        let portfolio = Portfolio::with_cash(0.0)
            .with_holding(Holding::new("A", 10.0).with_target(0.5))
            .with_holding(Holding::new("B", 5.0).with_target(0.5));
        let prices = PriceMap::new().with_price("A", 100.0).with_price("B", 200.0);

        let plan = engine().plan(&portfolio, &prices).unwrap();
        assert!(plan.is_balanced());
        assert!(plan.actions.is_empty());
        assert_eq!(plan.total_transaction_cost, 0.0);
    }

    #[test]
    fn test_sell_overweight_buy_underweight() {
        // Gross 3000: A is 2000 (66.7%), B is 500 (16.7%), cash 500
        let portfolio = Portfolio::with_cash(500.0)
            .with_holding(Holding::new("A", 20.0).with_target(0.5))
            .with_holding(Holding::new("B", 5.0).with_target(0.5));
        let prices = PriceMap::new().with_price("A", 100.0).with_price("B", 100.0);

        let plan = engine().plan(&portfolio, &prices).unwrap();
        assert_eq!(plan.actions.len(), 2);

        let sell = &plan.actions[0];
        assert_eq!(sell.ticker, "A");
        assert_relative_eq!(sell.sell, 5.0, epsilon = 1e-9);
        assert_eq!(sell.buy, 0.0);

        // B wants 1000 of buys, only 400 above the retained 100 is available
        let buy = &plan.actions[1];
        assert_eq!(buy.ticker, "B");
        assert_relative_eq!(buy.buy, 4.0, epsilon = 1e-9);
        assert_relative_eq!(plan.buy_scale, 0.4, epsilon = 1e-12);
        assert!(plan.total_buy_value <= plan.available_cash + 1e-9);
        assert!(!plan.is_balanced());
        assert!(plan.cash_limited.is_empty());
    }

    #[test]
    fn test_buys_scaled_proportionally() {
        let portfolio = Portfolio::with_cash(1100.0)
            .with_holding(Holding::new("A", 0.0).with_target(0.4))
            .with_holding(Holding::new("B", 0.0).with_target(0.4));
        let prices = PriceMap::new().with_price("A", 10.0).with_price("B", 20.0);

        let plan = engine().plan(&portfolio, &prices).unwrap();
        // Wanted 440 + 440, available 1000: no scaling
        assert_eq!(plan.buy_scale, 1.0);

        let tight = RebalancingEngine::new(RebalanceConfig {
            minimum_retained_cash: 660.0,
            ..RebalanceConfig::default()
        });
        let plan = tight.plan(&portfolio, &prices).unwrap();
        assert_relative_eq!(plan.buy_scale, 0.5, epsilon = 1e-12);
        assert_relative_eq!(plan.actions[0].buy, 22.0, epsilon = 1e-9);
        assert_relative_eq!(plan.actions[1].buy, 11.0, epsilon = 1e-9);
        assert_relative_eq!(plan.total_buy_value, 440.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_cash_drops_buys() {
        let portfolio = Portfolio::with_cash(50.0)
            .with_holding(Holding::new("A", 1.0).with_target(1.0));
        let prices = PriceMap::new().with_price("A", 100.0);

        let plan = engine().plan(&portfolio, &prices).unwrap();
        assert!(plan.actions.is_empty());
        assert!(!plan.is_balanced());
        assert_eq!(plan.buy_scale, 0.0);
        assert!(plan.cash_limited.contains("A"));
    }

    #[test]
    fn test_threshold_and_fees() {
        let portfolio = Portfolio::with_cash(1000.0)
            .with_holding(Holding::new("A", 10.0).with_target(0.47))
            .with_holding(Holding::new("B", 10.0).with_target(0.1));
        let prices = PriceMap::new().with_price("A", 100.0).with_price("B", 100.0);
        // A is at 33.3% (drift -13.7%), B at 33.3% (drift +23.3%)

        let engine = RebalancingEngine::new(RebalanceConfig {
            drift_threshold: 0.15,
            fee_per_trade: 1.0,
            fee_rate: 0.001,
            ..RebalanceConfig::default()
        });
        let plan = engine.plan(&portfolio, &prices).unwrap();

        assert_eq!(plan.actions.len(), 1);
        let action = &plan.actions[0];
        assert_eq!(action.ticker, "B");
        assert_relative_eq!(action.trade_cost, 1.0 + 0.001 * action.value(), epsilon = 1e-12);
        assert_relative_eq!(plan.total_transaction_cost, action.trade_cost);
    }

    #[test]
    fn test_unpriced_holdings_excluded() {
        let portfolio = Portfolio::with_cash(1000.0)
            .with_holding(Holding::new("A", 1.0).with_target(0.5))
            .with_holding(Holding::new("B", 1.0).with_target(0.5));
        let prices = PriceMap::new().with_price("A", 100.0);

        let plan = engine().plan(&portfolio, &prices).unwrap();
        assert!(plan.excluded.contains("B"));
        assert!(plan.actions.iter().all(|a| a.ticker != "B"));
    }

    #[test]
    fn test_targets_normalized_before_planning() {
        let portfolio = Portfolio::with_cash(0.0)
            .with_holding(Holding::new("A", 7.0).with_target(0.7))
            .with_holding(Holding::new("B", 5.0).with_target(0.5));
        let prices = PriceMap::new().with_price("A", 100.0).with_price("B", 100.0);

        // 7:5 already matches 0.583:0.417
        let plan = engine().plan(&portfolio, &prices).unwrap();
        assert!(plan.is_balanced());
    }
}
