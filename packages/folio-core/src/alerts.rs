//! Price change alerts.
//!
//! A holding's alert compares the current price with its recorded
//! `previous_price`. Holdings without their own threshold use the configured
//! default.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AlertConfig;
use crate::types::{AlertDirection, Holding, Portfolio, PriceMap};

/// A triggered price alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceAlert {
    pub ticker: String,
    pub previous_price: f64,
    pub current_price: f64,
    /// Signed change in percent
    pub change_percent: f64,
    /// Threshold that was crossed, in percent
    pub threshold: f64,
    pub direction: AlertDirection,
}

/// Evaluates price alerts against a default threshold.
#[derive(Debug, Clone, Default)]
pub struct PriceAlertChecker {
    config: AlertConfig,
}

impl PriceAlertChecker {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    /// Signed percentage change from `previous` to `current`.
    ///
    /// `None` when there is no usable reference price.
    pub fn change_percent(previous: f64, current: f64) -> Option<f64> {
        if !previous.is_finite() || previous == 0.0 || !current.is_finite() {
            return None;
        }
        Some((current - previous) / previous * 100.0)
    }

    /// Check one holding at the given price.
    ///
    /// Fires when `|change| ≥ threshold`. A directional alert additionally
    /// requires the change to have the matching sign.
    pub fn check_holding(&self, holding: &Holding, current_price: f64) -> Option<PriceAlert> {
        let previous = holding.previous_price?;
        let change = Self::change_percent(previous, current_price)?;
        let threshold = holding.alert_threshold.unwrap_or(self.config.default_threshold);

        if change.abs() < threshold {
            return None;
        }
        let moved = if change >= 0.0 {
            AlertDirection::Above
        } else {
            AlertDirection::Below
        };
        if holding.alert_direction.is_some_and(|wanted| wanted != moved) {
            return None;
        }

        Some(PriceAlert {
            ticker: holding.ticker.clone(),
            previous_price: previous,
            current_price,
            change_percent: change,
            threshold,
            direction: moved,
        })
    }

    /// Check every priced holding of the portfolio.
    pub fn check(&self, portfolio: &Portfolio, prices: &PriceMap) -> Vec<PriceAlert> {
        let alerts: Vec<PriceAlert> = portfolio
            .holdings
            .values()
            .filter_map(|holding| {
                let price = prices.price(&holding.ticker)?;
                self.check_holding(holding, price)
            })
            .collect();
        debug!(checked = portfolio.len(), triggered = alerts.len(), "checked price alerts");
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn holding(previous: f64) -> Holding {
        Holding::new("AAPL", 10.0).with_previous_price(previous)
    }

    #[test]
    fn test_change_percent() {
        assert_relative_eq!(
            PriceAlertChecker::change_percent(100.0, 106.0).unwrap(),
            6.0,
            epsilon = 1e-12
        );
        assert!(PriceAlertChecker::change_percent(0.0, 106.0).is_none());
    }

    #[test]
    fn test_default_threshold() {
        let checker = PriceAlertChecker::default();
        assert!(checker.check_holding(&holding(100.0), 104.0).is_none());

        let alert = checker.check_holding(&holding(100.0), 95.0).unwrap();
        assert_eq!(alert.direction, AlertDirection::Below);
        assert_relative_eq!(alert.change_percent, -5.0, epsilon = 1e-12);
        assert_eq!(alert.threshold, 5.0);
    }

    #[test]
    fn test_directional_alert() {
        let checker = PriceAlertChecker::default();
        let mut h = holding(100.0);
        h.alert_threshold = Some(2.0);
        h.alert_direction = Some(AlertDirection::Above);

        assert!(checker.check_holding(&h, 97.0).is_none());
        assert!(checker.check_holding(&h, 103.0).is_some());
    }

    #[test]
    fn test_no_reference_price() {
        let checker = PriceAlertChecker::default();
        assert!(checker.check_holding(&Holding::new("AAPL", 1.0), 500.0).is_none());
    }

    #[test]
    fn test_check_portfolio() {
        let portfolio = Portfolio::new()
            .with_holding(holding(100.0))
            .with_holding(Holding::new("MSFT", 1.0).with_previous_price(300.0))
            .with_holding(Holding::new("TSLA", 1.0).with_previous_price(200.0));
        let prices = PriceMap::new()
            .with_price("AAPL", 110.0)
            .with_price("MSFT", 301.0);

        let checker = PriceAlertChecker::new(AlertConfig {
            default_threshold: 5.0,
        });
        let alerts = checker.check(&portfolio, &prices);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].ticker, "AAPL");
    }
}
