//! Engine configuration, stored as TOML.
//!
//! Every field has a default so a partial (or missing) file is valid.
//! Location: `FOLIO_CONFIG`, else `~/.folio/config.toml`.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FOLIO_CONFIG";
/// Environment variable overriding the holdings table location.
pub const PORTFOLIO_ENV: &str = "FOLIO_PORTFOLIO_FILE";

const APP_DIR: &str = ".folio";

/// Top-level configuration for all engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Risk metric settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskConfig {
    /// Annual risk-free rate (0.02 = 2%)
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Benchmark ticker for beta/alpha/R²
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    /// Minimum overlapping return observations
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Confidence level for historical VaR
    #[serde(default = "default_var_confidence")]
    pub var_confidence: f64,
    /// Trading days per year used for annualization
    #[serde(default = "default_trading_days")]
    pub trading_days: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            benchmark: default_benchmark(),
            min_observations: default_min_observations(),
            var_confidence: default_var_confidence(),
            trading_days: default_trading_days(),
        }
    }
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_benchmark() -> String {
    "SPY".to_string()
}

fn default_min_observations() -> usize {
    126
}

fn default_var_confidence() -> f64 {
    0.95
}

fn default_trading_days() -> f64 {
    252.0
}

/// Mean-variance optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    /// Number of efficient frontier targets
    #[serde(default = "default_frontier_points")]
    pub frontier_points: usize,
    /// Hard cap on solver iterations per problem
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// Annualize mean and covariance before optimizing
    #[serde(default = "default_annualize")]
    pub annualize: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            frontier_points: default_frontier_points(),
            max_iterations: default_max_iterations(),
            annualize: default_annualize(),
        }
    }
}

fn default_frontier_points() -> usize {
    100
}

fn default_max_iterations() -> u64 {
    5000
}

fn default_annualize() -> bool {
    true
}

/// Rebalancing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebalanceConfig {
    /// Cash that buys may never spend
    #[serde(default = "default_minimum_cash")]
    pub minimum_retained_cash: f64,
    /// Drift (as a fraction) that must be exceeded before trading
    #[serde(default)]
    pub drift_threshold: f64,
    /// Flat fee charged per trade
    #[serde(default)]
    pub fee_per_trade: f64,
    /// Fee as a fraction of trade value
    #[serde(default)]
    pub fee_rate: f64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            minimum_retained_cash: default_minimum_cash(),
            drift_threshold: 0.0,
            fee_per_trade: 0.0,
            fee_rate: 0.0,
        }
    }
}

fn default_minimum_cash() -> f64 {
    100.0
}

/// Price alert settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    /// Threshold in percent for holdings without their own
    #[serde(default = "default_alert_threshold")]
    pub default_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_alert_threshold(),
        }
    }
}

fn default_alert_threshold() -> f64 {
    5.0
}

/// File locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Holdings table; `FOLIO_PORTFOLIO_FILE` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_file: Option<PathBuf>,
    /// JSON market data snapshot used by the CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_data_file: Option<PathBuf>,
}

fn home_path(file: &str) -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(APP_DIR).join(file))
        .unwrap_or_else(|| PathBuf::from(file))
}

impl EngineConfig {
    /// Default config file path.
    ///
    /// Default path: `~/.folio/config.toml`
    /// Can be overridden with the `FOLIO_CONFIG` environment variable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        home_path("config.toml")
    }

    /// Default holdings table path, ignoring any config file.
    ///
    /// Default path: `~/.folio/portfolio.csv`
    /// Can be overridden with the `FOLIO_PORTFOLIO_FILE` environment variable.
    pub fn default_portfolio_path() -> PathBuf {
        if let Ok(path) = env::var(PORTFOLIO_ENV) {
            return PathBuf::from(path);
        }
        home_path("portfolio.csv")
    }

    /// Holdings table path: environment, then `[storage]`, then the default.
    pub fn portfolio_path(&self) -> PathBuf {
        if let Ok(path) = env::var(PORTFOLIO_ENV) {
            return PathBuf::from(path);
        }
        self.storage
            .portfolio_file
            .clone()
            .unwrap_or_else(Self::default_portfolio_path)
    }

    /// Load from the default path; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from a specific path; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Reject settings the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        if !risk.risk_free_rate.is_finite() {
            return Err(invalid("risk.risk_free_rate must be finite"));
        }
        if risk.benchmark.trim().is_empty() {
            return Err(invalid("risk.benchmark must not be empty"));
        }
        if risk.min_observations < 2 {
            return Err(invalid("risk.min_observations must be at least 2"));
        }
        if !(risk.var_confidence > 0.0 && risk.var_confidence < 1.0) {
            return Err(invalid("risk.var_confidence must be in (0, 1)"));
        }
        if !(risk.trading_days.is_finite() && risk.trading_days > 0.0) {
            return Err(invalid("risk.trading_days must be positive"));
        }

        if self.optimizer.frontier_points == 0 {
            return Err(invalid("optimizer.frontier_points must be at least 1"));
        }
        if self.optimizer.max_iterations == 0 {
            return Err(invalid("optimizer.max_iterations must be at least 1"));
        }

        let rebalance = &self.rebalance;
        for (name, value) in [
            ("rebalance.minimum_retained_cash", rebalance.minimum_retained_cash),
            ("rebalance.drift_threshold", rebalance.drift_threshold),
            ("rebalance.fee_per_trade", rebalance.fee_per_trade),
            ("rebalance.fee_rate", rebalance.fee_rate),
            ("alerts.default_threshold", self.alerts.default_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(&format!("{} must be non-negative", name)));
            }
        }
        if rebalance.drift_threshold >= 1.0 {
            return Err(invalid("rebalance.drift_threshold must be below 1"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::ConfigInvalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.risk.risk_free_rate, 0.02);
        assert_eq!(config.risk.benchmark, "SPY");
        assert_eq!(config.risk.min_observations, 126);
        assert_eq!(config.optimizer.frontier_points, 100);
        assert_eq!(config.rebalance.minimum_retained_cash, 100.0);
        assert_eq!(config.alerts.default_threshold, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [risk]
            benchmark = "QQQ"

            [rebalance]
            minimum_retained_cash = 250.0
            "#,
        )
        .unwrap();

        assert_eq!(config.risk.benchmark, "QQQ");
        assert_eq!(config.risk.risk_free_rate, 0.02);
        assert_eq!(config.rebalance.minimum_retained_cash, 250.0);
        assert!(config.optimizer.annualize);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = EngineConfig::from_toml_str("[risk]\nvar_confidence = 1.5\n");
        assert!(matches!(result, Err(Error::ConfigInvalid(_))));

        let result = EngineConfig::from_toml_str("[rebalance]\nminimum_retained_cash = -1.0\n");
        assert!(matches!(result, Err(Error::ConfigInvalid(_))));

        let result = EngineConfig::from_toml_str("[optimizer]\nfrontier_points = 0\n");
        assert!(matches!(result, Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = EngineConfig::from_toml_str("[risk\n");
        assert!(matches!(result, Err(Error::TomlDe(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("folio").join("config.toml");

        let mut config = EngineConfig::default();
        config.optimizer.max_iterations = 250;
        config.storage.portfolio_file = Some(PathBuf::from("/tmp/holdings.csv"));
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let loaded = EngineConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(loaded, EngineConfig::default());
    }
}
