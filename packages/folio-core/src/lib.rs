//! Folio Core - Portfolio analytics engine.
//!
//! This crate turns holdings and market data into portfolio analytics:
//!
//! - **Holdings**: an in-memory store with CSV persistence
//! - **Valuation**: gross/net value, allocation, sector breakdown, income
//! - **Risk metrics**: volatility, Sharpe, beta, alpha, R², historical VaR, drawdowns
//! - **Optimization**: maximum-Sharpe weights and the efficient frontier
//! - **Rebalancing**: drift-driven buy/sell plans under a minimum cash constraint
//!
//! Market data is supplied by a [`MarketDataProvider`]; the engines themselves
//! never perform I/O.
//!
//! # Example
//!
//! ```rust
//! use folio_core::{compute_value, Holding, Portfolio, PriceMap};
//!
//! let portfolio = Portfolio::with_cash(500.0)
//!     .with_holding(Holding::new("AAPL", 10.0).with_target(0.6))
//!     .with_holding(Holding::new("MSFT", 5.0).with_target(0.4));
//! let prices = PriceMap::new().with_price("AAPL", 150.0).with_price("MSFT", 300.0);
//!
//! let value = compute_value(&portfolio, &prices).unwrap();
//! assert_eq!(value.gross, 3500.0);
//! ```

pub mod alerts;
pub mod analytics;
pub mod analyzer;
pub mod config;
pub mod market;
pub mod portfolio;
pub mod types;

// Re-export commonly used types
pub use types::{
    normalize_ticker, AlertDirection, ApiResponse, Holding, OptimizationResult,
    OptimizationStatus, Period, Portfolio, PriceMap, PriceQuote, RebalancingAction,
};

// Re-export main functionality
pub use alerts::{PriceAlert, PriceAlertChecker};
pub use analytics::{
    efficient_frontier, max_sharpe, FrontierPoint, MeanVariance, OptimizationEngine,
    RebalancePlan, RebalancingEngine, RiskEngine, RiskReport,
};
pub use analyzer::PortfolioAnalyzer;
pub use config::EngineConfig;
pub use market::{
    CachedMarketData, HistoricalSeries, MarketDataProvider, ReturnTable, StaticMarketData,
};
pub use portfolio::{
    compute_allocation, compute_sector_breakdown, compute_value, HoldingsStore,
    PerformanceReport, PortfolioValue,
};

/// Error types for folio-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Insufficient data: need at least {required} observations, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Division undefined: {0}")]
    DivisionUndefined(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Holding not found: {0}")]
    HoldingNotFound(String),

    #[error("Market data provider error: {0}")]
    Provider(String),
}

/// Result type for folio-core operations.
pub type Result<T> = std::result::Result<T, Error>;
